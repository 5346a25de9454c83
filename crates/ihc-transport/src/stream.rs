//! Stream (TCP) transport.
//!
//! Frame layout: one header byte, a big-endian `u16` payload length, then
//! the payload. The connection is the session, so no token is sent with
//! each message. A login reply ending in `*` marks an administrator.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ihc_protocol::{Header, Packet};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    ConnectionConfig, InboundQueues, SendFlags, Transport, TransportError,
    TransportEvents, sleep_or_cancel,
};

/// Largest payload the 16-bit length field can describe.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// A persistent TCP connection that reconnects after a fixed backoff.
pub struct StreamTransport {
    config: ConnectionConfig,
    writer: Mutex<Option<OwnedWriteHalf>>,
    queues: InboundQueues,
    administrator: AtomicBool,
    cancel: CancellationToken,
}

impl StreamTransport {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
            queues: InboundQueues::new(),
            administrator: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    fn address(&self) -> Result<String, TransportError> {
        let host = self.config.effective_host()?;
        Ok(format!("{host}:{}", self.config.port))
    }

    /// Opens the connection and performs the login exchange. Returns the
    /// read half on success.
    async fn connect_and_login(&self) -> Result<OwnedReadHalf, TransportError> {
        let addr = self.address()?;
        tracing::info!(%addr, "connecting");

        let stream = tokio::time::timeout(
            self.config.timings.connect_timeout(),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| {
            TransportError::ConnectFailed(io::Error::new(
                io::ErrorKind::TimedOut,
                "connect timed out",
            ))
        })?
        .map_err(TransportError::ConnectFailed)?;

        let (mut reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);

        let login = self.config.login_payload();
        self.send(Header::LOGIN, login.as_bytes(), SendFlags::WITHOUT_SESSION)
            .await?;

        let reply =
            read_frame(&mut reader, self.config.timings.stream_read_timeout())
                .await?
                .ok_or_else(|| {
                    TransportError::ReceiveFailed(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no login reply",
                    ))
                })?;

        if reply.header != Header::LOGIN {
            return Err(TransportError::LoginRejected {
                header: reply.header,
            });
        }

        let administrator = reply.payload.ends_with(b"*");
        self.administrator.store(administrator, Ordering::SeqCst);
        tracing::info!(%addr, administrator, "logged in");
        Ok(reader)
    }

    /// Receives until the connection breaks, times out, the server
    /// invalidates the session, or the transport is shut down.
    async fn receive_loop<E: TransportEvents>(
        &self,
        mut reader: OwnedReadHalf,
        events: &E,
    ) {
        let read_timeout = self.config.timings.stream_read_timeout();
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                frame = read_frame(&mut reader, read_timeout) => frame,
            };

            match frame {
                Ok(Some(packet)) if packet.header == Header::INVALID_SESSION => {
                    tracing::info!("server invalidated the session");
                    return;
                }
                Ok(Some(packet)) => {
                    tracing::debug!(
                        header = %packet.header,
                        len = packet.payload.len(),
                        "frame received"
                    );
                    events.set_connected(true);
                    self.queues.route(packet, events);
                }
                Ok(None) => {
                    tracing::debug!(?read_timeout, "read timed out");
                    return;
                }
                Err(e) => {
                    if !self.cancel.is_cancelled() {
                        tracing::warn!(error = %e, "connection lost");
                    }
                    return;
                }
            }
        }
    }
}

/// Reads one frame.
///
/// Returns `Ok(None)` if no frame started within `timeout`. Once the
/// header byte arrived, the rest of the frame must follow within the same
/// bound; an end of stream anywhere is an error.
pub async fn read_frame<R>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Option<Packet>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let header = match tokio::time::timeout(timeout, reader.read_u8()).await {
        Err(_) => return Ok(None),
        Ok(result) => Header(result.map_err(TransportError::ReceiveFailed)?),
    };

    let rest = async {
        let len = reader.read_u16().await?;
        let mut payload = vec![0u8; usize::from(len)];
        reader.read_exact(&mut payload).await?;
        Ok::<_, io::Error>(payload)
    };

    let payload = tokio::time::timeout(timeout, rest)
        .await
        .map_err(|_| {
            TransportError::ReceiveFailed(io::Error::new(
                io::ErrorKind::TimedOut,
                "frame truncated",
            ))
        })?
        .map_err(TransportError::ReceiveFailed)?;

    Ok(Some(Packet::new(header, payload)))
}

/// Builds a frame: header, big-endian length, payload.
pub fn encode_frame(header: Header, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        TransportError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_FRAME_PAYLOAD,
        }
    })?;

    let mut frame = Vec::with_capacity(3 + payload.len());
    frame.push(header.0);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

impl Transport for StreamTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        let addr = self.address()?;
        tracing::debug!(%addr, "stream transport initialized");
        Ok(())
    }

    async fn run<E: TransportEvents>(&self, events: Arc<E>) {
        let backoff = self.config.timings.reconnect_backoff();

        while !self.cancel.is_cancelled() {
            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                attempt = self.connect_and_login() => attempt,
            };

            match attempt {
                Ok(reader) => {
                    events.set_connected(true);
                    self.receive_loop(reader, events.as_ref()).await;
                }
                Err(e) => {
                    if !self.cancel.is_cancelled() {
                        tracing::error!(error = %e, "connection attempt failed");
                    }
                }
            }

            events.set_connected(false);
            self.administrator.store(false, Ordering::SeqCst);
            *self.writer.lock().await = None;

            if !sleep_or_cancel(&self.cancel, backoff).await {
                break;
            }
            tracing::info!("reconnecting");
        }

        *self.writer.lock().await = None;
        tracing::info!("stream transport stopped");
    }

    async fn send(
        &self,
        header: Header,
        payload: &[u8],
        _flags: SendFlags,
    ) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Shutdown);
        }

        let frame = encode_frame(header, payload)?;
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(TransportError::NotConnected)?;
        stream
            .write_all(&frame)
            .await
            .map_err(TransportError::SendFailed)?;

        tracing::trace!(%header, len = payload.len(), "frame sent");
        Ok(())
    }

    async fn poll(&self, header: Header, timeout: Duration) -> Option<Packet> {
        self.queues.poll(header, timeout).await
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn is_administrator(&self) -> bool {
        self.administrator.load(Ordering::SeqCst)
    }
}
