//! Datagram (UDP) transport.
//!
//! Datagram layout: one header byte, one flags byte, then data. The server
//! answers an unprefixed LOGIN with a session token (a trailing `*` marks
//! an administrator); from then on every send is prefixed with that token
//! and goes to the address the login reply came from.
//!
//! Payloads larger than [`MAX_FRAGMENT_PAYLOAD`] are split into several
//! datagrams. All but the last carry [`SendFlags::MORE_FOLLOWS`]; the
//! receiving side appends fragments per header until one arrives without
//! it. Fragment streams for the same header must not interleave.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use ihc_protocol::{Header, Packet};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::{
    ConnectionConfig, InboundQueues, SendFlags, Transport, TransportError,
    TransportEvents, TransportMode, sleep_or_cancel,
};

/// Receive buffer size; also the largest datagram ever sent.
pub const BUFFER_SIZE: usize = 1500;

/// Data bytes per datagram after the header and flags bytes.
pub const MAX_FRAGMENT_PAYLOAD: usize = BUFFER_SIZE - 2;

const MULTICAST_TTL: u32 = 8;

// ---------------------------------------------------------------------------
// Fragmentation
// ---------------------------------------------------------------------------

/// Splits `data` into datagrams of at most [`BUFFER_SIZE`] bytes.
///
/// An empty payload still produces one datagram.
pub fn fragment(header: Header, flags: SendFlags, data: &[u8]) -> Vec<Vec<u8>> {
    let base = flags.without(SendFlags::MORE_FOLLOWS);
    if data.is_empty() {
        return vec![vec![header.0, base.bits()]];
    }

    let count = data.len().div_ceil(MAX_FRAGMENT_PAYLOAD);
    data.chunks(MAX_FRAGMENT_PAYLOAD)
        .enumerate()
        .map(|(i, chunk)| {
            let flags = if i + 1 < count {
                base | SendFlags::MORE_FOLLOWS
            } else {
                base
            };
            let mut datagram = Vec::with_capacity(2 + chunk.len());
            datagram.push(header.0);
            datagram.push(flags.bits());
            datagram.extend_from_slice(chunk);
            datagram
        })
        .collect()
}

/// Joins fragments back into packets, one in-flight buffer per header.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<Header, Vec<u8>>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment. Returns the complete packet once a fragment
    /// without [`SendFlags::MORE_FOLLOWS`] arrives.
    pub fn push(
        &mut self,
        header: Header,
        flags: SendFlags,
        data: &[u8],
    ) -> Option<Packet> {
        self.pending
            .entry(header)
            .or_default()
            .extend_from_slice(data);

        if flags.contains(SendFlags::MORE_FOLLOWS) {
            return None;
        }
        let payload = self.pending.remove(&header).unwrap_or_default();
        Some(Packet::new(header, payload))
    }

    /// Number of headers with an unfinished fragment stream.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// DatagramTransport
// ---------------------------------------------------------------------------

/// Result of one receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// `len` bytes arrived from `from`.
    Data { len: usize, from: SocketAddr },
    /// A broadcast sent by this host came back and was dropped.
    SelfPacket,
    /// Nothing arrived within the receive timeout.
    TimedOut,
}

struct Bound {
    socket: UdpSocket,
    /// Configured destination: group, broadcast address or server.
    server: SocketAddr,
    /// Addresses treated as this host when filtering broadcast echoes.
    local_addrs: HashSet<IpAddr>,
}

#[derive(Debug, Default)]
struct Session {
    token: Option<Vec<u8>>,
    /// Source address of the last login reply.
    target: Option<SocketAddr>,
}

/// UDP transport with multicast, broadcast or unicast discovery.
pub struct DatagramTransport {
    config: ConnectionConfig,
    bound: OnceLock<Bound>,
    session: Mutex<Session>,
    queues: InboundQueues,
    administrator: AtomicBool,
    cancel: CancellationToken,
}

impl DatagramTransport {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            bound: OnceLock::new(),
            session: Mutex::new(Session::default()),
            queues: InboundQueues::new(),
            administrator: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Returns `true` while a session token is held.
    pub fn has_session(&self) -> bool {
        self.lock_session().token.is_some()
    }

    /// Local address of the socket, once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.get()?.socket.local_addr().ok()
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn establish_session(&self, data: &[u8], from: SocketAddr) {
        let (token, administrator) = match data.strip_suffix(b"*") {
            Some(token) => (token, true),
            None => (data, false),
        };

        {
            let mut session = self.lock_session();
            session.token = Some(token.to_vec());
            session.target = Some(from);
        }
        self.administrator.store(administrator, Ordering::SeqCst);
        tracing::info!(%from, administrator, "session established");
    }

    fn clear_session(&self) {
        self.lock_session().token = None;
        self.administrator.store(false, Ordering::SeqCst);
    }

    async fn login(&self) {
        let payload = self.config.login_payload();
        if let Err(e) = self
            .send(Header::LOGIN, payload.as_bytes(), SendFlags::WITHOUT_SESSION)
            .await
        {
            if !self.cancel.is_cancelled() {
                tracing::error!(error = %e, "login request failed");
            }
        }
    }

    async fn receive(
        &self,
        bound: &Bound,
        buf: &mut [u8],
    ) -> Result<RecvOutcome, TransportError> {
        let timeout = self.config.timings.datagram_receive_timeout();
        let (len, from) =
            match tokio::time::timeout(timeout, bound.socket.recv_from(buf)).await {
                Err(_) => return Ok(RecvOutcome::TimedOut),
                Ok(result) => result.map_err(TransportError::ReceiveFailed)?,
            };

        if self.config.mode == TransportMode::Broadcast
            && bound.local_addrs.contains(&from.ip())
        {
            return Ok(RecvOutcome::SelfPacket);
        }
        Ok(RecvOutcome::Data { len, from })
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| TransportError::InvalidAddress(format!("{host}: {e}")))?;
    addrs
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| TransportError::InvalidAddress(format!("{host}: no IPv4 address")))
}

/// Binds the receive socket with address reuse on, so other clients and
/// a local controller can hold the same port.
fn bind_shared(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    UdpSocket::from_std(socket.into())
}

/// Collects the addresses this host sends from, for broadcast echo
/// filtering. Loopback is always included.
async fn local_addresses(server: SocketAddr) -> HashSet<IpAddr> {
    let mut addrs = HashSet::from([IpAddr::V4(Ipv4Addr::LOCALHOST)]);

    let probe = async {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        socket.connect(server).await?;
        socket.local_addr()
    };
    match probe.await {
        Ok(local) if !local.ip().is_unspecified() => {
            addrs.insert(local.ip());
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "could not determine local address"),
    }
    addrs
}

impl Transport for DatagramTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        if self.bound.get().is_some() {
            return Ok(());
        }

        let mode = self.config.mode;
        let server = resolve(self.config.effective_host()?, self.config.port).await?;
        let socket = bind_shared(self.config.effective_local_port())
            .map_err(TransportError::InitFailed)?;

        match mode {
            TransportMode::Multicast => {
                let group = match server.ip() {
                    IpAddr::V4(group) if group.is_multicast() => group,
                    _ => {
                        return Err(TransportError::InvalidAddress(format!(
                            "{server} is not an IPv4 multicast group"
                        )));
                    }
                };
                socket
                    .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
                    .map_err(TransportError::InitFailed)?;
                socket
                    .set_multicast_ttl_v4(MULTICAST_TTL)
                    .map_err(TransportError::InitFailed)?;
                socket
                    .set_multicast_loop_v4(false)
                    .map_err(TransportError::InitFailed)?;
            }
            TransportMode::Broadcast => {
                socket.set_broadcast(true).map_err(TransportError::InitFailed)?;
            }
            TransportMode::Udp => {}
            TransportMode::Tcp => {
                return Err(TransportError::InvalidAddress(
                    "tcp is not a datagram mode".into(),
                ));
            }
        }

        let local_addrs = local_addresses(server).await;
        tracing::info!(
            %mode,
            %server,
            local = ?socket.local_addr().ok(),
            "datagram transport initialized"
        );

        let _ = self.bound.set(Bound {
            socket,
            server,
            local_addrs,
        });
        Ok(())
    }

    async fn run<E: TransportEvents>(&self, events: Arc<E>) {
        let Some(bound) = self.bound.get() else {
            tracing::error!("datagram transport run before initialize");
            return;
        };
        let timings = &self.config.timings;

        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut reassembler = Reassembler::new();
        let mut skip_login = false;

        while !self.cancel.is_cancelled() {
            if !skip_login && !self.has_session() {
                self.login().await;
            }
            skip_login = false;

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                outcome = self.receive(bound, &mut buf) => outcome,
            };

            let (len, from) = match outcome {
                Ok(RecvOutcome::Data { len, from }) => (len, from),
                Ok(RecvOutcome::SelfPacket) => {
                    tracing::trace!("dropped own broadcast");
                    skip_login = true;
                    continue;
                }
                Ok(RecvOutcome::TimedOut) => {
                    tracing::debug!("receive timed out");
                    events.set_connected(false);
                    continue;
                }
                Err(e) => {
                    if !self.cancel.is_cancelled() {
                        tracing::warn!(error = %e, "receive failed");
                    }
                    events.set_connected(false);
                    if !sleep_or_cancel(&self.cancel, timings.reconnect_backoff()).await {
                        break;
                    }
                    continue;
                }
            };

            if len < 2 {
                tracing::debug!(%from, len, "runt datagram");
                events.set_connected(false);
                continue;
            }

            let header = Header(buf[0]);
            let flags = SendFlags::from_bits(buf[1]);
            let data = &buf[2..len];
            let finish = !flags.contains(SendFlags::MORE_FOLLOWS);

            if finish && header == Header::LOGIN {
                self.establish_session(data, from);
                events.set_connected(true);
                continue;
            }

            if finish && header == Header::INVALID_SESSION {
                tracing::info!(%from, "server invalidated the session");
                self.clear_session();
                events.set_connected(false);
                if !sleep_or_cancel(&self.cancel, timings.invalid_session_retry()).await {
                    break;
                }
                self.login().await;
                skip_login = true;
                continue;
            }

            if self.has_session() {
                events.set_connected(true);
            }

            if let Some(packet) = reassembler.push(header, flags, data) {
                tracing::debug!(
                    %header,
                    len = packet.payload.len(),
                    "packet received"
                );
                self.queues.route(packet, events.as_ref());
            }
        }

        self.clear_session();
        tracing::info!("datagram transport stopped");
    }

    async fn send(
        &self,
        header: Header,
        payload: &[u8],
        flags: SendFlags,
    ) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Shutdown);
        }
        let bound = self.bound.get().ok_or(TransportError::NotConnected)?;

        let (data, target) = {
            let session = self.lock_session();
            let target = session.target.unwrap_or(bound.server);
            if flags.contains(SendFlags::WITHOUT_SESSION) {
                (payload.to_vec(), target)
            } else {
                let token = session.token.as_deref().ok_or(TransportError::NoSession)?;
                ([token, payload].concat(), target)
            }
        };

        for datagram in fragment(header, flags, &data) {
            bound
                .socket
                .send_to(&datagram, target)
                .await
                .map_err(TransportError::SendFailed)?;
        }

        tracing::trace!(%header, %target, len = data.len(), "datagram sent");
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
