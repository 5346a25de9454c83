//! A scripted in-memory transport for the session manager tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use ihc_protocol::{Header, Packet};
use ihc_session::Notification;
use ihc_transport::{InboundQueues, SendFlags, Transport, TransportError, TransportEvents};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Answers sends from a fixed table and records everything sent.
pub struct MockTransport {
    replies: HashMap<Header, Vec<u8>>,
    connect_on_run: bool,
    administrator: bool,
    queues: InboundQueues,
    sent: mpsc::UnboundedSender<(Header, String)>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Packet>>>,
    cancel: CancellationToken,
}

/// The test's side of a [`MockTransport`].
pub struct MockHandle {
    pub sent: mpsc::UnboundedReceiver<(Header, String)>,
    pub inbound: mpsc::UnboundedSender<Packet>,
    /// Cancelled once the transport is shut down.
    pub cancel: CancellationToken,
}

impl MockTransport {
    pub fn new() -> (Self, MockHandle) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = Self {
            replies: HashMap::new(),
            connect_on_run: false,
            administrator: false,
            queues: InboundQueues::new(),
            sent: sent_tx,
            inbound: Mutex::new(Some(inbound_rx)),
            cancel: CancellationToken::new(),
        };
        let handle = MockHandle {
            sent: sent_rx,
            inbound: inbound_tx,
            cancel: transport.cancel.clone(),
        };
        (transport, handle)
    }

    /// Replies to every send of `header` with `payload`.
    pub fn reply(mut self, header: Header, payload: &str) -> Self {
        self.replies.insert(header, payload.as_bytes().to_vec());
        self
    }

    /// Reports connected as soon as the receive loop starts.
    pub fn connected(mut self, administrator: bool) -> Self {
        self.connect_on_run = true;
        self.administrator = administrator;
        self
    }
}

impl Transport for MockTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn run<E: TransportEvents>(&self, events: Arc<E>) {
        if self.connect_on_run {
            events.set_connected(true);
        }
        let Some(mut inbound) = self.inbound.lock().unwrap().take() else {
            return;
        };
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                packet = inbound.recv() => match packet {
                    Some(packet) => self.queues.route(packet, events.as_ref()),
                    None => self.cancel.cancelled().await,
                },
            }
        }
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
        let _ = self
            .sent
            .send((header, String::from_utf8_lossy(payload).into_owned()));
        if let Some(reply) = self.replies.get(&header) {
            self.queues.push(Packet::new(header, reply.clone()));
        }
        Ok(())
    }

    async fn poll(&self, header: Header, timeout: Duration) -> Option<Packet> {
        self.queues.poll(header, timeout).await
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn is_administrator(&self) -> bool {
        self.administrator
    }
}

impl MockHandle {
    /// Next sent message that is not a keepalive.
    pub async fn next_request(&mut self) -> (Header, String) {
        loop {
            let sent = tokio::time::timeout(Duration::from_secs(30), self.sent.recv())
                .await
                .expect("a request should be sent in time")
                .expect("transport alive");
            if sent.0 != Header::KEEPALIVE {
                return sent;
            }
        }
    }
}

/// Next notification that is not a connectivity change.
pub async fn next_notification(rx: &mut broadcast::Receiver<Notification>) -> Notification {
    loop {
        let notification = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("a notification should arrive in time")
            .expect("channel open");
        if !matches!(notification, Notification::ConnectivityChanged { error: None, .. }) {
            return notification;
        }
    }
}
