//! Shared helpers for the transport integration tests.

use std::sync::Mutex;
use std::time::Duration;

use ihc_protocol::Packet;
use ihc_transport::TransportEvents;
use tokio::sync::{mpsc, watch};

/// Records what a receive loop reports.
pub struct RecordingEvents {
    connected: watch::Sender<bool>,
    pushed: mpsc::UnboundedSender<Packet>,
    pushed_rx: Mutex<Option<mpsc::UnboundedReceiver<Packet>>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        let (pushed, pushed_rx) = mpsc::unbounded_channel();
        Self {
            connected,
            pushed,
            pushed_rx: Mutex::new(Some(pushed_rx)),
        }
    }

    /// Waits until the reported connectivity equals `expected`.
    pub async fn wait_connected(&self, expected: bool) {
        let mut rx = self.connected.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|c| *c == expected))
            .await
            .expect("connectivity should change in time")
            .expect("sender alive");
    }

    /// Takes the receiver of asynchronously dispatched packets.
    pub fn pushed(&self) -> mpsc::UnboundedReceiver<Packet> {
        self.pushed_rx
            .lock()
            .unwrap()
            .take()
            .expect("pushed() called once")
    }
}

impl TransportEvents for RecordingEvents {
    fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    fn dispatch_async(&self, packet: Packet) {
        let _ = self.pushed.send(packet);
    }
}
