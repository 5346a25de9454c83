//! Per-header inbound queues.
//!
//! The receive loop is the only producer; the session manager's inline
//! waits are the only consumer. A queue is created the first time either
//! side touches its header.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ihc_protocol::{Header, Packet};
use tokio::sync::mpsc;

use crate::TransportEvents;

struct Queue {
    tx: mpsc::UnboundedSender<Packet>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>>,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

/// Unclaimed replies, one FIFO per header.
///
/// Queues are never removed. Async pushes are dispatched rather than
/// queued, so in practice only the request headers get one, and a header
/// is a single byte, so the map never exceeds 256 entries.
#[derive(Default)]
pub struct InboundQueues {
    queues: Mutex<HashMap<Header, Queue>>,
}

impl InboundQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for a later [`poll`](Self::poll).
    pub fn push(&self, packet: Packet) {
        let mut queues =
            self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let header = packet.header;
        let queue = queues.entry(header).or_insert_with(Queue::new);
        // The receiver lives in the same map entry, so the send cannot fail.
        let _ = queue.tx.send(packet);
        tracing::debug!(%header, "reply queued");
    }

    /// Takes the oldest reply for `header`, waiting up to `timeout`.
    pub async fn poll(&self, header: Header, timeout: Duration) -> Option<Packet> {
        let rx = {
            let mut queues =
                self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(&queues.entry(header).or_insert_with(Queue::new).rx)
        };

        let wait = async { rx.lock().await.recv().await };
        match tokio::time::timeout(timeout, wait).await {
            Ok(packet) => packet,
            Err(_) => {
                tracing::debug!(%header, ?timeout, "no reply before timeout");
                None
            }
        }
    }

    /// Sends an asynchronous packet to `events`, queues anything else.
    pub fn route<E: TransportEvents>(&self, packet: Packet, events: &E) {
        if packet.header.is_async() {
            events.dispatch_async(packet);
        } else {
            self.push(packet);
        }
    }
}
