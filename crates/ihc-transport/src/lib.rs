//! Transport layer for the IntelliHome control client.
//!
//! Provides the [`Transport`] trait the session manager drives, and two
//! implementations:
//!
//! - [`StreamTransport`]: one persistent TCP connection; the connection
//!   itself is the session.
//! - [`DatagramTransport`]: UDP with multicast, broadcast or unicast
//!   discovery, a server-issued session token and payload fragmentation.
//!
//! [`ClientTransport`] picks one of them at runtime from a
//! [`ConnectionConfig`].
//!
//! Every transport runs a receive loop that classifies inbound packets:
//! asynchronous headers go straight to [`TransportEvents::dispatch_async`],
//! everything else waits in a per-header queue until [`Transport::poll`]
//! claims it.

mod client;
mod config;
pub mod datagram;
mod error;
mod queue;
mod stream;

pub use client::ClientTransport;
pub use config::{
    ConnectionConfig, DEFAULT_BROADCAST_ADDRESS, DEFAULT_CREDENTIAL,
    DEFAULT_MULTICAST_GROUP, DEFAULT_PORT, TransportMode, TransportTimings,
};
pub use datagram::DatagramTransport;
pub use error::TransportError;
pub use queue::InboundQueues;
pub use stream::StreamTransport;

use std::future::Future;
use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;

use ihc_protocol::{Header, Packet};

// ---------------------------------------------------------------------------
// SendFlags
// ---------------------------------------------------------------------------

/// Modifiers for a single send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SendFlags(u8);

impl SendFlags {
    pub const NONE: Self = Self(0x00);
    /// Datagram continuation marker: another fragment of the same
    /// message follows.
    pub const MORE_FOLLOWS: Self = Self(0x01);
    /// Send without the session token. Only the login request uses this.
    pub const WITHOUT_SESSION: Self = Self(0x02);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns these flags with `other` cleared.
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for SendFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Callbacks from a transport's receive loop into its owner.
pub trait TransportEvents: Send + Sync + 'static {
    /// Reports the current connectivity. Called on every observation;
    /// the owner decides whether the value actually changed.
    fn set_connected(&self, connected: bool);

    /// Handles a packet whose header is asynchronous.
    fn dispatch_async(&self, packet: Packet);
}

/// A connection to the server, as seen by the session manager.
pub trait Transport: Send + Sync + 'static {
    /// Prepares sockets and addresses. Called once before [`run`](Self::run).
    fn initialize(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// The receive loop: logs in, receives, reconnects. Returns only after
    /// [`shutdown`](Self::shutdown).
    fn run<E: TransportEvents>(&self, events: Arc<E>) -> impl Future<Output = ()> + Send;

    /// Sends one message.
    fn send(
        &self,
        header: Header,
        payload: &[u8],
        flags: SendFlags,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Takes the oldest queued reply for `header`, waiting up to `timeout`.
    fn poll(
        &self,
        header: Header,
        timeout: Duration,
    ) -> impl Future<Output = Option<Packet>> + Send;

    /// Stops the receive loop and closes the socket.
    fn shutdown(&self);

    /// Whether the server flagged the logged-in user as administrator.
    fn is_administrator(&self) -> bool;
}

/// Sleeps for `duration` unless `cancel` fires first. Returns `false` if
/// cancelled.
async fn sleep_or_cancel(
    cancel: &tokio_util::sync::CancellationToken,
    duration: Duration,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
