//! Error types for the session layer.

use ihc_protocol::ProtocolError;
use ihc_transport::TransportError;

/// Errors that can occur while starting or using a session manager.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The manager was stopped; no further requests are accepted.
    #[error("session manager is not running")]
    NotRunning,

    /// The transport failed to initialize or send.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A reply did not match the expected record grammar.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
