//! Unified error type for the IntelliHome client.

use ihc_protocol::ProtocolError;
use ihc_session::SessionError;
use ihc_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attributes let `?` convert sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum IhcError {
    /// A transport-level error (bind, connect, send).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A reply did not match the record grammar.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (not running).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
