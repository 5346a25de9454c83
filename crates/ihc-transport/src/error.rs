use ihc_protocol::Header;

/// Errors that can occur in the transport layer.
///
/// None of these are fatal to the receive loop: it logs them, backs off
/// and reconnects while the transport is enabled.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection to the server failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The server answered the login request with something other than a
    /// login reply.
    #[error("login rejected, server replied with {header}")]
    LoginRejected {
        /// Header of the reply that was received instead.
        header: Header,
    },

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Creating or configuring the socket failed.
    #[error("initialization failed: {0}")]
    InitFailed(#[source] std::io::Error),

    /// There is no open connection (or the transport was never
    /// initialized).
    #[error("not connected")]
    NotConnected,

    /// A session-bound message was sent before the server issued a
    /// session token.
    #[error("no session established")]
    NoSession,

    /// The payload does not fit the frame's length field.
    #[error("payload of {len} bytes exceeds the {max} byte frame limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// The configured host could not be used as a server address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
