//! Connection parameters.

use std::time::Duration;

use ihc_protocol::hash_password;
use serde::Deserialize;

use crate::TransportError;

/// Default server port.
pub const DEFAULT_PORT: u16 = 49001;

/// Multicast group used when no host is configured in multicast mode.
pub const DEFAULT_MULTICAST_GROUP: &str = "227.1.1.10";

/// Broadcast address used when no host is configured in broadcast mode.
pub const DEFAULT_BROADCAST_ADDRESS: &str = "255.255.255.255";

/// Factory login, used for both user name and password.
pub const DEFAULT_CREDENTIAL: &str = "admin";

// ---------------------------------------------------------------------------
// TransportMode
// ---------------------------------------------------------------------------

/// How the client reaches the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Datagrams to a multicast group; the server is discovered by its
    /// login reply.
    #[default]
    Multicast,
    /// Datagrams to a broadcast address.
    Broadcast,
    /// Datagrams to a fixed server address.
    Udp,
    /// A persistent stream connection.
    Tcp,
}

impl TransportMode {
    /// Returns `true` for the three datagram modes.
    pub fn is_datagram(self) -> bool {
        !matches!(self, Self::Tcp)
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Multicast => write!(f, "multicast"),
            Self::Broadcast => write!(f, "broadcast"),
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

// ---------------------------------------------------------------------------
// TransportTimings
// ---------------------------------------------------------------------------

/// Timeouts and backoff intervals, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportTimings {
    /// How long the stream transport waits for the next frame before it
    /// treats the connection as lost.
    pub stream_read_timeout_ms: u64,
    /// Pause between stream reconnect attempts.
    pub reconnect_backoff_ms: u64,
    /// How long the datagram transport waits for a datagram.
    pub datagram_receive_timeout_ms: u64,
    /// Pause after the server invalidated a datagram session.
    pub invalid_session_retry_ms: u64,
    /// Upper bound for opening a stream connection.
    pub connect_timeout_ms: u64,
}

impl TransportTimings {
    pub fn stream_read_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_read_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn datagram_receive_timeout(&self) -> Duration {
        Duration::from_millis(self.datagram_receive_timeout_ms)
    }

    pub fn invalid_session_retry(&self) -> Duration {
        Duration::from_millis(self.invalid_session_retry_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for TransportTimings {
    fn default() -> Self {
        Self {
            stream_read_timeout_ms: 10_000,
            reconnect_backoff_ms: 2_500,
            datagram_receive_timeout_ms: 20_000,
            invalid_session_retry_ms: 2_500,
            connect_timeout_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionConfig
// ---------------------------------------------------------------------------

/// Where and how to connect, and with which credentials.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub mode: TransportMode,

    /// Server host, multicast group or broadcast address. Optional for
    /// the multicast and broadcast modes.
    pub host: Option<String>,

    pub port: u16,

    /// Local port for the datagram socket. Defaults to `port` in the
    /// multicast and broadcast modes (replies may be addressed to the
    /// group) and to an ephemeral port in unicast mode.
    pub local_port: Option<u16>,

    pub username: String,

    /// Hex digest of the password.
    pub password_hash: String,

    /// Plain password. When set it is hashed at login and takes the
    /// place of `password_hash`.
    pub password: Option<String>,

    pub timings: TransportTimings,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            host: None,
            port: DEFAULT_PORT,
            local_port: None,
            username: DEFAULT_CREDENTIAL.into(),
            password_hash: hash_password(DEFAULT_CREDENTIAL),
            password: None,
            timings: TransportTimings::default(),
        }
    }
}

impl ConnectionConfig {
    /// Returns the configured host, or the default group/broadcast
    /// address for the discovery modes.
    pub fn effective_host(&self) -> Result<&str, TransportError> {
        match (self.host.as_deref(), self.mode) {
            (Some(host), _) if !host.trim().is_empty() => Ok(host.trim()),
            (_, TransportMode::Multicast) => Ok(DEFAULT_MULTICAST_GROUP),
            (_, TransportMode::Broadcast) => Ok(DEFAULT_BROADCAST_ADDRESS),
            (_, mode) => Err(TransportError::InvalidAddress(format!(
                "{mode} mode requires a host"
            ))),
        }
    }

    /// Local port the datagram socket binds to.
    pub fn effective_local_port(&self) -> u16 {
        match (self.local_port, self.mode) {
            (Some(port), _) => port,
            (None, TransportMode::Udp) => 0,
            (None, _) => self.port,
        }
    }

    /// The `username:passwordHash` login payload.
    pub fn login_payload(&self) -> String {
        match self.password.as_deref() {
            Some(password) => format!("{}:{}", self.username, hash_password(password)),
            None => format!("{}:{}", self.username, self.password_hash),
        }
    }
}
