//! Client configuration, loadable from TOML.
//!
//! ```toml
//! [connection]
//! mode = "tcp"
//! host = "192.168.1.20"
//! username = "admin"
//! # Either the digest or the plain password, which is hashed at login.
//! password_hash = "21232f297a57a5a743894a0e4a801fc3"
//! # password = "admin"
//!
//! [connection.timings]
//! reconnect_backoff_ms = 5000
//!
//! [session]
//! keepalive_connected_ms = 10000
//! ```

use std::path::Path;
use std::str::FromStr;

use ihc_session::SessionConfig;
use ihc_transport::ConnectionConfig;
use serde::Deserialize;

use crate::IhcError;

/// Everything an [`IhcClient`](crate::IhcClient) needs to start. Both
/// tables are optional and fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IhcConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl IhcConfig {
    /// Reads and parses a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IhcError> {
        let text = std::fs::read_to_string(path)?;
        text.parse()
    }
}

impl FromStr for IhcConfig {
    type Err = IhcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use ihc_transport::{DEFAULT_PORT, TransportMode};

    use super::*;

    #[test]
    fn test_from_str_empty_uses_defaults() {
        let config: IhcConfig = "".parse().unwrap();
        assert_eq!(config, IhcConfig::default());
        assert_eq!(config.connection.mode, TransportMode::Multicast);
        assert_eq!(config.connection.port, DEFAULT_PORT);
    }

    #[test]
    fn test_from_str_overrides_nested_fields() {
        let config: IhcConfig = r#"
            [connection]
            mode = "tcp"
            host = "10.0.0.5"
            port = 50000

            [connection.timings]
            reconnect_backoff_ms = 100

            [session]
            keepalive_connected_ms = 1000
        "#
        .parse()
        .unwrap();

        assert_eq!(config.connection.mode, TransportMode::Tcp);
        assert_eq!(config.connection.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.connection.port, 50000);
        assert_eq!(config.connection.username, "admin");
        assert_eq!(config.connection.timings.reconnect_backoff_ms, 100);
        assert_eq!(config.connection.timings.connect_timeout_ms, 10_000);
        assert_eq!(config.session.keepalive_connected_ms, 1000);
        assert_eq!(config.session.keepalive_disconnected_ms, 2500);
    }

    #[test]
    fn test_from_str_plain_password_hashed_at_login() {
        let config: IhcConfig = r#"
            [connection]
            username = "bob"
            password = "admin"
        "#
        .parse()
        .unwrap();

        assert_eq!(config.connection.password.as_deref(), Some("admin"));
        assert_eq!(
            config.connection.login_payload(),
            "bob:21232f297a57a5a743894a0e4a801fc3"
        );
    }

    #[test]
    fn test_from_str_unknown_mode_rejected() {
        let result: Result<IhcConfig, _> = "[connection]\nmode = \"carrier-pigeon\"".parse();
        assert!(matches!(result, Err(IhcError::Config(_))));
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let result = IhcConfig::from_file("/nonexistent/ihc.toml");
        assert!(matches!(result, Err(IhcError::Io(_))));
    }
}
