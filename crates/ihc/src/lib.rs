//! # ihc
//!
//! Client for the IntelliHome home automation control protocol.
//!
//! An [`IhcClient`] connects to a controller over TCP or UDP (unicast,
//! multicast or broadcast), keeps the session alive and turns server
//! replies and pushes into [`Notification`]s.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ihc::prelude::*;
//!
//! # async fn demo() -> Result<(), IhcError> {
//! let config: IhcConfig = r#"
//!     [connection]
//!     mode = "tcp"
//!     host = "192.168.1.20"
//! "#.parse()?;
//!
//! let client = IhcClient::new(config);
//! let mut notifications = client.subscribe();
//! client.start().await?;
//! client.request_devices(None).await?;
//!
//! while let Ok(notification) = notifications.recv().await {
//!     if let Notification::DeviceListUpdated { result } = notification {
//!         println!("{result:?}");
//!         break;
//!     }
//! }
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;

pub use client::IhcClient;
pub use config::IhcConfig;
pub use error::IhcError;

pub use ihc_protocol as protocol;
pub use ihc_session as session;
pub use ihc_transport as transport;

/// Re-exports of the types most callers need.
pub mod prelude {
    pub use crate::{IhcClient, IhcConfig, IhcError};
    pub use ihc_protocol::{
        Device, DeviceCommand, DeviceState, DeviceType, DeviceTypeRegistry,
        HistoryEntry, HistoryFilter, User, hash_password,
    };
    pub use ihc_session::{Notification, SessionConfig, SessionError};
    pub use ihc_transport::{ConnectionConfig, TransportMode, TransportTimings};
}
