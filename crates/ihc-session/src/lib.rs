//! Session management for the IntelliHome control client.
//!
//! The [`SessionManager`] sits on top of a [`Transport`](ihc_transport::Transport)
//! and turns caller requests into wire traffic:
//!
//! 1. **Dispatch**: a single task drains the outbound queue in order,
//!    waits for each listing's reply and decodes it.
//! 2. **Keepalive**: whenever the queue stays idle for one window, the
//!    dispatcher sends a keepalive instead.
//! 3. **Notifications**: results, server pushes and connectivity changes
//!    are published as [`Notification`]s on a broadcast channel.
//! 4. **Images**: device-type images are fetched in the background after
//!    each type listing.
//!
//! # How it fits in the stack
//!
//! ```text
//! Facade (above)  ← owns the manager, restarts it on reconfiguration
//!     ↕
//! Session Layer (this crate)  ← queueing, keepalives, notifications
//!     ↕
//! Transport Layer (below)  ← frames, login, reconnects
//! ```

mod config;
mod error;
mod images;
mod manager;
mod notification;

pub use config::SessionConfig;
pub use error::SessionError;
pub use manager::SessionManager;
pub use notification::Notification;

pub use ihc_protocol::DeviceTypeRegistry;
