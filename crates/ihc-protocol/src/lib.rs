//! Wire protocol for the IntelliHome control client.
//!
//! This crate defines what client and server say to each other, without
//! knowing how the bytes travel:
//!
//! - **Types** ([`Header`], [`Packet`], [`Device`], [`DeviceType`], ...):
//!   header codes, inbound packets and the records the server describes
//!   its world with.
//! - **Envelope** ([`OutboundCommand`], [`ResponseCell`]): requests on
//!   their way out, each with a slot for a reply.
//! - **Codec** ([`codec`]): position-based decoders for the server's
//!   delimited text records.
//! - **Registry** ([`DeviceTypeRegistry`]): the device-type cache that
//!   device records resolve their type through.
//! - **Passwords** ([`hash_password`]): the digest logins and user
//!   records carry instead of a plain password.
//!
//! ```text
//! Transport (frames) → Protocol (Packet / records) → Session (requests, notifications)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

pub mod codec;
mod envelope;
mod error;
mod password;
mod registry;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{
    decode_count, decode_device_types, decode_devices, decode_history,
    decode_users,
};
pub use envelope::{HistoryFilter, OutboundCommand, ResponseCell};
pub use error::ProtocolError;
pub use password::hash_password;
pub use registry::DeviceTypeRegistry;
pub use types::{
    Device, DeviceCommand, DeviceState, DeviceType, Header, HistoryEntry,
    Packet, User,
};
