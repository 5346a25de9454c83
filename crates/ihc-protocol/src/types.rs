//! Core protocol types: header codes, inbound packets and the records the
//! server describes its devices, history and users with.
//!
//! Every type here is an immutable value. A device changing state on the
//! server produces a new [`Device`] snapshot, never an in-place update.

use std::borrow::Cow;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use serde::Serialize;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// One-byte message-type code.
///
/// This is a newtype over `u8` rather than an enum because the server may
/// send codes this client does not know about; those must still travel
/// through the transport (and be logged) without a decode failure.
///
/// The associated constants are the bit-exact values of the protocol.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
)]
#[serde(transparent)]
pub struct Header(pub u8);

impl Header {
    /// Login request / login reply.
    pub const LOGIN: Self = Self(0xA1);
    /// List device types.
    pub const LIST_DEVICE_TYPES: Self = Self(0xA2);
    /// List devices, optionally filtered by type.
    pub const LIST_DEVICES: Self = Self(0xA3);
    /// Send a command to a device (acknowledged asynchronously).
    pub const SEND_COMMAND: Self = Self(0xA4);
    /// Pushed by the server when a device changes state.
    pub const STATE_CHANGED: Self = Self(0xA5);
    /// Load the image of a device type.
    pub const LOAD_TYPE_IMAGE: Self = Self(0xA6);
    /// Rename a device.
    pub const RENAME_DEVICE: Self = Self(0xA7);
    /// Count history entries.
    pub const COUNT_HISTORY: Self = Self(0xB1);
    /// List history entries.
    pub const LIST_HISTORY: Self = Self(0xB2);
    /// List users.
    pub const LIST_USERS: Self = Self(0xC1);
    /// Create a user.
    pub const USER_CREATE: Self = Self(0xC2);
    /// Edit a user.
    pub const USER_EDIT: Self = Self(0xC3);
    /// Delete a user.
    pub const USER_DELETE: Self = Self(0xC4);
    /// Pushed by the server when the user list changed.
    pub const USERS_CHANGED: Self = Self(0xC5);
    /// Idle heartbeat (and its acknowledgement).
    pub const KEEPALIVE: Self = Self(0xE0);
    /// Server-side error carrying a message text.
    pub const ERROR: Self = Self(0xF0);
    /// The session is no longer valid; the client must log in again.
    pub const INVALID_SESSION: Self = Self(0xF1);
    /// Log off.
    pub const EXIT: Self = Self(0xFE);

    /// Headers the server may emit unsolicited. These bypass the
    /// per-header response queues and go straight to the notification
    /// path.
    pub const ASYNC: [Self; 5] = [
        Self::ERROR,
        Self::KEEPALIVE,
        Self::USERS_CHANGED,
        Self::SEND_COMMAND,
        Self::STATE_CHANGED,
    ];

    /// Returns `true` if packets with this header are dispatched
    /// immediately instead of being queued for a waiting request.
    pub fn is_async(self) -> bool {
        Self::ASYNC.contains(&self)
    }

    /// Returns a short human-readable name, or `"UNKNOWN"`.
    pub fn name(self) -> &'static str {
        match self {
            Self::LOGIN => "LOGIN",
            Self::LIST_DEVICE_TYPES => "LIST_DEVICE_TYPES",
            Self::LIST_DEVICES => "LIST_DEVICES",
            Self::SEND_COMMAND => "SEND_COMMAND",
            Self::STATE_CHANGED => "STATE_CHANGED",
            Self::LOAD_TYPE_IMAGE => "LOAD_TYPE_IMAGE",
            Self::RENAME_DEVICE => "RENAME_DEVICE",
            Self::COUNT_HISTORY => "COUNT_HISTORY",
            Self::LIST_HISTORY => "LIST_HISTORY",
            Self::LIST_USERS => "LIST_USERS",
            Self::USER_CREATE => "USER_CREATE",
            Self::USER_EDIT => "USER_EDIT",
            Self::USER_DELETE => "USER_DELETE",
            Self::USERS_CHANGED => "USERS_CHANGED",
            Self::KEEPALIVE => "KEEPALIVE",
            Self::ERROR => "ERROR",
            Self::INVALID_SESSION => "INVALID_SESSION",
            Self::EXIT => "EXIT",
            _ => "UNKNOWN",
        }
    }
}

/// Prints as `H0xa1`, the form used throughout the logs.
impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H0x{:02x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A complete inbound message: header plus (reassembled) payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// The message type.
    pub header: Header,
    /// Raw payload. Most payloads are text; see [`Packet::text`].
    pub payload: Vec<u8>,
}

impl Packet {
    /// Creates a packet from a header and payload bytes.
    pub fn new(header: Header, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Returns the payload as UTF-8 text.
    pub fn text(&self) -> Result<&str, ProtocolError> {
        Ok(std::str::from_utf8(&self.payload)?)
    }

    /// Returns the payload as text, replacing invalid sequences. Meant
    /// for logs and error messages.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

// ---------------------------------------------------------------------------
// Device model
// ---------------------------------------------------------------------------

/// A state a device can be in, e.g. `1;On`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub id: u32,
    pub name: String,
}

/// A command a device type accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceCommand {
    pub id: u32,
    pub name: String,
    /// Optional parameter descriptor, e.g. `range(0-100)`.
    pub parameter: Option<String>,
}

impl DeviceCommand {
    /// Interprets a `range(...)` parameter descriptor.
    ///
    /// - `range(min-max)` → `min..=max`
    /// - `range(max)` → `0..=max`
    /// - any other `range...` → `0..=100`
    ///
    /// Returns `None` when the command takes no parameter or the
    /// descriptor is not a range.
    pub fn parameter_range(&self) -> Option<RangeInclusive<i64>> {
        let descriptor = self.parameter.as_deref()?;
        let rest = descriptor.strip_prefix("range")?;

        let bounds = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .and_then(|inner| -> Option<(i64, i64)> {
                match inner.split_once('-') {
                    Some((min, max)) => {
                        Some((min.parse().ok()?, max.parse().ok()?))
                    }
                    None => Some((0, inner.parse().ok()?)),
                }
            });

        let (min, max) = bounds.unwrap_or((0, 100));
        Some(min..=max)
    }
}

/// A kind of device: its display attributes and the commands it accepts.
///
/// Types are cached in the [`DeviceTypeRegistry`](crate::DeviceTypeRegistry)
/// and shared by reference (`Arc`) from every [`Device`] of that type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceType {
    pub id: u32,
    pub name: String,
    /// HTML color code, e.g. `#FF00FF`.
    pub color: Option<String>,
    /// Server-side filename of the type's image.
    pub image_filename: Option<String>,
    pub commands: Vec<DeviceCommand>,
    /// Decoded image bytes, filled in by the background image loader.
    #[serde(skip)]
    pub image: Option<Arc<[u8]>>,
}

impl DeviceType {
    /// Returns `true` once the image bytes have been loaded.
    pub fn is_image_loaded(&self) -> bool {
        self.image.is_some()
    }

    /// Looks up one of this type's commands by id.
    pub fn command(&self, id: u32) -> Option<&DeviceCommand> {
        self.commands.iter().find(|c| c.id == id)
    }
}

/// A snapshot of a single device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: String,
    pub type_id: u32,
    /// The registered type, if it was known when this snapshot was decoded.
    #[serde(skip)]
    pub device_type: Option<Arc<DeviceType>>,
    pub name: String,
    pub state: DeviceState,
    /// Optional value attached to the state, e.g. a dim level.
    pub state_value: Option<String>,
    /// Last check-in, milliseconds since the Unix epoch.
    pub last_checkin_ms: i64,
}

// ---------------------------------------------------------------------------
// History and users
// ---------------------------------------------------------------------------

/// One entry of the device history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub device_id: String,
    pub device_name: String,
    /// Human-readable description of what happened.
    pub action: String,
    pub action_type: Option<String>,
}

/// A user account on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: u32,
    pub username: String,
    pub administrator: bool,
}
