//! Events the session manager publishes to its subscribers.

use ihc_protocol::{Device, User};
use serde::Serialize;

/// Something that happened on the session, published on a broadcast
/// channel. Listing results carry either the decoded records or an error
/// text meant for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// The connected flag flipped, or the server pushed an error (then
    /// `connected` repeats the current value and `error` holds the text).
    ConnectivityChanged {
        connected: bool,
        error: Option<String>,
    },

    /// A device-type listing finished. The types themselves are in the
    /// registry.
    DeviceTypesListed { error: Option<String> },

    DeviceListUpdated { result: Result<Vec<Device>, String> },

    /// The server pushed a new snapshot of one device.
    DeviceStateChanged { result: Result<Device, String> },

    UsersListed { result: Result<Vec<User>, String> },

    /// The server's user list changed; listings are stale.
    UsersChanged,

    /// The image of a device type finished loading.
    TypeImageLoaded { type_id: u32 },
}
