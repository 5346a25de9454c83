//! Outbound commands and their response cells.
//!
//! An [`OutboundCommand`] is what callers hand to the session manager: a
//! header, payload bytes, and a [`ResponseCell`] the manager fills in for
//! requests whose result goes back to the caller instead of out as a
//! notification. Commands travel between tasks as `Arc<OutboundCommand>`.

use std::fmt;
use std::pin::pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::{Header, Packet};

// ---------------------------------------------------------------------------
// ResponseCell
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Slot {
    resolved: bool,
    packet: Option<Packet>,
}

/// A single-slot response holder with a bounded wait.
///
/// Setting the cell wakes one waiter. A later set overwrites the stored
/// value; commands are not meant to be reused for overlapping requests.
#[derive(Debug, Default)]
pub struct ResponseCell {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl ResponseCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the response (`None` records that no reply arrived) and
    /// wakes a waiter.
    pub fn set(&self, packet: Option<Packet>) {
        {
            let mut slot =
                self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.resolved = true;
            slot.packet = packet;
        }
        self.notify.notify_one();
    }

    /// Returns `true` once [`set`](Self::set) has been called.
    pub fn is_resolved(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resolved
    }

    fn current(&self) -> (bool, Option<Packet>) {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        (slot.resolved, slot.packet.clone())
    }

    /// Waits until the cell is set or `timeout` elapses, then returns the
    /// stored response. Returns `None` on timeout.
    pub async fn wait(&self, timeout: Duration) -> Option<Packet> {
        let mut notified = pin!(self.notify.notified());
        notified.as_mut().enable();

        let (resolved, packet) = self.current();
        if resolved {
            return packet;
        }

        if tokio::time::timeout(timeout, notified).await.is_err() {
            tracing::debug!(?timeout, "response wait timed out");
        }
        self.current().1
    }
}

// ---------------------------------------------------------------------------
// OutboundCommand
// ---------------------------------------------------------------------------

/// Time range and device filter for history requests. Timestamps are
/// passed through to the server as given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub device_id: Option<String>,
}

impl HistoryFilter {
    fn payload(&self) -> String {
        fn field<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(T::to_string).unwrap_or_default()
        }
        format!(
            "{};{};{}",
            field(&self.from),
            field(&self.to),
            field(&self.device_id)
        )
    }
}

/// A request queued for the session manager.
#[derive(Debug)]
pub struct OutboundCommand {
    header: Header,
    payload: Vec<u8>,
    response: ResponseCell,
}

impl OutboundCommand {
    /// Creates a command with an empty payload.
    pub fn new(header: Header) -> Self {
        Self::with_payload(header, Vec::new())
    }

    pub fn with_payload(header: Header, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            header,
            payload: payload.into(),
            response: ResponseCell::new(),
        }
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_response(&self, packet: Option<Packet>) {
        self.response.set(packet);
    }

    pub async fn wait_for_response(&self, timeout: Duration) -> Option<Packet> {
        self.response.wait(timeout).await
    }

    // -- Request builders -------------------------------------------------

    pub fn list_device_types() -> Self {
        Self::new(Header::LIST_DEVICE_TYPES)
    }

    /// Lists devices, optionally only those of one type.
    pub fn list_devices(type_id: Option<u32>) -> Self {
        let payload = type_id.map(|id| id.to_string()).unwrap_or_default();
        Self::with_payload(Header::LIST_DEVICES, payload)
    }

    /// `deviceId#commandId[;parameter]`
    pub fn send_command(
        device_id: &str,
        command_id: u32,
        parameter: Option<&str>,
    ) -> Self {
        let payload = match parameter {
            Some(p) => format!("{device_id}#{command_id};{p}"),
            None => format!("{device_id}#{command_id}"),
        };
        Self::with_payload(Header::SEND_COMMAND, payload)
    }

    pub fn rename_device(device_id: &str, name: &str) -> Self {
        Self::with_payload(Header::RENAME_DEVICE, format!("{device_id};{name}"))
    }

    pub fn count_history(filter: &HistoryFilter) -> Self {
        Self::with_payload(Header::COUNT_HISTORY, filter.payload())
    }

    pub fn list_history(filter: &HistoryFilter, limit: u32, offset: u32) -> Self {
        let payload = format!("{};{limit};{offset}", filter.payload());
        Self::with_payload(Header::LIST_HISTORY, payload)
    }

    pub fn list_users() -> Self {
        Self::new(Header::LIST_USERS)
    }

    pub fn create_user(username: &str, password_hash: &str) -> Self {
        Self::with_payload(
            Header::USER_CREATE,
            format!("{username};{password_hash}"),
        )
    }

    pub fn edit_user(user_id: u32, username: &str, password_hash: &str) -> Self {
        Self::with_payload(
            Header::USER_EDIT,
            format!("{user_id};{username};{password_hash}"),
        )
    }

    pub fn delete_user(user_id: u32) -> Self {
        Self::with_payload(Header::USER_DELETE, user_id.to_string())
    }

    pub fn load_type_image(filename: &str) -> Self {
        Self::with_payload(Header::LOAD_TYPE_IMAGE, filename)
    }

    pub fn keepalive() -> Self {
        Self::new(Header::KEEPALIVE)
    }

    /// The logoff command. Also stops the dispatcher that sends it.
    pub fn exit() -> Self {
        Self::new(Header::EXIT)
    }
}

/// Prints as `OutboundCommand H0xa4 'payload'`.
impl fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OutboundCommand {} '{}'",
            self.header,
            String::from_utf8_lossy(&self.payload)
        )
    }
}
