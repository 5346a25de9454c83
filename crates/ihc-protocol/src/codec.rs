//! Decoders for the server's delimited text records.
//!
//! Every single-record decoder takes `(text, offset)` and returns the
//! decoded value together with the number of bytes it consumed, so list
//! decoders can walk a payload by advancing the offset. A decoder never
//! consumes a terminator that belongs to the caller's enclosing record
//! (a command stops *before* the `,` or `]` that follows it).
//!
//! Fields are separated by `;`. An empty optional field decodes to `None`,
//! never to an empty string. All delimiters are ASCII, so offsets are byte
//! offsets into the UTF-8 payload.

use std::str::FromStr;
use std::sync::Arc;

use crate::{
    Device, DeviceCommand, DeviceState, DeviceType, DeviceTypeRegistry,
    HistoryEntry, ProtocolError, User,
};

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Cursor over one record of a payload.
struct Scanner<'a> {
    text: &'a str,
    start: usize,
    pos: usize,
    record: &'static str,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str, offset: usize, record: &'static str) -> Self {
        let offset = offset.min(text.len());
        Self {
            text,
            start: offset,
            pos: offset,
            record,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn bump(&mut self) {
        if self.pos < self.text.len() {
            self.pos += 1;
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn consumed(&self) -> usize {
        self.pos - self.start
    }

    fn unexpected_end(&self) -> ProtocolError {
        ProtocolError::UnexpectedEnd {
            record: self.record,
        }
    }

    /// Returns the text up to (not including) the first of `stops`, and
    /// leaves the cursor on that stop byte. At the end of the buffer the
    /// remainder is returned and the stop is `None`.
    fn take_until(&mut self, stops: &[u8]) -> (&'a str, Option<u8>) {
        let bytes = self.text.as_bytes();
        let begin = self.pos;
        while let Some(&b) = bytes.get(self.pos) {
            if stops.contains(&b) {
                return (&self.text[begin..self.pos], Some(b));
            }
            self.pos += 1;
        }
        (&self.text[begin..], None)
    }

    /// Reads a field that must be terminated by `stop`, consuming it.
    fn field(&mut self, stop: u8) -> Result<&'a str, ProtocolError> {
        match self.take_until(&[stop]) {
            (value, Some(_)) => {
                self.bump();
                Ok(value)
            }
            (_, None) => Err(self.unexpected_end()),
        }
    }

    /// Consumes `expected` or fails.
    fn expect(&mut self, expected: u8) -> Result<(), ProtocolError> {
        match self.peek() {
            Some(b) if b == expected => {
                self.bump();
                Ok(())
            }
            Some(b) => Err(ProtocolError::InvalidEnvelope(format!(
                "expected '{}' in {} record at offset {}, found '{}'",
                expected as char, self.record, self.pos, b as char
            ))),
            None => Err(self.unexpected_end()),
        }
    }
}

fn number<T: FromStr>(
    field: &'static str,
    value: &str,
) -> Result<T, ProtocolError> {
    value.trim().parse().map_err(|_| ProtocolError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn optional(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Converts fractional seconds to whole milliseconds, rounding.
pub fn seconds_to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

fn timestamp(field: &'static str, value: &str) -> Result<i64, ProtocolError> {
    number::<f64>(field, value).map(seconds_to_millis)
}

// ---------------------------------------------------------------------------
// Single records
// ---------------------------------------------------------------------------

/// Decodes `id;name;`. The trailing `;` is consumed; a state at the very
/// end of the buffer may omit it.
pub fn decode_device_state(
    text: &str,
    offset: usize,
) -> Result<(DeviceState, usize), ProtocolError> {
    let mut s = Scanner::new(text, offset, "device state");

    let id = number("state id", s.field(b';')?)?;
    let (name, stop) = s.take_until(b";");
    if stop.is_some() {
        s.bump();
    }

    let state = DeviceState {
        id,
        name: name.to_string(),
    };
    Ok((state, s.consumed()))
}

/// Decodes `id;name;param`, stopping before the `,` or `]` that ends it.
pub fn decode_device_command(
    text: &str,
    offset: usize,
) -> Result<(DeviceCommand, usize), ProtocolError> {
    let mut s = Scanner::new(text, offset, "device command");

    let id = number("command id", s.field(b';')?)?;
    let name = s.field(b';')?;
    let (parameter, _) = s.take_until(b",]");

    let command = DeviceCommand {
        id,
        name: name.to_string(),
        parameter: optional(parameter),
    };
    Ok((command, s.consumed()))
}

/// Decodes `id;name;color;image;[cmd,cmd,...]`.
///
/// The closing `]` of the command list is consumed together with the one
/// separator byte after it, if any. A single leading `[` is skipped, so
/// both `T1,T2` and `[T1][T2]` list layouts decode record by record.
pub fn decode_device_type(
    text: &str,
    offset: usize,
) -> Result<(DeviceType, usize), ProtocolError> {
    let mut s = Scanner::new(text, offset, "device type");

    if s.peek() == Some(b'[') {
        s.bump();
    }

    let id = number("type id", s.field(b';')?)?;
    let name = s.field(b';')?.to_string();
    let color = optional(s.field(b';')?);
    let image_filename = optional(s.field(b';')?);

    s.expect(b'[')?;
    let mut commands = Vec::new();
    loop {
        match s.peek() {
            Some(b']') => {
                s.bump();
                break;
            }
            Some(b',') => s.bump(),
            Some(_) => {
                let (command, read) = decode_device_command(text, s.pos)?;
                commands.push(command);
                s.pos += read;
            }
            None => return Err(s.unexpected_end()),
        }
    }

    if !s.at_end() {
        s.bump();
    }

    let device_type = DeviceType {
        id,
        name,
        color,
        image_filename,
        commands,
        image: None,
    };
    Ok((device_type, s.consumed()))
}

/// Decodes `id;typeId;name;stateId;stateName;stateValue;lastCheckin`.
///
/// The record ends at a `,` (consumed) or at the end of the buffer. The
/// type is resolved through `registry`; an unknown type id leaves
/// [`Device::device_type`] empty.
pub fn decode_device(
    text: &str,
    offset: usize,
    registry: &DeviceTypeRegistry,
) -> Result<(Device, usize), ProtocolError> {
    let mut s = Scanner::new(text, offset, "device");

    let id = s.field(b';')?.to_string();
    let type_id = number("device type id", s.field(b';')?)?;
    let name = s.field(b';')?.to_string();

    let (state, read) = decode_device_state(text, s.pos)?;
    s.pos += read;

    let state_value = optional(s.field(b';')?);
    let (checkin, stop) = s.take_until(b",");
    let last_checkin_ms = timestamp("last check-in", checkin)?;
    if stop.is_some() {
        s.bump();
    }

    let device = Device {
        id,
        type_id,
        device_type: registry.get(type_id),
        name,
        state,
        state_value,
        last_checkin_ms,
    };
    Ok((device, s.consumed()))
}

/// Decodes one history record starting just after its opening `#`.
///
/// The record runs to the next `#` (consumed) or the end of the buffer.
/// A record without an action-type field, or with an empty one, decodes
/// with `action_type` set to `None`.
pub fn decode_history_entry(
    text: &str,
    offset: usize,
) -> Result<(HistoryEntry, usize), ProtocolError> {
    let mut s = Scanner::new(text, offset, "history entry");

    let (record, stop) = s.take_until(b"#");
    if stop.is_some() {
        s.bump();
    }

    let mut fields = record.splitn(5, ';');
    let mut next = || fields.next().ok_or_else(|| s.unexpected_end());

    let timestamp_ms = timestamp("history timestamp", next()?)?;
    let device_id = next()?.to_string();
    let device_name = next()?.to_string();
    let action = next()?.to_string();
    let action_type = fields.next().and_then(optional);

    let entry = HistoryEntry {
        timestamp_ms,
        device_id,
        device_name,
        action,
        action_type,
    };
    Ok((entry, s.consumed()))
}

// ---------------------------------------------------------------------------
// Whole payloads
// ---------------------------------------------------------------------------

/// Strips the `[...]` that wraps list replies.
pub fn strip_list(payload: &str) -> Result<&str, ProtocolError> {
    payload
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| {
            ProtocolError::InvalidEnvelope(format!(
                "list reply is not wrapped in brackets: {payload:?}"
            ))
        })
}

/// Decodes a device-type listing and registers every type.
///
/// Types decoded before a malformed record stay registered.
pub fn decode_device_types(
    payload: &str,
    registry: &DeviceTypeRegistry,
) -> Result<Vec<Arc<DeviceType>>, ProtocolError> {
    let body = strip_list(payload)?;
    let mut types = Vec::new();
    let mut offset = 0;
    while offset < body.len() {
        let (device_type, read) = decode_device_type(body, offset)?;
        types.push(registry.insert(device_type));
        offset += read;
    }
    Ok(types)
}

/// Decodes a device listing.
pub fn decode_devices(
    payload: &str,
    registry: &DeviceTypeRegistry,
) -> Result<Vec<Device>, ProtocolError> {
    let body = strip_list(payload)?;
    let mut devices = Vec::new();
    let mut offset = 0;
    while offset < body.len() {
        let (device, read) = decode_device(body, offset, registry)?;
        devices.push(device);
        offset += read;
    }
    Ok(devices)
}

/// Decodes a `#rec#rec#...#` history listing.
pub fn decode_history(payload: &str) -> Result<Vec<HistoryEntry>, ProtocolError> {
    let bytes = payload.as_bytes();
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos + 1 < bytes.len() {
        if bytes[pos] == b'#' {
            let (entry, read) = decode_history_entry(payload, pos + 1)?;
            entries.push(entry);
            // Lands on the closing '#', which opens the next record.
            pos += read;
        } else {
            pos += 1;
        }
    }
    Ok(entries)
}

/// Decodes a user listing: `id*name;id#name;...`, where `*` marks an
/// administrator and `#` a regular user.
pub fn decode_users(payload: &str) -> Result<Vec<User>, ProtocolError> {
    payload
        .split(';')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let split = entry
                .find(['*', '#'])
                .ok_or(ProtocolError::UnexpectedEnd { record: "user" })?;
            let (id, rest) = entry.split_at(split);
            Ok(User {
                id: number("user id", id)?,
                username: rest[1..].to_string(),
                administrator: rest.starts_with('*'),
            })
        })
        .collect()
}

/// Decodes a history count reply.
pub fn decode_count(payload: &str) -> Result<u64, ProtocolError> {
    number("history count", payload)
}
