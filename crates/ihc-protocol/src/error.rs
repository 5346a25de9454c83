//! Error types for the protocol layer.
//!
//! Each crate in the workspace defines its own error enum. A
//! `ProtocolError` always means a payload did not match the record
//! grammar the server is expected to speak; it never means the network
//! failed.

/// Errors that can occur while decoding server payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The buffer ended before a record's required field terminator.
    ///
    /// `record` names the record kind being decoded ("device", "history
    /// entry", ...) so log lines point at the offending grammar rule.
    #[error("unexpected end of {record} record")]
    UnexpectedEnd {
        /// The record kind being decoded.
        record: &'static str,
    },

    /// A numeric field could not be parsed.
    #[error("invalid number in field {field}: {value:?}")]
    InvalidNumber {
        /// The field that held the bad value.
        field: &'static str,
        /// The raw text of the field.
        value: String,
    },

    /// The payload's outer shape is wrong, e.g. a list reply that is not
    /// wrapped in `[...]`.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The payload is not valid UTF-8 text.
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}
