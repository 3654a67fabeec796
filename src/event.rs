//! Event records
//!
//! An event is an arbitrary JSON object produced upstream. The relay treats it
//! as opaque, apart from the two fields it injects on receipt:
//!
//! - `source_address`: IP address of the datagram sender
//! - `received_at_ms`: receive time in Unix epoch milliseconds
//!
//! Key order is preserved, so injected fields land after the producer's own
//! keys. If the producer already sent one of these keys, its value is
//! overwritten in place.
//!
//! After augmentation the record is serialized exactly once into a
//! [`SharedEvent`]. Cloning a `SharedEvent` only bumps a reference count, so
//! every subscriber queue holds the same allocation.

use std::net::IpAddr;

use serde_json::{Map, Value};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};

/// Field holding the sender's IP address
pub const SOURCE_ADDRESS_FIELD: &str = "source_address";

/// Field holding the receive timestamp (epoch milliseconds)
pub const RECEIVED_AT_FIELD: &str = "received_at_ms";

/// An ordered, string-keyed event record
pub type Record = Map<String, Value>;

/// Why a datagram could not be turned into an event
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Payload is not valid JSON (includes truncated payloads and bad UTF-8)
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is valid JSON but not an object
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// Payload exceeds the configured datagram limit
    #[error("payload size {size} exceeds limit {limit}")]
    Oversized { size: usize, limit: usize },
}

/// Decode one datagram payload into a record
pub fn decode(payload: &[u8], limit: usize) -> Result<Record, DecodeError> {
    if payload.len() > limit {
        return Err(DecodeError::Oversized {
            size: payload.len(),
            limit,
        });
    }

    match serde_json::from_slice::<Value>(payload)? {
        Value::Object(record) => Ok(record),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Inject the relay's metadata fields into a record
pub fn augment(record: &mut Record, source: IpAddr, received_at_ms: i64) {
    record.insert(
        SOURCE_ADDRESS_FIELD.to_string(),
        Value::String(source.to_canonical().to_string()),
    );
    record.insert(RECEIVED_AT_FIELD.to_string(), Value::from(received_at_ms));
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A serialized, immutable event shared across subscriber queues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedEvent(Utf8Bytes);

impl SharedEvent {
    /// Serialize a record into its canonical text form
    pub fn from_record(record: &Record) -> Result<Self, DecodeError> {
        let text = serde_json::to_string(record)?;
        Ok(Self(Utf8Bytes::from(text)))
    }

    /// Decode, augment and serialize a datagram in one step
    pub fn from_datagram(
        payload: &[u8],
        limit: usize,
        source: IpAddr,
        received_at_ms: i64,
    ) -> Result<Self, DecodeError> {
        let mut record = decode(payload, limit)?;
        augment(&mut record, source, received_at_ms);
        Self::from_record(&record)
    }

    /// The serialized text
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Serialized length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the serialized form is empty (never true for decoded events)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build a WebSocket text frame without copying the payload
    pub(crate) fn to_message(&self) -> Message {
        Message::Text(self.0.clone())
    }
}

impl std::fmt::Display for SharedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
