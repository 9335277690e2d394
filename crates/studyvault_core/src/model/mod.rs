//! Domain model for the study data store.
//!
//! # Responsibility
//! - Name the entity kinds stored per project and their primary keys.
//! - Define the portable snapshot document and typed canonical shapes.
//!
//! # Invariants
//! - Stored records stay untyped JSON objects; typed structs are only used
//!   where a shape is produced (snapshots, synthesized projects, canonical
//!   manuscript sections), so unknown fields survive every round trip.
//! - Every non-global record belongs to exactly one project, folded into
//!   its storage key.

pub mod kind;
pub mod manuscript;
pub mod project;
pub mod protocol;
pub mod snapshot;

use serde_json::Value;

/// Returns the textual form of an identifier-like field.
///
/// Strings are returned trimmed; numbers are stringified; empty strings,
/// `null` and other JSON types yield `None`.
pub fn id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Millisecond Unix timestamp for generated metadata.
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// RFC 3339 timestamp for generated metadata.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
