//! Statistical manifest validation.
//!
//! No legacy shape exists for this kind: records either carry a
//! `manifestMetadata` object or are dropped by the importer.

use super::{json_type_name, NormalizationError, NormalizationResult};
use serde_json::Value;

pub const MANIFEST_METADATA_FIELD: &str = "manifestMetadata";

/// Accepts only objects with a `manifestMetadata` object.
pub fn validate_statistical_manifest(record: &Value) -> NormalizationResult<()> {
    if !record.is_object() {
        return Err(NormalizationError::NotAnObject {
            found: json_type_name(record),
        });
    }
    match record.get(MANIFEST_METADATA_FIELD) {
        None | Some(Value::Null) => Err(NormalizationError::MissingField(MANIFEST_METADATA_FIELD)),
        Some(Value::Object(_)) => Ok(()),
        Some(other) => Err(NormalizationError::invalid_field(
            MANIFEST_METADATA_FIELD,
            "an object",
            other,
        )),
    }
}
