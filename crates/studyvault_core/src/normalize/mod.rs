//! Shape detection and coercion of incoming records.
//!
//! # Responsibility
//! - Classify historical record shapes with pure functions.
//! - Convert every known shape into the canonical stored shape.
//! - Reconstruct project bundles from the nested or the flat snapshot form.
//!
//! # Invariants
//! - Normalizers never touch the store.
//! - Fallback values are produced only by the explicit `*_or_placeholder`
//!   entry points; the strict functions return `NormalizationError`.
//! - Synthetic ids are derived from record content, so normalizing the same
//!   input twice yields the same id.

pub mod bundle;
pub mod manuscript;
pub mod statistical;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub use bundle::{
    bundle_display_name, bundle_shape, parse_project_entry, present_kinds, BundleShape,
};
pub use manuscript::{
    classify_manuscript, normalize_manuscript, normalize_manuscript_or_placeholder,
    ManuscriptOutcome, ManuscriptShape,
};
pub use statistical::validate_statistical_manifest;

pub type NormalizationResult<T> = Result<T, NormalizationError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("expected a JSON object, found {found}")]
    NotAnObject { found: &'static str },
    #[error("field `{field}` must be {expected}, found {found}")]
    InvalidField {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("required field `{0}` is missing")]
    MissingField(&'static str),
}

impl NormalizationError {
    pub(crate) fn invalid_field(field: impl Into<String>, expected: &'static str, value: &Value) -> Self {
        Self::InvalidField {
            field: field.into(),
            expected,
            found: json_type_name(value),
        }
    }
}

/// JSON type label used in diagnostics.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Deterministic id `{prefix}-{uuid}` derived from the record's JSON text.
pub fn synthetic_id(prefix: &str, source: &Value) -> String {
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, source.to_string().as_bytes());
    format!("{prefix}-{digest}")
}

/// Reads an optional array field; absent and `null` read as empty.
pub(crate) fn optional_array(record: &Value, field: &str) -> NormalizationResult<Vec<Value>> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => Err(NormalizationError::invalid_field(field, "an array", other)),
    }
}

/// Non-empty string field, if present.
pub(crate) fn text_field<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}
