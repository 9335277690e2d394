//! Protocol and protocol-version helpers over untyped records.
//!
//! # Invariants
//! - A protocol is identified by `id`; `protocolNumber` is unique per project.
//! - A version is identified by `versionId`, falling back to `id`.
//! - Once a version is `locked`, its `schemaBlocks` never change and the
//!   version cannot be removed from its protocol.

use super::id_text;
use serde_json::Value;
use std::collections::BTreeSet;

/// Identity of one protocol version.
pub fn version_key(version: &Value) -> Option<String> {
    id_text(version.get("versionId")).or_else(|| id_text(version.get("id")))
}

pub fn is_locked(version: &Value) -> bool {
    version.get("locked").and_then(Value::as_bool) == Some(true)
}

pub fn protocol_number(protocol: &Value) -> Option<String> {
    id_text(protocol.get("protocolNumber"))
}

/// Version keys that occur more than once inside one protocol.
pub fn duplicate_version_keys(protocol: &Value) -> Vec<String> {
    let Some(versions) = protocol.get("versions").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    for key in versions.iter().filter_map(version_key) {
        if !seen.insert(key.clone()) {
            duplicates.insert(key);
        }
    }
    duplicates.into_iter().collect()
}

/// Carries locked versions of `existing` over into `incoming`.
///
/// Returns one warning per correction applied. `incoming` is left alone when
/// either side is not a JSON object.
pub fn enforce_version_locks(existing: &Value, incoming: &mut Value) -> Vec<String> {
    let mut warnings = Vec::new();
    let Some(existing_versions) = existing.get("versions").and_then(Value::as_array) else {
        return warnings;
    };
    let protocol_label = id_text(existing.get("id")).unwrap_or_else(|| "<unknown>".to_string());
    let Some(incoming_object) = incoming.as_object_mut() else {
        return warnings;
    };

    let versions = incoming_object
        .entry("versions")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !versions.is_array() {
        *versions = Value::Array(Vec::new());
    }
    let Some(incoming_versions) = versions.as_array_mut() else {
        return warnings;
    };

    for locked in existing_versions.iter().filter(|version| is_locked(version)) {
        let Some(key) = version_key(locked) else {
            continue;
        };

        let position = incoming_versions
            .iter()
            .position(|version| version_key(version).as_deref() == Some(key.as_str()));
        let Some(position) = position else {
            incoming_versions.push(locked.clone());
            warnings.push(format!(
                "protocol {protocol_label}: locked version {key} cannot be removed; kept stored copy"
            ));
            continue;
        };

        let Some(target) = incoming_versions[position].as_object_mut() else {
            incoming_versions[position] = locked.clone();
            warnings.push(format!(
                "protocol {protocol_label}: locked version {key} replaced by malformed data; kept stored copy"
            ));
            continue;
        };

        let stored_blocks = locked.get("schemaBlocks").cloned().unwrap_or(Value::Null);
        if target.get("schemaBlocks").unwrap_or(&Value::Null) != &stored_blocks {
            target.insert("schemaBlocks".to_string(), stored_blocks);
            warnings.push(format!(
                "protocol {protocol_label}: schema blocks of locked version {key} are immutable; kept stored blocks"
            ));
        }

        if target.get("locked").and_then(Value::as_bool) != Some(true) {
            target.insert("locked".to_string(), Value::Bool(true));
            for field in ["lockedAt", "lockedBy"] {
                if let Some(value) = locked.get(field) {
                    target.insert(field.to_string(), value.clone());
                }
            }
            warnings.push(format!(
                "protocol {protocol_label}: version {key} is locked and cannot be unlocked by import"
            ));
        }
    }

    warnings
}
