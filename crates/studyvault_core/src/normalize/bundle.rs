//! Project bundle reconstruction.
//!
//! Snapshot entries come in two forms: the nested `{project, protocols, ...}`
//! bundle, and a flat form where project fields are hoisted next to the
//! collections (`{id, projectName, protocols, ...}`). A `project` key marks
//! the nested form.

use super::{json_type_name, optional_array, synthetic_id, text_field};
use super::{NormalizationError, NormalizationResult};
use crate::model::kind::EntityKind;
use crate::model::project::{project_display_name, ProjectStatus};
use crate::model::snapshot::ProjectExport;
use crate::model::id_text;
use serde_json::{json, Value};
use std::collections::BTreeSet;

const PROJECT_ID_PREFIX: &str = "project";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleShape {
    Nested,
    Flat,
}

/// Detects the entry form.
pub fn bundle_shape(entry: &Value) -> BundleShape {
    match entry.get("project") {
        Some(value) if !value.is_null() => BundleShape::Nested,
        _ => BundleShape::Flat,
    }
}

/// Parses one snapshot entry into a bundle without touching the store.
pub fn parse_project_entry(entry: &Value) -> NormalizationResult<ProjectExport> {
    if !entry.is_object() {
        return Err(NormalizationError::NotAnObject {
            found: json_type_name(entry),
        });
    }

    let mut bundle = match bundle_shape(entry) {
        BundleShape::Nested => {
            let project = &entry["project"];
            if !project.is_object() {
                return Err(NormalizationError::invalid_field("project", "an object", project));
            }
            ProjectExport::new(project.clone())
        }
        BundleShape::Flat => ProjectExport::new(flat_project(entry)),
    };

    for kind in EntityKind::SCOPED {
        let field = kind.snapshot_field();
        let mut records = optional_array(entry, field)?;
        if kind == EntityKind::StatisticalManifest && records.is_empty() {
            if let Some(single) = entry.get("statisticalManifest").filter(|value| !value.is_null()) {
                records.push(single.clone());
            }
        }
        if let Some(target) = bundle.records_mut(kind) {
            *target = records;
        }
    }
    Ok(bundle)
}

/// Scoped collections the entry actually carries, `null` counting as absent.
pub fn present_kinds(entry: &Value) -> BTreeSet<EntityKind> {
    let is_set = |field: &str| entry.get(field).is_some_and(|value| !value.is_null());
    let mut kinds: BTreeSet<EntityKind> = EntityKind::SCOPED
        .into_iter()
        .filter(|kind| is_set(kind.snapshot_field()))
        .collect();
    if is_set("statisticalManifest") {
        kinds.insert(EntityKind::StatisticalManifest);
    }
    kinds
}

/// Best-effort label for error messages.
pub fn bundle_display_name(entry: &Value) -> String {
    match entry.get("project").filter(|project| project.is_object()) {
        Some(project) => project_display_name(project),
        None => text_field(entry, "projectName")
            .or_else(|| text_field(entry, "name"))
            .unwrap_or("Unknown")
            .to_string(),
    }
}

/// Rebuilds the project record of a flat entry.
///
/// Timestamps are copied only when the entry carries them; the importer
/// fills the rest against the stored project.
fn flat_project(entry: &Value) -> Value {
    let text_or = |field: &str, fallback: &str| -> String {
        text_field(entry, field).unwrap_or(fallback).to_string()
    };

    let mut project = json!({
        "id": id_text(entry.get("id")).unwrap_or_else(|| synthetic_id(PROJECT_ID_PREFIX, entry)),
        "name": text_field(entry, "projectName")
            .or_else(|| text_field(entry, "name"))
            .unwrap_or("Imported Project"),
        "description": text_or("description", ""),
        "studyDesign": text_or("studyDesign", "RCT"),
        "primaryInvestigator": text_or("primaryInvestigator", "Unknown"),
        "institution": text_or("institution", ""),
        "phase": text_or("phase", ""),
        "therapeuticArea": text_or("therapeuticArea", ""),
        "status": ProjectStatus::default(),
    });
    for field in ["createdAt", "modifiedAt"] {
        if let Some(stamp) = text_field(entry, field) {
            project[field] = Value::String(stamp.to_string());
        }
    }
    project
}
