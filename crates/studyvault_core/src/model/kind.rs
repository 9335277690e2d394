//! Entity kinds and primary-key extraction.

use super::id_text;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// Every collection kind the store holds.
///
/// Declaration order is the fixed processing order used by import and
/// migration: projects first, templates last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Protocol,
    ClinicalData,
    Manuscript,
    StatisticalManifest,
    Persona,
    Template,
}

impl EntityKind {
    /// All kinds, in processing order.
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Project,
        EntityKind::Protocol,
        EntityKind::ClinicalData,
        EntityKind::Manuscript,
        EntityKind::StatisticalManifest,
        EntityKind::Persona,
        EntityKind::Template,
    ];

    /// Kinds stored per project, in processing order.
    pub const SCOPED: [EntityKind; 6] = [
        EntityKind::Protocol,
        EntityKind::ClinicalData,
        EntityKind::Manuscript,
        EntityKind::StatisticalManifest,
        EntityKind::Persona,
        EntityKind::Template,
    ];

    /// Resource segment used in storage keys.
    pub fn resource_name(self) -> &'static str {
        match self {
            Self::Project => "projects",
            Self::Protocol => "protocols",
            Self::ClinicalData => "clinical_data",
            Self::Manuscript => "manuscripts",
            Self::StatisticalManifest => "statistical_manifests",
            Self::Persona => "personas",
            Self::Template => "schema_templates",
        }
    }

    /// Snapshot field holding this kind inside a project bundle.
    pub fn snapshot_field(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Protocol => "protocols",
            Self::ClinicalData => "clinicalData",
            Self::Manuscript => "manuscripts",
            Self::StatisticalManifest => "statisticalManifests",
            Self::Persona => "personas",
            Self::Template => "templates",
        }
    }

    /// Extracts the merge key of one record of this kind.
    ///
    /// Records without a usable key fall back to their compact JSON text, so
    /// re-importing an identical keyless record never duplicates it.
    pub fn primary_key(self, record: &Value) -> RecordKey {
        let key = match self {
            Self::ClinicalData => clinical_record_key(record),
            Self::StatisticalManifest => manifest_key(record),
            _ => id_text(record.get("id")).map(RecordKey::Id),
        };
        key.unwrap_or_else(|| RecordKey::Content(record.to_string()))
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Project => "project",
            Self::Protocol => "protocol",
            Self::ClinicalData => "clinical data",
            Self::Manuscript => "manuscript",
            Self::StatisticalManifest => "statistical manifest",
            Self::Persona => "persona",
            Self::Template => "schema template",
        };
        f.write_str(label)
    }
}

/// Identity used to match incoming records against stored ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    Id(String),
    Composite(Vec<String>),
    Content(String),
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => f.write_str(id),
            Self::Composite(parts) => f.write_str(&parts.join("/")),
            Self::Content(_) => f.write_str("<unkeyed record>"),
        }
    }
}

fn clinical_record_key(record: &Value) -> Option<RecordKey> {
    match id_text(record.get("subjectId")) {
        Some(subject_id) => Some(RecordKey::Composite(vec![
            subject_id,
            id_text(record.get("visitNumber")).unwrap_or_else(|| "baseline".to_string()),
            id_text(record.get("protocolNumber")).unwrap_or_default(),
            id_text(record.get("protocolVersion")).unwrap_or_default(),
        ])),
        None => id_text(record.get("recordId")).map(RecordKey::Id),
    }
}

fn manifest_key(record: &Value) -> Option<RecordKey> {
    let metadata = record.get("manifestMetadata")?;
    let protocol_id = id_text(metadata.get("protocolId"))?;
    Some(RecordKey::Composite(vec![
        protocol_id,
        id_text(metadata.get("protocolVersion")).unwrap_or_default(),
    ]))
}
