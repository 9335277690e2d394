//! Portable snapshot document.
//!
//! # Invariants
//! - `exportMetadata` counts always equal the cardinality of the arrays they
//!   describe; `recount` restores this after any filtering.
//! - Records inside bundles are stored JSON objects passed through verbatim.
//! - A collection set to `None` is omitted from the document; importers
//!   leave the stored collection alone, while `[]` empties it.

use super::kind::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version written into every snapshot.
pub const SNAPSHOT_SCHEMA_VERSION: &str = "1.0.0";

/// Complete portable export of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub export_metadata: ExportMetadata,
    pub projects: Vec<ProjectExport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_templates: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_personas: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub version: String,
    /// Unix epoch milliseconds.
    pub exported_at: i64,
    pub exported_by: String,
    pub application_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub total_projects: usize,
    pub total_protocols: usize,
    pub total_manuscripts: usize,
    pub total_clinical_records: usize,
}

/// One project and its nested collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectExport {
    pub project: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocols: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_data: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manuscripts: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistical_manifests: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personas: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<Vec<Value>>,
}

impl ProjectExport {
    /// Creates a bundle with empty collections.
    pub fn new(project: Value) -> Self {
        Self {
            project,
            protocols: Some(Vec::new()),
            clinical_data: Some(Vec::new()),
            manuscripts: Some(Vec::new()),
            statistical_manifests: Some(Vec::new()),
            personas: Some(Vec::new()),
            templates: Some(Vec::new()),
        }
    }

    fn slot(&self, kind: EntityKind) -> Option<&Option<Vec<Value>>> {
        match kind {
            EntityKind::Project => None,
            EntityKind::Protocol => Some(&self.protocols),
            EntityKind::ClinicalData => Some(&self.clinical_data),
            EntityKind::Manuscript => Some(&self.manuscripts),
            EntityKind::StatisticalManifest => Some(&self.statistical_manifests),
            EntityKind::Persona => Some(&self.personas),
            EntityKind::Template => Some(&self.templates),
        }
    }

    fn slot_mut(&mut self, kind: EntityKind) -> Option<&mut Option<Vec<Value>>> {
        match kind {
            EntityKind::Project => None,
            EntityKind::Protocol => Some(&mut self.protocols),
            EntityKind::ClinicalData => Some(&mut self.clinical_data),
            EntityKind::Manuscript => Some(&mut self.manuscripts),
            EntityKind::StatisticalManifest => Some(&mut self.statistical_manifests),
            EntityKind::Persona => Some(&mut self.personas),
            EntityKind::Template => Some(&mut self.templates),
        }
    }

    /// Records of one scoped kind. `Project` and omitted collections yield
    /// an empty slice.
    pub fn records(&self, kind: EntityKind) -> &[Value] {
        self.slot(kind)
            .and_then(Option::as_deref)
            .unwrap_or(&[])
    }

    /// Mutable access to one scoped collection, restoring an omitted one as
    /// empty; `None` for `Project`.
    pub fn records_mut(&mut self, kind: EntityKind) -> Option<&mut Vec<Value>> {
        self.slot_mut(kind)
            .map(|slot| slot.get_or_insert_with(Vec::new))
    }

    /// Whether the collection is part of the document.
    pub fn carries(&self, kind: EntityKind) -> bool {
        self.slot(kind).is_some_and(Option::is_some)
    }

    /// Drops a collection from the document.
    pub fn omit(&mut self, kind: EntityKind) {
        if let Some(slot) = self.slot_mut(kind) {
            *slot = None;
        }
    }
}

impl Snapshot {
    /// Total records of one scoped kind across all project bundles.
    pub fn total(&self, kind: EntityKind) -> usize {
        self.projects
            .iter()
            .map(|bundle| bundle.records(kind).len())
            .sum()
    }

    /// Recomputes metadata counts from the arrays.
    pub fn recount(&mut self) {
        self.export_metadata.total_projects = self.projects.len();
        self.export_metadata.total_protocols = self.total(EntityKind::Protocol);
        self.export_metadata.total_manuscripts = self.total(EntityKind::Manuscript);
        self.export_metadata.total_clinical_records = self.total(EntityKind::ClinicalData);
    }

    /// Metadata counts agree with array cardinalities.
    pub fn counts_consistent(&self) -> bool {
        let metadata = &self.export_metadata;
        metadata.total_projects == self.projects.len()
            && metadata.total_protocols == self.total(EntityKind::Protocol)
            && metadata.total_manuscripts == self.total(EntityKind::Manuscript)
            && metadata.total_clinical_records == self.total(EntityKind::ClinicalData)
    }
}
