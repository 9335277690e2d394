//! Snapshot export use-cases.
//!
//! # Invariants
//! - Export never writes to the store.
//! - Metadata counts equal the cardinality of the arrays they describe,
//!   including after category suppression.

use crate::model::id_text;
use crate::model::kind::EntityKind;
use crate::model::now_epoch_ms;
use crate::model::snapshot::{ExportMetadata, ProjectExport, Snapshot, SNAPSHOT_SCHEMA_VERSION};
use crate::repo::EntityRepository;
use crate::store::KvStore;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Instant;

/// Author recorded when none is configured.
pub const DEFAULT_EXPORTED_BY: &str = "System Export";

/// Snapshot section that can be suppressed from an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportCategory {
    Protocols,
    ClinicalData,
    Manuscripts,
    StatisticalManifests,
    Personas,
    Templates,
    GlobalPersonas,
    GlobalTemplates,
}

impl ExportCategory {
    pub const ALL: [ExportCategory; 8] = [
        Self::Protocols,
        Self::ClinicalData,
        Self::Manuscripts,
        Self::StatisticalManifests,
        Self::Personas,
        Self::Templates,
        Self::GlobalPersonas,
        Self::GlobalTemplates,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Protocols => "protocols",
            Self::ClinicalData => "clinical-data",
            Self::Manuscripts => "manuscripts",
            Self::StatisticalManifests => "statistical-manifests",
            Self::Personas => "personas",
            Self::Templates => "templates",
            Self::GlobalPersonas => "global-personas",
            Self::GlobalTemplates => "global-templates",
        }
    }

    /// Per-project collection this category covers, if any.
    pub fn scoped_kind(self) -> Option<EntityKind> {
        match self {
            Self::Protocols => Some(EntityKind::Protocol),
            Self::ClinicalData => Some(EntityKind::ClinicalData),
            Self::Manuscripts => Some(EntityKind::Manuscript),
            Self::StatisticalManifests => Some(EntityKind::StatisticalManifest),
            Self::Personas => Some(EntityKind::Persona),
            Self::Templates => Some(EntityKind::Template),
            Self::GlobalPersonas | Self::GlobalTemplates => None,
        }
    }
}

impl Display for ExportCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("unknown export category `{value}`"))
    }
}

/// Export request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub description: Option<String>,
    /// Sections left out of the assembled snapshot.
    pub exclude: BTreeSet<ExportCategory>,
}

/// Assembles snapshots from repository state.
pub struct ExportService<'repo, S: KvStore> {
    repo: &'repo EntityRepository<S>,
    exported_by: String,
}

impl<'repo, S: KvStore> ExportService<'repo, S> {
    pub fn new(repo: &'repo EntityRepository<S>) -> Self {
        Self {
            repo,
            exported_by: DEFAULT_EXPORTED_BY.to_string(),
        }
    }

    /// Overrides the author written into `exportMetadata.exportedBy`.
    pub fn with_exported_by(mut self, exported_by: impl Into<String>) -> Self {
        self.exported_by = exported_by.into();
        self
    }

    /// Exports every project plus the global personas and templates.
    pub fn export_all(&self, description: Option<&str>) -> Snapshot {
        let started_at = Instant::now();
        let projects: Vec<ProjectExport> = self
            .repo
            .projects()
            .into_iter()
            .filter_map(|project| match id_text(project.get("id")) {
                Some(id) => Some(self.bundle(project, &id)),
                None => {
                    warn!("event=export_project module=export status=warn reason=missing_id");
                    None
                }
            })
            .collect();

        let mut snapshot = Snapshot {
            export_metadata: ExportMetadata {
                version: SNAPSHOT_SCHEMA_VERSION.to_string(),
                exported_at: now_epoch_ms(),
                exported_by: self.exported_by.clone(),
                application_version: env!("CARGO_PKG_VERSION").to_string(),
                description: description.map(str::to_string),
                total_projects: 0,
                total_protocols: 0,
                total_manuscripts: 0,
                total_clinical_records: 0,
            },
            projects,
            global_templates: Some(self.repo.get_all(EntityKind::Template, None)),
            global_personas: Some(self.repo.get_all(EntityKind::Persona, None)),
        };
        snapshot.recount();

        info!(
            "event=export_all module=export status=ok projects={} protocols={} manuscripts={} clinical_records={} duration_ms={}",
            snapshot.export_metadata.total_projects,
            snapshot.export_metadata.total_protocols,
            snapshot.export_metadata.total_manuscripts,
            snapshot.export_metadata.total_clinical_records,
            started_at.elapsed().as_millis()
        );
        snapshot
    }

    /// Exports everything, then drops the excluded sections.
    pub fn export_with(&self, options: &ExportOptions) -> Snapshot {
        let mut snapshot = self.export_all(options.description.as_deref());
        apply_exclusions(&mut snapshot, &options.exclude);
        snapshot
    }

    /// Exports one project bundle; `None` when the project is unknown.
    pub fn export_project(&self, project_id: &str) -> Option<ProjectExport> {
        let project = self
            .repo
            .projects()
            .into_iter()
            .find(|project| id_text(project.get("id")).as_deref() == Some(project_id))?;
        Some(self.bundle(project, project_id))
    }

    fn bundle(&self, project: serde_json::Value, project_id: &str) -> ProjectExport {
        let mut bundle = ProjectExport::new(project);
        for kind in EntityKind::SCOPED {
            if let Some(records) = bundle.records_mut(kind) {
                *records = self.repo.get_all(kind, Some(project_id));
            }
        }
        bundle
    }
}

/// Omits excluded sections and recomputes metadata counts.
///
/// Omitted sections are absent from the document rather than empty, so a
/// later replace import keeps what the store holds for them.
pub fn apply_exclusions(snapshot: &mut Snapshot, exclude: &BTreeSet<ExportCategory>) {
    for category in exclude {
        match category.scoped_kind() {
            Some(kind) => {
                for bundle in &mut snapshot.projects {
                    bundle.omit(kind);
                }
            }
            None if *category == ExportCategory::GlobalPersonas => snapshot.global_personas = None,
            None => snapshot.global_templates = None,
        }
    }
    snapshot.recount();
}

/// Serializes a snapshot; pretty-printed output is the default format.
pub fn to_json(snapshot: &Snapshot, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(snapshot)
    } else {
        serde_json::to_string(snapshot)
    }
}
