//! Snapshot import and reconciliation.
//!
//! # Responsibility
//! - Parse and structurally validate snapshot input.
//! - Route every project bundle through normalization, validation and the
//!   configured merge mode, then write it back through the repository.
//!
//! # Invariants
//! - Import entry points never return `Err`; every failure is folded into
//!   `ImportResult`.
//! - Parse and structure errors abort before any write.
//! - A failing project is recorded and its siblings are still imported.
//! - `success` is `true` only when no error was recorded for any project.
//! - Kinds are processed in the fixed order projects, protocols, clinical
//!   data, manuscripts, statistical manifests, personas, templates; the
//!   global personas and templates follow the last project.

use crate::model::id_text;
use crate::model::kind::EntityKind;
use crate::model::project::stamp_missing_timestamps;
use crate::model::snapshot::{ProjectExport, Snapshot};
use crate::normalize::{
    bundle_display_name, bundle_shape, normalize_manuscript_or_placeholder, parse_project_entry,
    present_kinds, validate_statistical_manifest, BundleShape, NormalizationError,
};
use crate::repo::{EntityRepository, RepoError};
use crate::service::backup::{read_backup, write_backup};
use crate::service::export_service::DEFAULT_EXPORTED_BY;
use crate::service::merge::{merge_records, protect_locked_versions, MergeMode};
use crate::service::validate::validate_bundle;
use crate::store::KvStore;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use thiserror::Error;

/// Import behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportOptions {
    pub merge_mode: MergeMode,
    /// Reject malformed bundles and report referential warnings.
    pub validate_data: bool,
    /// Store a snapshot of the current state before the first write.
    pub backup_first: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            merge_mode: MergeMode::Update,
            validate_data: true,
            backup_first: false,
        }
    }
}

impl ImportOptions {
    pub fn with_mode(merge_mode: MergeMode) -> Self {
        Self {
            merge_mode,
            ..Self::default()
        }
    }
}

/// Incoming records written per kind; skipped records are not counted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCounts {
    pub projects: usize,
    pub protocols: usize,
    pub clinical_data: usize,
    pub manuscripts: usize,
    pub statistical_manifests: usize,
    pub personas: usize,
    pub templates: usize,
    pub global_personas: usize,
    pub global_templates: usize,
}

impl ImportCounts {
    fn add_scoped(&mut self, kind: EntityKind, written: usize) {
        let slot = match kind {
            EntityKind::Project => &mut self.projects,
            EntityKind::Protocol => &mut self.protocols,
            EntityKind::ClinicalData => &mut self.clinical_data,
            EntityKind::Manuscript => &mut self.manuscripts,
            EntityKind::StatisticalManifest => &mut self.statistical_manifests,
            EntityKind::Persona => &mut self.personas,
            EntityKind::Template => &mut self.templates,
        };
        *slot += written;
    }

    fn add_global(&mut self, kind: EntityKind, written: usize) {
        match kind {
            EntityKind::Persona => self.global_personas += written,
            EntityKind::Template => self.global_templates += written,
            _ => {}
        }
    }
}

/// Structured outcome of one import call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub counts: ImportCounts,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ImportResult {
    fn aborted(message: String) -> Self {
        Self {
            success: false,
            errors: vec![message],
            ..Self::default()
        }
    }
}

/// Failure of one project bundle.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid bundle: {0}")]
    Bundle(#[from] NormalizationError),
    #[error("project has no id")]
    MissingProjectId,
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub type ImportOutcome<T> = Result<T, ImportError>;

/// Imports snapshots into the repository.
pub struct ImportService<'repo, S: KvStore> {
    repo: &'repo EntityRepository<S>,
    exported_by: String,
}

impl<'repo, S: KvStore> ImportService<'repo, S> {
    pub fn new(repo: &'repo EntityRepository<S>) -> Self {
        Self {
            repo,
            exported_by: DEFAULT_EXPORTED_BY.to_string(),
        }
    }

    /// Author recorded in pre-import backups.
    pub fn with_exported_by(mut self, exported_by: impl Into<String>) -> Self {
        self.exported_by = exported_by.into();
        self
    }

    /// Imports raw JSON text. Parse failures become a failed result.
    pub fn import_json(&self, json: &str, options: ImportOptions) -> ImportResult {
        match serde_json::from_str::<Value>(json) {
            Ok(value) => self.import_value(&value, options),
            Err(err) => {
                warn!(
                    "event=import module=import status=error stage=parse error={}",
                    err
                );
                ImportResult::aborted(format!("Failed to parse JSON: {err}"))
            }
        }
    }

    /// Imports an already-typed snapshot.
    pub fn import_snapshot(&self, snapshot: &Snapshot, options: ImportOptions) -> ImportResult {
        match serde_json::to_value(snapshot) {
            Ok(value) => self.import_value(&value, options),
            Err(err) => ImportResult::aborted(format!("Failed to serialize snapshot: {err}")),
        }
    }

    /// Imports a parsed JSON document in either bundle shape.
    pub fn import_value(&self, input: &Value, options: ImportOptions) -> ImportResult {
        let started_at = Instant::now();
        let entries = match check_structure(input) {
            Ok(entries) => entries,
            Err(message) => {
                warn!(
                    "event=import module=import status=error stage=structure error={}",
                    message
                );
                return ImportResult::aborted(message);
            }
        };
        info!(
            "event=import module=import status=start mode={} projects={} validate={} backup={}",
            options.merge_mode,
            entries.len(),
            options.validate_data,
            options.backup_first
        );

        if options.backup_first {
            if let Err(err) = write_backup(self.repo, &self.exported_by) {
                error!(
                    "event=import_backup module=import status=error error={}",
                    err
                );
                return ImportResult::aborted(format!("Backup failed, import aborted: {err}"));
            }
        }

        let mut result = ImportResult::default();
        let stored_projects = self.repo.projects();
        let mut projects = match options.merge_mode {
            MergeMode::Replace => Vec::new(),
            MergeMode::Update | MergeMode::Skip => stored_projects.clone(),
        };

        for entry in entries {
            let imported =
                self.import_entry(entry, options, &stored_projects, &mut projects, &mut result);
            if let Err(err) = imported {
                let name = bundle_display_name(entry);
                warn!(
                    "event=import_project module=import status=error error={}",
                    err
                );
                result
                    .errors
                    .push(format!("Failed to import project {name}: {err}"));
                if options.merge_mode == MergeMode::Replace {
                    keep_stored_project(entry, &stored_projects, &mut projects);
                }
            }
        }
        if options.merge_mode == MergeMode::Replace {
            self.repo.save(EntityKind::Project, &projects, None);
        }

        for (kind, field) in [
            (EntityKind::Persona, "globalPersonas"),
            (EntityKind::Template, "globalTemplates"),
        ] {
            self.import_global(input, kind, field, options.merge_mode, &mut result);
        }

        result.success = result.errors.is_empty();
        info!(
            "event=import module=import status={} mode={} projects={} errors={} warnings={} duration_ms={}",
            if result.success { "ok" } else { "error" },
            options.merge_mode,
            result.counts.projects,
            result.errors.len(),
            result.warnings.len(),
            started_at.elapsed().as_millis()
        );
        result
    }

    /// Re-imports the latest pre-import backup.
    pub fn restore_backup(&self, merge_mode: MergeMode) -> ImportResult {
        match read_backup(self.repo) {
            Ok(Some(payload)) => self.import_json(&payload, ImportOptions::with_mode(merge_mode)),
            Ok(None) => ImportResult::aborted("No import backup found".to_string()),
            Err(err) => ImportResult::aborted(format!("Failed to read import backup: {err}")),
        }
    }

    fn import_entry(
        &self,
        entry: &Value,
        options: ImportOptions,
        stored_projects: &[Value],
        projects: &mut Vec<Value>,
        result: &mut ImportResult,
    ) -> ImportOutcome<()> {
        let mut bundle = parse_project_entry(entry)?;
        let present = present_kinds(entry);
        let project_id = id_text(bundle.project.get("id")).ok_or(ImportError::MissingProjectId)?;
        let name = bundle_display_name(entry);
        let mode = options.merge_mode;

        let existing_protocols = self.repo.get_all(EntityKind::Protocol, Some(project_id.as_str()));
        if options.validate_data {
            let report = validate_bundle(&bundle, &existing_protocols);
            if !report.is_valid() {
                return Err(ImportError::Validation(report.errors));
            }
            result
                .warnings
                .extend(report.warnings.into_iter().map(|w| format!("{name}: {w}")));
        }

        let position = projects
            .iter()
            .position(|project| has_id(project, &project_id));
        if bundle_shape(entry) == BundleShape::Flat {
            let stored = position
                .map(|position| &projects[position])
                .or_else(|| find_project(stored_projects, &project_id));
            stamp_missing_timestamps(&mut bundle.project, stored);
        }
        match (position, mode) {
            (Some(_), MergeMode::Skip) => {
                result
                    .warnings
                    .push(format!("Skipped existing project {name}"));
                info!(
                    "event=import_project module=import status=skip reason=exists"
                );
                return Ok(());
            }
            (Some(position), _) => projects[position] = bundle.project.clone(),
            (None, _) => projects.push(bundle.project.clone()),
        }
        self.repo.save(EntityKind::Project, projects, None);
        result.counts.projects += 1;

        prepare_records(&mut bundle, &existing_protocols, mode, &name, result);

        for kind in EntityKind::SCOPED {
            let incoming = bundle.records(kind);
            if mode == MergeMode::Replace && !present.contains(&kind) {
                continue;
            }
            let fetched;
            let existing: &[Value] = if kind == EntityKind::Protocol {
                &existing_protocols
            } else {
                fetched = self.repo.get_all(kind, Some(project_id.as_str()));
                &fetched
            };
            let outcome = merge_records(existing, incoming, mode, kind);
            if mode == MergeMode::Replace || outcome.written() > 0 {
                self.repo.save(kind, &outcome.records, Some(project_id.as_str()));
            }
            result.counts.add_scoped(kind, outcome.written());
        }

        info!(
            "event=import_project module=import status=ok mode={} protocols={} manuscripts={}",
            mode,
            bundle.records(EntityKind::Protocol).len(),
            bundle.records(EntityKind::Manuscript).len()
        );
        Ok(())
    }

    fn import_global(
        &self,
        input: &Value,
        kind: EntityKind,
        field: &str,
        mode: MergeMode,
        result: &mut ImportResult,
    ) {
        let incoming = match input.get(field) {
            None | Some(Value::Null) => return,
            Some(Value::Array(records)) => records,
            Some(_) => {
                result
                    .warnings
                    .push(format!("{field} is not an array; ignored"));
                return;
            }
        };
        let existing = self.repo.get_all(kind, None);
        let outcome = merge_records(&existing, incoming, mode, kind);
        if mode == MergeMode::Replace || outcome.written() > 0 {
            self.repo.save(kind, &outcome.records, None);
        }
        result.counts.add_global(kind, outcome.written());
    }
}

fn has_id(project: &Value, id: &str) -> bool {
    id_text(project.get("id")).as_deref() == Some(id)
}

fn find_project<'a>(projects: &'a [Value], id: &str) -> Option<&'a Value> {
    projects.iter().find(|project| has_id(project, id))
}

/// Carries a stored project over a failed entry so a replace import never
/// orphans its collections.
fn keep_stored_project(entry: &Value, stored_projects: &[Value], projects: &mut Vec<Value>) {
    let id = match bundle_shape(entry) {
        BundleShape::Nested => id_text(entry.pointer("/project/id")),
        BundleShape::Flat => id_text(entry.get("id")),
    };
    let Some(id) = id else {
        return;
    };
    if find_project(projects, &id).is_some() {
        return;
    }
    if let Some(stored) = find_project(stored_projects, &id) {
        warn!("event=import_project module=import status=warn reason=kept_stored_project");
        projects.push(stored.clone());
    }
}

/// Applies per-record coercions before merging.
fn prepare_records(
    bundle: &mut ProjectExport,
    existing_protocols: &[Value],
    mode: MergeMode,
    name: &str,
    result: &mut ImportResult,
) {
    if let Some(protocols) = bundle.protocols.as_deref_mut() {
        for warning in protect_locked_versions(existing_protocols, protocols, mode) {
            result.warnings.push(format!("{name}: {warning}"));
        }
    }

    let project = bundle.project.clone();
    if let Some(manuscripts) = bundle.manuscripts.as_mut() {
        for (index, raw) in manuscripts.iter_mut().enumerate() {
            let outcome = normalize_manuscript_or_placeholder(raw, &project);
            if let Some(err) = outcome.error {
                result.warnings.push(format!(
                    "{name}: manuscript #{index} could not be normalized ({err}); stored a placeholder"
                ));
            }
            *raw = outcome.record;
        }
    }

    if let Some(manifests) = bundle.statistical_manifests.as_mut() {
        let mut index = 0;
        manifests.retain(|manifest| {
            let kept = match validate_statistical_manifest(manifest) {
                Ok(()) => true,
                Err(err) => {
                    result
                        .warnings
                        .push(format!("{name}: dropped statistical manifest #{index} ({err})"));
                    false
                }
            };
            index += 1;
            kept
        });
    }
}

/// Checks top-level structure and returns the project entries.
fn check_structure(input: &Value) -> Result<&[Value], String> {
    if !input.is_object() {
        return Err("Invalid data structure: snapshot must be a JSON object".to_string());
    }
    if input.get("exportMetadata").map_or(true, Value::is_null) {
        return Err("Invalid data structure: missing exportMetadata".to_string());
    }
    match input.get("projects") {
        Some(Value::Array(entries)) => Ok(entries.as_slice()),
        _ => Err("Invalid data structure: projects must be an array".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::{check_structure, ImportOptions, ImportService};
    use crate::model::kind::EntityKind;
    use crate::repo::EntityRepository;
    use crate::service::merge::MergeMode;
    use crate::store::{KvStore, MemoryKvStore};
    use serde_json::json;

    #[test]
    fn structure_requires_metadata_and_project_array() {
        assert!(check_structure(&json!({"projects": []})).is_err());
        assert!(check_structure(&json!({"exportMetadata": {}, "projects": {}})).is_err());
        assert!(check_structure(&json!([])).is_err());
        assert_eq!(
            check_structure(&json!({"exportMetadata": {}, "projects": []}))
                .expect("valid")
                .len(),
            0
        );
    }

    #[test]
    fn default_options_update_and_validate() {
        let options = ImportOptions::default();
        assert_eq!(options.merge_mode, MergeMode::Update);
        assert!(options.validate_data);
        assert!(!options.backup_first);
    }

    #[test]
    fn replace_leaves_absent_collections_untouched() {
        let repo = EntityRepository::new(MemoryKvStore::new());
        repo.save(EntityKind::Persona, &[json!({"id": "keep"})], Some("p1"));
        let input = json!({
            "exportMetadata": {},
            "projects": [{"project": {"id": "p1", "name": "Alpha"}, "protocols": []}]
        });

        let result = ImportService::new(&repo).import_value(&input, ImportOptions::with_mode(MergeMode::Replace));

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(repo.get_all(EntityKind::Persona, Some("p1")), vec![json!({"id": "keep"})]);
        assert_eq!(
            repo.store().get("clinical_project_p1_protocols").expect("read").as_deref(),
            Some("[]")
        );
    }
}
