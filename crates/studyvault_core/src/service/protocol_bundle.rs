//! Single-protocol portable bundles.
//!
//! # Responsibility
//! - Export one protocol with optional associated clinical data, statistical
//!   manifests and manuscripts.
//! - Validate and import such bundles into a project.
//!
//! # Invariants
//! - Import never drops or unlocks a stored locked version when it
//!   overwrites a protocol.
//! - Associated records are upserted by primary key, never appended blindly.

use crate::model::kind::EntityKind;
use crate::model::protocol::{enforce_version_locks, protocol_number};
use crate::model::{id_text, now_rfc3339};
use crate::normalize::{normalize_manuscript_or_placeholder, text_field, validate_statistical_manifest};
use crate::repo::{EntityRepository, RepoError};
use crate::service::merge::{merge_records, MergeMode};
use crate::store::KvStore;
use chrono::NaiveDate;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

pub const PROTOCOL_FORMAT_VERSION: &str = "1.0";

const MAX_FILE_STEM_CHARS: usize = 50;

static UNSAFE_FILE_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("valid file name regex"));

pub type BundleResult<T> = Result<T, BundleError>;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("protocol `{protocol_id}` not found in project `{project_id}`")]
    ProtocolNotFound {
        project_id: String,
        protocol_id: String,
    },
    #[error("invalid protocol bundle: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Portable single-protocol document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolBundle {
    pub format_version: String,
    pub exported_at: String,
    pub exported_by: String,
    pub protocol: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_data: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistical_manifests: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manuscripts: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolExportOptions {
    pub include_clinical_data: bool,
    pub include_manifests: bool,
    pub include_manuscripts: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolImportOptions {
    pub generate_new_id: bool,
    pub overwrite_existing: bool,
    pub import_clinical_data: bool,
    pub import_manifests: bool,
    pub import_manuscripts: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl BundleValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolImportReport {
    pub protocol_id: String,
    pub protocol_number: Option<String>,
    pub version_count: usize,
    pub warnings: Vec<String>,
}

/// Display summary of one protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolSummary {
    pub protocol_number: String,
    pub title: String,
    pub version_count: usize,
    pub published_versions: usize,
    pub schema_block_count: usize,
    pub has_pico: bool,
    pub has_foundational_papers: bool,
    pub has_statistical_plan: bool,
}

pub struct ProtocolBundleService<'repo, S: KvStore> {
    repo: &'repo EntityRepository<S>,
    exported_by: String,
}

impl<'repo, S: KvStore> ProtocolBundleService<'repo, S> {
    pub fn new(repo: &'repo EntityRepository<S>, exported_by: impl Into<String>) -> Self {
        Self {
            repo,
            exported_by: exported_by.into(),
        }
    }

    /// Exports one protocol of a project.
    pub fn export_protocol(
        &self,
        project_id: &str,
        protocol_id: &str,
        options: ProtocolExportOptions,
    ) -> BundleResult<ProtocolBundle> {
        let protocol = self
            .repo
            .get_all(EntityKind::Protocol, Some(project_id))
            .into_iter()
            .find(|protocol| id_text(protocol.get("id")).as_deref() == Some(protocol_id))
            .ok_or_else(|| BundleError::ProtocolNotFound {
                project_id: project_id.to_string(),
                protocol_id: protocol_id.to_string(),
            })?;
        let number = protocol_number(&protocol);

        let clinical_data = match (options.include_clinical_data, number.as_deref()) {
            (true, Some(number)) => non_empty(
                self.repo
                    .get_all(EntityKind::ClinicalData, Some(project_id))
                    .into_iter()
                    .filter(|record| protocol_number(record).as_deref() == Some(number))
                    .collect(),
            ),
            _ => None,
        };
        let statistical_manifests = if options.include_manifests {
            non_empty(
                self.repo
                    .get_all(EntityKind::StatisticalManifest, Some(project_id))
                    .into_iter()
                    .filter(|manifest| {
                        id_text(manifest.pointer("/manifestMetadata/protocolId")).as_deref()
                            == Some(protocol_id)
                    })
                    .collect(),
            )
        } else {
            None
        };
        let manuscripts = if options.include_manuscripts {
            non_empty(
                self.repo
                    .get_all(EntityKind::Manuscript, Some(project_id))
                    .into_iter()
                    .filter(|manuscript| {
                        let reference = id_text(manuscript.pointer("/projectMeta/protocolRef"));
                        reference.as_deref() == Some(protocol_id)
                            || (reference.is_some() && reference == number)
                    })
                    .collect(),
            )
        } else {
            None
        };

        info!(
            "event=protocol_export module=protocol_bundle status=ok clinical_records={} manifests={} manuscripts={}",
            clinical_data.as_ref().map_or(0, Vec::len),
            statistical_manifests.as_ref().map_or(0, Vec::len),
            manuscripts.as_ref().map_or(0, Vec::len)
        );
        Ok(ProtocolBundle {
            format_version: PROTOCOL_FORMAT_VERSION.to_string(),
            exported_at: now_rfc3339(),
            exported_by: self.exported_by.clone(),
            protocol,
            clinical_data,
            statistical_manifests,
            manuscripts,
        })
    }

    /// Imports a bundle into `project_id`.
    pub fn import_protocol(
        &self,
        project_id: &str,
        bundle: &Value,
        options: ProtocolImportOptions,
    ) -> BundleResult<ProtocolImportReport> {
        let mut protocols = self.repo.get_all(EntityKind::Protocol, Some(project_id));
        let validation = validate_protocol_bundle(bundle, &protocols);
        if !validation.is_valid() {
            return Err(BundleError::Invalid(validation.errors));
        }
        let mut warnings = validation.warnings;
        let mut protocol = bundle["protocol"].clone();

        let incoming_id = id_text(protocol.get("id")).unwrap_or_default();
        let stored_position = protocols
            .iter()
            .position(|stored| id_text(stored.get("id")).as_deref() == Some(incoming_id.as_str()));

        let regenerate =
            options.generate_new_id || (stored_position.is_some() && !options.overwrite_existing);
        if regenerate {
            assign_fresh_ids(&mut protocol);
            warnings.push(format!("Generated new protocol ID (was: {incoming_id})"));
        }
        protocol["modifiedAt"] = Value::String(now_rfc3339());

        match stored_position {
            Some(position) if !regenerate => {
                warnings.extend(enforce_version_locks(&protocols[position], &mut protocol));
                protocols[position] = protocol.clone();
                warnings.push("Replaced existing protocol with same ID".to_string());
            }
            _ => protocols.push(protocol.clone()),
        }
        self.repo
            .try_save(EntityKind::Protocol, &protocols, Some(project_id))?;

        if options.import_clinical_data {
            if let Some(records) = bundle.get("clinicalData").and_then(Value::as_array) {
                let written = self.upsert(EntityKind::ClinicalData, records, project_id)?;
                warnings.push(format!("Imported {written} clinical data records"));
            }
        }
        if options.import_manifests {
            if let Some(manifests) = bundle.get("statisticalManifests").and_then(Value::as_array) {
                let mut valid = Vec::new();
                for (index, manifest) in manifests.iter().enumerate() {
                    match validate_statistical_manifest(manifest) {
                        Ok(()) => valid.push(manifest.clone()),
                        Err(err) => warnings
                            .push(format!("dropped statistical manifest #{index} ({err})")),
                    }
                }
                let written = self.upsert(EntityKind::StatisticalManifest, &valid, project_id)?;
                warnings.push(format!("Imported {written} statistical manifests"));
            }
        }
        if options.import_manuscripts {
            if let Some(manuscripts) = bundle.get("manuscripts").and_then(Value::as_array) {
                let project = self
                    .repo
                    .projects()
                    .into_iter()
                    .find(|project| id_text(project.get("id")).as_deref() == Some(project_id))
                    .unwrap_or_else(|| json!({ "id": project_id }));
                let mut normalized = Vec::with_capacity(manuscripts.len());
                for (index, raw) in manuscripts.iter().enumerate() {
                    let outcome = normalize_manuscript_or_placeholder(raw, &project);
                    if let Some(err) = outcome.error {
                        warnings.push(format!(
                            "manuscript #{index} could not be normalized ({err}); stored a placeholder"
                        ));
                    }
                    normalized.push(outcome.record);
                }
                let written = self.upsert(EntityKind::Manuscript, &normalized, project_id)?;
                warnings.push(format!("Imported {written} manuscripts"));
            }
        }

        let report = ProtocolImportReport {
            protocol_id: id_text(protocol.get("id")).unwrap_or_default(),
            protocol_number: protocol_number(&protocol),
            version_count: protocol
                .get("versions")
                .and_then(Value::as_array)
                .map_or(0, Vec::len),
            warnings,
        };
        info!(
            "event=protocol_import module=protocol_bundle status=ok versions={} regenerated={} warnings={}",
            report.version_count,
            regenerate,
            report.warnings.len()
        );
        Ok(report)
    }

    fn upsert(&self, kind: EntityKind, incoming: &[Value], project_id: &str) -> BundleResult<usize> {
        let existing = self.repo.get_all(kind, Some(project_id));
        let outcome = merge_records(&existing, incoming, MergeMode::Update, kind);
        if outcome.written() > 0 {
            self.repo.try_save(kind, &outcome.records, Some(project_id))?;
        }
        Ok(outcome.written())
    }
}

/// Checks a bundle document against the protocols stored in the target.
pub fn validate_protocol_bundle(bundle: &Value, existing: &[Value]) -> BundleValidation {
    let mut report = BundleValidation::default();
    if !bundle.is_object() {
        report
            .errors
            .push("Invalid file format: not a JSON object".to_string());
        return report;
    }

    match bundle.get("formatVersion").and_then(Value::as_str) {
        None => report
            .warnings
            .push("No format version found, assuming compatible format".to_string()),
        Some(version) if version != PROTOCOL_FORMAT_VERSION => report.warnings.push(format!(
            "Format version mismatch: expected {PROTOCOL_FORMAT_VERSION}, got {version}"
        )),
        Some(_) => {}
    }

    let protocol = match bundle.get("protocol") {
        Some(protocol) if protocol.is_object() => protocol,
        _ => {
            report.errors.push("No protocol data found in file".to_string());
            return report;
        }
    };

    let protocol_id = id_text(protocol.get("id"));
    if protocol_id.is_none() {
        report
            .errors
            .push("Protocol missing required field: id".to_string());
    }
    let number = protocol_number(protocol);
    if number.is_none() && text_field(protocol, "protocolTitle").is_none() {
        report
            .errors
            .push("Protocol must have either protocolNumber or protocolTitle".to_string());
    }

    match protocol.get("versions").and_then(Value::as_array) {
        None => report
            .errors
            .push("Protocol missing versions array".to_string()),
        Some(versions) if versions.is_empty() => {
            report.errors.push("Protocol has no versions".to_string())
        }
        Some(versions) => {
            for (index, version) in versions.iter().enumerate() {
                if id_text(version.get("id"))
                    .or_else(|| id_text(version.get("versionId")))
                    .is_none()
                {
                    report
                        .errors
                        .push(format!("Version {index} missing required field: id"));
                }
                if id_text(version.get("versionNumber")).is_none() {
                    report.errors.push(format!(
                        "Version {index} missing required field: versionNumber"
                    ));
                }
                if version.get("schemaBlocks").map_or(true, Value::is_null) {
                    report
                        .warnings
                        .push(format!("Version {index} has no schemaBlocks"));
                }
            }
            let status_count = |status: &str| {
                versions
                    .iter()
                    .filter(|version| text_field(version, "status") == Some(status))
                    .count()
            };
            if status_count("published") == 0 && status_count("draft") > 0 {
                report
                    .warnings
                    .push("Protocol has only draft versions, no published version".to_string());
            }
        }
    }

    for stored in existing {
        let stored_id = id_text(stored.get("id"));
        if number.is_some() && protocol_number(stored) == number && stored_id != protocol_id {
            report.warnings.push(format!(
                "A protocol with number \"{}\" already exists (different ID)",
                number.as_deref().unwrap_or_default()
            ));
        }
        if protocol_id.is_some() && stored_id == protocol_id {
            report.warnings.push(format!(
                "A protocol with ID \"{}\" already exists and will be replaced",
                protocol_id.as_deref().unwrap_or_default()
            ));
        }
    }
    report
}

/// File name for an exported bundle: `{number|title}_export_{date}.json`.
pub fn suggested_file_name(protocol: &Value, date: NaiveDate) -> String {
    let base = text_field(protocol, "protocolNumber")
        .or_else(|| text_field(protocol, "protocolTitle"))
        .unwrap_or("protocol");
    let safe: String = UNSAFE_FILE_CHARS_RE
        .replace_all(base, "_")
        .chars()
        .take(MAX_FILE_STEM_CHARS)
        .collect();
    format!("{safe}_export_{}.json", date.format("%Y-%m-%d"))
}

/// Summarizes a protocol for listings.
pub fn protocol_summary(protocol: &Value) -> ProtocolSummary {
    let versions = protocol
        .get("versions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let latest = versions.last();
    let methodology = protocol.get("studyMethodology");
    let pico = methodology.and_then(|methodology| {
        methodology
            .get("picoFields")
            .or_else(|| methodology.pointer("/hypothesis/picoFramework"))
    });

    ProtocolSummary {
        protocol_number: text_field(protocol, "protocolNumber")
            .unwrap_or("N/A")
            .to_string(),
        title: text_field(protocol, "protocolTitle")
            .unwrap_or("Untitled")
            .to_string(),
        version_count: versions.len(),
        published_versions: versions
            .iter()
            .filter(|version| text_field(version, "status") == Some("published"))
            .count(),
        schema_block_count: latest
            .and_then(|version| version.get("schemaBlocks"))
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
        has_pico: pico.is_some_and(|pico| {
            text_field(pico, "population").is_some() || text_field(pico, "intervention").is_some()
        }),
        has_foundational_papers: methodology
            .and_then(|methodology| methodology.get("foundationalPapers"))
            .and_then(Value::as_array)
            .is_some_and(|papers| !papers.is_empty()),
        has_statistical_plan: latest
            .and_then(|version| version.pointer("/protocolContent/statisticalPlan"))
            .is_some_and(|plan| match plan {
                Value::String(text) => !text.is_empty(),
                Value::Null | Value::Bool(false) => false,
                _ => true,
            }),
    }
}

fn assign_fresh_ids(protocol: &mut Value) {
    protocol["id"] = Value::String(format!("PROTO-IMPORT-{}", Uuid::new_v4().simple()));
    if let Some(versions) = protocol.get_mut("versions").and_then(Value::as_array_mut) {
        for version in versions.iter_mut().filter(|version| version.is_object()) {
            let fresh = Value::String(format!("v-import-{}", Uuid::new_v4().simple()));
            if version.get("versionId").is_some() {
                version["versionId"] = fresh.clone();
            }
            version["id"] = fresh;
        }
    }
}

fn non_empty(records: Vec<Value>) -> Option<Vec<Value>> {
    (!records.is_empty()).then_some(records)
}

#[cfg(test)]
mod tests {
    use super::{protocol_summary, suggested_file_name, validate_protocol_bundle};
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn file_names_are_sanitized_and_truncated() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).expect("valid date");
        assert_eq!(
            suggested_file_name(&json!({"protocolNumber": "CT 2024/01"}), date),
            "CT_2024_01_export_2024-03-09.json"
        );
        assert_eq!(
            suggested_file_name(&json!({}), date),
            "protocol_export_2024-03-09.json"
        );
        let long = suggested_file_name(&json!({"protocolTitle": "x".repeat(80)}), date);
        assert_eq!(long, format!("{}_export_2024-03-09.json", "x".repeat(50)));
    }

    #[test]
    fn validation_reports_missing_structure() {
        let report = validate_protocol_bundle(&json!({"protocol": {"versions": []}}), &[]);
        assert_eq!(
            report.errors,
            vec![
                "Protocol missing required field: id".to_string(),
                "Protocol must have either protocolNumber or protocolTitle".to_string(),
                "Protocol has no versions".to_string(),
            ]
        );
        assert_eq!(report.warnings.len(), 1);
        assert!(!validate_protocol_bundle(&json!([1]), &[]).is_valid());
    }

    #[test]
    fn summary_reads_latest_version() {
        let summary = protocol_summary(&json!({
            "protocolNumber": "CT-1",
            "studyMethodology": {"picoFields": {"population": "adults"}},
            "versions": [
                {"status": "published", "schemaBlocks": [1]},
                {"status": "draft", "schemaBlocks": [1, 2], "protocolContent": {"statisticalPlan": "ANCOVA"}}
            ]
        }));
        assert_eq!(summary.title, "Untitled");
        assert_eq!(summary.version_count, 2);
        assert_eq!(summary.published_versions, 1);
        assert_eq!(summary.schema_block_count, 2);
        assert!(summary.has_pico);
        assert!(!summary.has_foundational_papers);
        assert!(summary.has_statistical_plan);
    }
}
