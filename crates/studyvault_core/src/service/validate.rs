//! Pre-write validation of one project bundle.
//!
//! Errors reject the bundle before anything is written for it; warnings
//! are reported and the bundle is imported anyway.

use crate::model::id_text;
use crate::model::kind::{EntityKind, RecordKey};
use crate::model::protocol::{duplicate_version_keys, protocol_number};
use crate::model::snapshot::ProjectExport;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validates `bundle` against the protocols already stored for its project.
pub fn validate_bundle(bundle: &ProjectExport, existing_protocols: &[serde_json::Value]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let project_id = id_text(bundle.project.get("id"));
    if project_id.is_none() {
        report.errors.push("project is missing an id".to_string());
    }

    for kind in EntityKind::SCOPED {
        let records = bundle.records(kind);
        for (index, record) in records.iter().enumerate() {
            if !record.is_object() && !is_fail_soft(kind) {
                report
                    .errors
                    .push(format!("{kind} #{index} is not a JSON object"));
            }
        }

        let mut seen = HashSet::new();
        let mut reported = BTreeSet::new();
        for record in records.iter().filter(|record| record.is_object()) {
            let key = kind.primary_key(record);
            if !seen.insert(key.clone()) && !matches!(key, RecordKey::Content(_)) {
                reported.insert(key.to_string());
            }
        }
        for key in reported {
            report
                .warnings
                .push(format!("duplicate {kind} key {key}; the last occurrence wins"));
        }

        if let Some(project_id) = project_id.as_deref() {
            for record in records {
                if let Some(owner) = id_text(record.get("projectId")) {
                    if owner != project_id {
                        report.warnings.push(format!(
                            "{kind} {} references project {owner} but is imported into {project_id}",
                            kind.primary_key(record)
                        ));
                    }
                }
            }
        }
    }

    check_protocols(bundle, existing_protocols, &mut report);
    report
}

/// Kinds whose malformed records are degraded by the importer, not rejected.
fn is_fail_soft(kind: EntityKind) -> bool {
    matches!(kind, EntityKind::Manuscript | EntityKind::StatisticalManifest)
}

fn check_protocols(bundle: &ProjectExport, existing: &[serde_json::Value], report: &mut ValidationReport) {
    let mut numbers: HashMap<String, String> = HashMap::new();
    let protocols = bundle.records(EntityKind::Protocol);
    for protocol in protocols.iter().filter(|protocol| protocol.is_object()) {
        let label = EntityKind::Protocol.primary_key(protocol).to_string();
        for key in duplicate_version_keys(protocol) {
            report
                .errors
                .push(format!("protocol {label} has duplicate version id {key}"));
        }
        if let Some(number) = protocol_number(protocol) {
            if let Some(previous) = numbers.insert(number.clone(), label.clone()) {
                if previous != label {
                    report.warnings.push(format!(
                        "protocol number {number} is used by both {previous} and {label}"
                    ));
                }
            }
        }
    }

    for stored in existing {
        let (Some(number), Some(stored_id)) = (protocol_number(stored), id_text(stored.get("id"))) else {
            continue;
        };
        if let Some(incoming_id) = numbers.get(&number) {
            if *incoming_id != stored_id {
                report.warnings.push(format!(
                    "protocol number {number} of {incoming_id} is already used by stored protocol {stored_id}"
                ));
            }
        }
    }

    let known: HashSet<String> = protocols
        .iter()
        .chain(existing)
        .filter_map(protocol_number)
        .collect();
    if known.is_empty() {
        return;
    }
    let unknown: BTreeSet<String> = bundle
        .records(EntityKind::ClinicalData)
        .iter()
        .filter_map(protocol_number)
        .filter(|number| !known.contains(number))
        .collect();
    for number in unknown {
        report.warnings.push(format!(
            "clinical data references unknown protocol number {number}"
        ));
    }
}
