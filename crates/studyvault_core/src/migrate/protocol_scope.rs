//! Stage 2: project-scoped collections to protocol-scoped global keys.
//!
//! Protocols are enriched with their project's methodology, governance and
//! description before they are merged into the global collection. Records
//! already present globally win over migrated duplicates.

use super::{complete, MigrationResult, StageId, StageOutcome, StageReport};
use crate::model::id_text;
use crate::model::kind::EntityKind;
use crate::repo::EntityRepository;
use crate::service::merge::{merge_records, MergeMode};
use crate::store::KvStore;
use log::{info, warn};
use serde_json::Value;

const MIGRATED_KINDS: [EntityKind; 4] = [
    EntityKind::Protocol,
    EntityKind::ClinicalData,
    EntityKind::Persona,
    EntityKind::Template,
];

/// Project fields denormalized onto every protocol.
const ENRICHED_FIELDS: [&str; 3] = ["studyMethodology", "governance", "description"];

pub(crate) fn migrate<S: KvStore>(repo: &EntityRepository<S>) -> MigrationResult<StageOutcome> {
    let projects = repo.load(EntityKind::Project, None)?.unwrap_or_default();
    if projects.is_empty() {
        complete(repo, StageId::ProjectToProtocolScope)?;
        return Ok(StageOutcome::NothingToMigrate);
    }

    let mut report = StageReport::default();
    let mut collected: Vec<(EntityKind, Vec<Value>)> =
        MIGRATED_KINDS.iter().map(|kind| (*kind, Vec::new())).collect();

    for project in &projects {
        let Some(project_id) = id_text(project.get("id")) else {
            continue;
        };
        for (kind, records) in &mut collected {
            let scoped = match repo.load(*kind, Some(project_id.as_str())) {
                Ok(scoped) => scoped.unwrap_or_default(),
                Err(err) => {
                    warn!(
                        "event=migration_read module=migrate stage=project_to_protocol_scope kind={} status=error error={}",
                        kind.resource_name(),
                        err
                    );
                    report.notes.push(format!(
                        "Failed to parse {} for project {project_id}: {err}",
                        kind.resource_name()
                    ));
                    continue;
                }
            };
            if *kind == EntityKind::Protocol {
                records.extend(scoped.into_iter().map(|protocol| enrich(protocol, project)));
            } else {
                records.extend(scoped);
            }
        }
    }

    for (kind, records) in &collected {
        if records.is_empty() {
            continue;
        }
        let existing = repo.load(*kind, None)?.unwrap_or_default();
        let outcome = merge_records(&existing, records, MergeMode::Skip, *kind);
        if outcome.inserted > 0 {
            repo.try_save(*kind, &outcome.records, None)?;
        }
        report.migrated += outcome.inserted;
        report.skipped += outcome.skipped;
        info!(
            "event=migration_merge module=migrate stage=project_to_protocol_scope kind={} inserted={} skipped={}",
            kind.resource_name(),
            outcome.inserted,
            outcome.skipped
        );
    }

    complete(repo, StageId::ProjectToProtocolScope)?;
    Ok(StageOutcome::Migrated(report))
}

fn enrich(mut protocol: Value, project: &Value) -> Value {
    if let Some(fields) = protocol.as_object_mut() {
        for field in ENRICHED_FIELDS {
            if let Some(value) = project.get(field).filter(|value| !value.is_null()) {
                fields.insert(field.to_string(), value.clone());
            }
        }
    }
    protocol
}
