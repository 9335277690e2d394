//! Stage 3: legacy global protocol key to project-scoped protocols.
//!
//! The raw legacy payload is archived before the legacy key is deleted;
//! deletion is the only destructive step of the cascade.

use super::{complete, MigrationError, MigrationResult, StageId, StageOutcome, StageReport};
use crate::model::id_text;
use crate::model::kind::EntityKind;
use crate::repo::entity_repo::parse_collection;
use crate::repo::{EntityRepository, RepoResult};
use crate::store::keys::{LEGACY_PROTOCOLS_ARCHIVE_KEY, LEGACY_PROTOCOLS_KEY};
use crate::store::KvStore;
use log::{info, warn};
use std::collections::HashSet;

pub(crate) fn migrate<S: KvStore>(repo: &EntityRepository<S>) -> MigrationResult<StageOutcome> {
    if !legacy_payload_present(repo)? {
        complete(repo, StageId::LegacyProtocolStorage)?;
        return Ok(StageOutcome::NothingToMigrate);
    }

    let Some(target) = target_project(repo)? else {
        return Ok(StageOutcome::Deferred {
            reason: "no project exists to receive legacy protocols".to_string(),
        });
    };
    migrate_into(repo, &target).map(StageOutcome::Migrated)
}

/// Moves legacy protocols into `project_id`, skipping ids already present.
///
/// Sets the stage flag on success.
pub fn migrate_into<S: KvStore>(repo: &EntityRepository<S>, project_id: &str) -> MigrationResult<StageReport> {
    let mut report = StageReport::default();
    let Some(raw) = repo.raw(LEGACY_PROTOCOLS_KEY)?.filter(|raw| !raw.is_empty()) else {
        complete(repo, StageId::LegacyProtocolStorage)?;
        return Ok(report);
    };

    let legacy = parse_collection(LEGACY_PROTOCOLS_KEY, &raw).map_err(|err| {
        MigrationError::CorruptLegacyData {
            key: LEGACY_PROTOCOLS_KEY.to_string(),
            message: err.to_string(),
        }
    })?;

    let mut protocols = repo
        .load(EntityKind::Protocol, Some(project_id))?
        .unwrap_or_default();
    let mut known: HashSet<_> = protocols
        .iter()
        .map(|protocol| EntityKind::Protocol.primary_key(protocol))
        .collect();
    for protocol in legacy {
        if known.insert(EntityKind::Protocol.primary_key(&protocol)) {
            protocols.push(protocol);
            report.migrated += 1;
        } else {
            report.skipped += 1;
        }
    }
    if report.migrated > 0 {
        repo.try_save(EntityKind::Protocol, &protocols, Some(project_id))?;
    }

    repo.set_raw(LEGACY_PROTOCOLS_ARCHIVE_KEY, &raw)?;
    repo.remove_raw(LEGACY_PROTOCOLS_KEY)?;
    complete(repo, StageId::LegacyProtocolStorage)?;
    info!(
        "event=migration_legacy_protocols module=migrate status=ok migrated={} skipped={}",
        report.migrated, report.skipped
    );
    Ok(report)
}

/// `true` when the legacy key holds a non-empty payload.
pub fn has_legacy_protocols<S: KvStore>(repo: &EntityRepository<S>) -> bool {
    legacy_payload_present(repo).unwrap_or_else(|err| {
        warn!(
            "event=legacy_protocol_probe module=migrate status=error error={}",
            err
        );
        false
    })
}

/// Number of legacy protocols; unreadable or corrupt payloads count as zero.
pub fn legacy_protocol_count<S: KvStore>(repo: &EntityRepository<S>) -> usize {
    match repo.load_at(LEGACY_PROTOCOLS_KEY) {
        Ok(protocols) => protocols.map_or(0, |protocols| protocols.len()),
        Err(_) => 0,
    }
}

/// Copies the archive back to the legacy key and clears the stage flag.
///
/// Returns `false` when no archive exists.
pub fn restore_legacy_protocols<S: KvStore>(repo: &EntityRepository<S>) -> RepoResult<bool> {
    let Some(archived) = repo.raw(LEGACY_PROTOCOLS_ARCHIVE_KEY)? else {
        return Ok(false);
    };
    repo.set_raw(LEGACY_PROTOCOLS_KEY, &archived)?;
    repo.remove_raw(StageId::LegacyProtocolStorage.flag_key())?;
    warn!("event=migration_rollback module=migrate stage=legacy_protocol_storage status=ok");
    Ok(true)
}

fn legacy_payload_present<S: KvStore>(repo: &EntityRepository<S>) -> RepoResult<bool> {
    Ok(repo
        .raw(LEGACY_PROTOCOLS_KEY)?
        .is_some_and(|raw| !raw.is_empty()))
}

/// Current project when it still exists, else the first stored project.
fn target_project<S: KvStore>(repo: &EntityRepository<S>) -> RepoResult<Option<String>> {
    let project_ids: Vec<String> = repo
        .load(EntityKind::Project, None)?
        .unwrap_or_default()
        .iter()
        .filter_map(|project| id_text(project.get("id")))
        .collect();
    let current = repo.current_project()?;
    Ok(current
        .filter(|current| project_ids.contains(current))
        .or_else(|| project_ids.into_iter().next()))
}
