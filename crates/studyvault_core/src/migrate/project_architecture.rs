//! Stage 1: unscoped single-project data to project-scoped keys.
//!
//! Legacy collections are copied verbatim under a synthesized default
//! project; the legacy keys stay in place as a backup.

use super::{complete, MigrationResult, StageId, StageOutcome, StageReport};
use crate::model::id_text;
use crate::model::kind::EntityKind;
use crate::model::project::{Project, DEFAULT_PROJECT_ID};
use crate::repo::{EntityRepository, RepoResult};
use crate::store::keys::{collection_key, KeyScope, CURRENT_PROJECT_KEY, PROJECTS_KEY};
use crate::store::KvStore;
use log::{info, warn};

/// Legacy unscoped collections, in processing order.
const LEGACY_KINDS: [EntityKind; 4] = [
    EntityKind::Protocol,
    EntityKind::ClinicalData,
    EntityKind::Persona,
    EntityKind::Template,
];

pub(crate) fn migrate<S: KvStore>(repo: &EntityRepository<S>) -> MigrationResult<StageOutcome> {
    let mut legacy = Vec::new();
    for kind in LEGACY_KINDS {
        let key = collection_key(kind, KeyScope::Legacy)?;
        if let Some(raw) = repo.raw(&key)?.filter(|raw| !raw.is_empty()) {
            legacy.push((kind, raw));
        }
    }

    if legacy.is_empty() {
        if repo.raw(PROJECTS_KEY)?.is_none() {
            repo.try_save(EntityKind::Project, &[], None)?;
        }
        complete(repo, StageId::ProjectArchitecture)?;
        return Ok(StageOutcome::NothingToMigrate);
    }

    let mut projects = repo.load(EntityKind::Project, None)?.unwrap_or_default();
    let has_default = projects
        .iter()
        .any(|project| id_text(project.get("id")).as_deref() == Some(DEFAULT_PROJECT_ID));
    if !has_default {
        projects.push(Project::migrated_default().to_record());
        repo.try_save(EntityKind::Project, &projects, None)?;
    }
    repo.set_current_project(DEFAULT_PROJECT_ID)?;

    let mut report = StageReport::default();
    for (kind, raw) in &legacy {
        let target = collection_key(*kind, KeyScope::Project(DEFAULT_PROJECT_ID))?;
        repo.set_raw(&target, raw)?;
        report.migrated += 1;
        info!(
            "event=migration_copy module=migrate stage=project_architecture kind={} bytes={}",
            kind.resource_name(),
            raw.len()
        );
    }

    complete(repo, StageId::ProjectArchitecture)?;
    Ok(StageOutcome::Migrated(report))
}

/// Removes the stage flag, the project list and the current project.
///
/// Project-scoped data and legacy keys are left untouched, so the next
/// cascade run migrates the legacy collections again.
pub fn rollback_project_architecture<S: KvStore>(repo: &EntityRepository<S>) -> RepoResult<()> {
    warn!("event=migration_rollback module=migrate stage=project_architecture status=start");
    repo.remove_raw(StageId::ProjectArchitecture.flag_key())?;
    repo.remove_raw(PROJECTS_KEY)?;
    repo.remove_raw(CURRENT_PROJECT_KEY)?;
    Ok(())
}
