//! One-time structural migrations across storage topologies.
//!
//! # Responsibility
//! - Walk the store forward through the three storage topologies:
//!   unscoped single project, project scoped, protocol-scoped global.
//! - Gate every stage behind its own persisted flag.
//!
//! # Invariants
//! - Stages run in `StageId::ORDERED` order; a later stage may observe the
//!   writes of an earlier one.
//! - A stage sets its flag only after its writes succeeded. "Nothing to
//!   migrate" sets the flag immediately; an error leaves it unset so the
//!   stage is retried on the next start.
//! - Once a flag is set, data later appearing in the pre-migration shape is
//!   not picked up again.
//! - A stage whose flag is set performs no writes.

pub mod legacy_protocols;
pub mod project_architecture;
pub mod protocol_scope;

use crate::repo::{EntityRepository, RepoError};
use crate::store::keys::{
    KeyError, FLAG_LEGACY_PROTOCOLS_V1, FLAG_PROJECT_ARCHITECTURE_V1, FLAG_PROJECT_TO_PROTOCOL_V1,
};
use crate::store::KvStore;
use log::{error, info};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use thiserror::Error;

pub use legacy_protocols::{has_legacy_protocols, legacy_protocol_count, restore_legacy_protocols};
pub use project_architecture::rollback_project_architecture;

pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("legacy data under `{key}` is corrupt: {message}")]
    CorruptLegacyData { key: String, message: String },
}

/// Named migration stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    ProjectArchitecture,
    ProjectToProtocolScope,
    LegacyProtocolStorage,
}

impl StageId {
    /// Execution order of the cascade.
    pub const ORDERED: [StageId; 3] = [
        Self::ProjectArchitecture,
        Self::ProjectToProtocolScope,
        Self::LegacyProtocolStorage,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ProjectArchitecture => "project_architecture",
            Self::ProjectToProtocolScope => "project_to_protocol_scope",
            Self::LegacyProtocolStorage => "legacy_protocol_storage",
        }
    }

    pub fn flag_key(self) -> &'static str {
        match self {
            Self::ProjectArchitecture => FLAG_PROJECT_ARCHITECTURE_V1,
            Self::ProjectToProtocolScope => FLAG_PROJECT_TO_PROTOCOL_V1,
            Self::LegacyProtocolStorage => FLAG_LEGACY_PROTOCOLS_V1,
        }
    }

    /// Value the flag holds once the stage completed.
    pub fn flag_value(self) -> &'static str {
        match self {
            Self::ProjectArchitecture => "true",
            Self::ProjectToProtocolScope | Self::LegacyProtocolStorage => "complete",
        }
    }
}

impl Display for StageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-stage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub migrated: usize,
    pub skipped: usize,
    /// Non-fatal problems met while migrating.
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StageOutcome {
    /// Flag already set; nothing was read beyond the flag.
    AlreadyComplete,
    /// Trigger absent; the flag has been set.
    NothingToMigrate,
    /// Trigger present but a prerequisite is missing; the flag stays unset.
    Deferred { reason: String },
    Migrated(StageReport),
}

/// Result of one stage inside a cascade run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRun {
    pub stage: StageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub stages: Vec<StageRun>,
}

impl CascadeReport {
    /// `true` when no stage failed.
    pub fn is_clean(&self) -> bool {
        self.stages.iter().all(|run| run.error.is_none())
    }

    pub fn outcome(&self, stage: StageId) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|run| run.stage == stage)
            .and_then(|run| run.outcome.as_ref())
    }
}

/// Runs one stage unless its flag is already set.
pub fn run_stage<S: KvStore>(repo: &EntityRepository<S>, stage: StageId) -> MigrationResult<StageOutcome> {
    if repo.flag_is(stage.flag_key(), stage.flag_value())? {
        return Ok(StageOutcome::AlreadyComplete);
    }
    match stage {
        StageId::ProjectArchitecture => project_architecture::migrate(repo),
        StageId::ProjectToProtocolScope => protocol_scope::migrate(repo),
        StageId::LegacyProtocolStorage => legacy_protocols::migrate(repo),
    }
}

/// Runs every stage in order. A failing stage is reported and the
/// remaining stages still run.
pub fn run_cascade<S: KvStore>(repo: &EntityRepository<S>) -> CascadeReport {
    let mut report = CascadeReport::default();
    for stage in StageId::ORDERED {
        let started_at = Instant::now();
        let run = match run_stage(repo, stage) {
            Ok(outcome) => {
                info!(
                    "event=migration_stage module=migrate stage={} status={} duration_ms={}",
                    stage,
                    outcome_status(&outcome),
                    started_at.elapsed().as_millis()
                );
                StageRun {
                    stage,
                    outcome: Some(outcome),
                    error: None,
                }
            }
            Err(err) => {
                error!(
                    "event=migration_stage module=migrate stage={} status=error error={} duration_ms={}",
                    stage,
                    err,
                    started_at.elapsed().as_millis()
                );
                StageRun {
                    stage,
                    outcome: None,
                    error: Some(err.to_string()),
                }
            }
        };
        report.stages.push(run);
    }
    report
}

fn outcome_status(outcome: &StageOutcome) -> &'static str {
    match outcome {
        StageOutcome::AlreadyComplete | StageOutcome::NothingToMigrate => "skip",
        StageOutcome::Deferred { .. } => "deferred",
        StageOutcome::Migrated(_) => "ok",
    }
}

/// Marks a stage complete.
pub(crate) fn complete<S: KvStore>(repo: &EntityRepository<S>, stage: StageId) -> MigrationResult<()> {
    repo.set_raw(stage.flag_key(), stage.flag_value())?;
    Ok(())
}
