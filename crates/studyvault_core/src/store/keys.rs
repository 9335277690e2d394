//! Deterministic storage-key formatting.
//!
//! # Invariants
//! - `collection_key` is pure: identical inputs yield identical keys across
//!   restarts and processes.
//! - Any change to the produced key shapes must bump `KEY_FORMAT_VERSION`.
//!
//! Three storage topologies coexist in long-lived stores:
//! - `Legacy`: unscoped single-project keys (`clinical_protocols`, ...).
//! - `Project`: `clinical_project_{projectId}_{resource}`.
//! - `Global`: protocol-scoped global keys `clinical_global_{resource}`.

use crate::model::kind::EntityKind;
use thiserror::Error;

pub const KEY_FORMAT_VERSION: u32 = 1;

const KEY_PREFIX: &str = "clinical";

/// Project list. Projects only ever live under this one key.
pub const PROJECTS_KEY: &str = "clinical_projects";
/// Id of the project the user currently works in.
pub const CURRENT_PROJECT_KEY: &str = "clinical_current_project";

/// Stage 1 flag; value `"true"` once applied.
pub const FLAG_PROJECT_ARCHITECTURE_V1: &str = "clinical_migration_projects_v1";
/// Stage 2 flag; value `"complete"` once applied.
pub const FLAG_PROJECT_TO_PROTOCOL_V1: &str = "clinical_migration_project_to_protocol_v1";
/// Stage 3 flag; value `"complete"` once applied.
pub const FLAG_LEGACY_PROTOCOLS_V1: &str = "clinical_migration_legacy_protocols_v1";

/// Pre-topology global protocol key consumed by stage 3.
pub const LEGACY_PROTOCOLS_KEY: &str = "clinical-intelligence-protocols";
/// Raw archive written by stage 3 before it deletes `LEGACY_PROTOCOLS_KEY`.
pub const LEGACY_PROTOCOLS_ARCHIVE_KEY: &str = "clinical-intelligence-protocols-ARCHIVED";

/// Latest pre-import backup snapshot.
pub const IMPORT_BACKUP_KEY: &str = "clinical_import_backup_v1";

/// Storage topology a collection key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope<'a> {
    Legacy,
    Project(&'a str),
    Global,
}

impl<'a> KeyScope<'a> {
    /// Maps the repository's optional project id onto a scope.
    pub fn from_project(project_id: Option<&'a str>) -> Self {
        project_id.map_or(Self::Global, Self::Project)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("project id cannot be empty")]
    EmptyProjectId,
    #[error("{0} collections are not project-scoped")]
    NotScoped(EntityKind),
    #[error("{0} collections have no legacy unscoped key")]
    NoLegacyKey(EntityKind),
}

/// Formats the storage key of one entity collection.
pub fn collection_key(kind: EntityKind, scope: KeyScope<'_>) -> Result<String, KeyError> {
    if kind == EntityKind::Project {
        return match scope {
            KeyScope::Global => Ok(PROJECTS_KEY.to_string()),
            _ => Err(KeyError::NotScoped(kind)),
        };
    }

    match scope {
        KeyScope::Legacy => legacy_key(kind)
            .map(str::to_string)
            .ok_or(KeyError::NoLegacyKey(kind)),
        KeyScope::Project(project_id) => {
            let project_id = project_id.trim();
            if project_id.is_empty() {
                return Err(KeyError::EmptyProjectId);
            }
            Ok(format!(
                "{KEY_PREFIX}_project_{project_id}_{}",
                kind.resource_name()
            ))
        }
        KeyScope::Global => Ok(format!("{KEY_PREFIX}_global_{}", kind.resource_name())),
    }
}

fn legacy_key(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Protocol => Some("clinical_protocols"),
        EntityKind::Persona => Some("clinical_personas"),
        EntityKind::ClinicalData => Some("clinical_data"),
        EntityKind::Template => Some("clinical_schema_templates"),
        EntityKind::Project | EntityKind::Manuscript | EntityKind::StatisticalManifest => None,
    }
}
