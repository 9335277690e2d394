//! Core engine for the StudyVault clinical-research data store.
//!
//! Owns snapshot export and import, record normalization, and the
//! ordered data-topology migrations over a pluggable key-value store.

pub mod config;
pub mod db;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod normalize;
pub mod repo;
pub mod service;
pub mod store;

pub use config::{ConfigError, EngineConfig};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status, LoggingError};
pub use migrate::{run_cascade, run_stage, CascadeReport, MigrationError, StageId, StageOutcome};
pub use model::kind::{EntityKind, RecordKey};
pub use model::snapshot::{ExportMetadata, ProjectExport, Snapshot, SNAPSHOT_SCHEMA_VERSION};
pub use normalize::{normalize_manuscript, NormalizationError};
pub use repo::{EntityRepository, RepoError, RepoResult};
pub use service::export_service::{ExportCategory, ExportOptions, ExportService};
pub use service::import_service::{ImportCounts, ImportOptions, ImportResult, ImportService};
pub use service::merge::MergeMode;
pub use service::protocol_bundle::{BundleError, ProtocolBundleService};
pub use store::{KvStore, MemoryKvStore, SqliteKvStore, StoreError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
