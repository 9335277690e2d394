//! Pre-import backup snapshot.
//!
//! Only the latest backup is kept, under `IMPORT_BACKUP_KEY`.

use crate::repo::{EntityRepository, RepoError, RepoResult};
use crate::service::export_service::{to_json, ExportService};
use crate::store::keys::IMPORT_BACKUP_KEY;
use crate::store::KvStore;
use log::info;

/// Exports current state and stores it as the import backup.
///
/// Returns the size of the stored payload in bytes.
pub fn write_backup<S: KvStore>(repo: &EntityRepository<S>, exported_by: &str) -> RepoResult<usize> {
    let snapshot = ExportService::new(repo)
        .with_exported_by(exported_by)
        .export_all(Some("Automatic backup before import"));
    let payload = to_json(&snapshot, false).map_err(|source| RepoError::Serialize {
        key: IMPORT_BACKUP_KEY.to_string(),
        source,
    })?;
    repo.set_raw(IMPORT_BACKUP_KEY, &payload)?;
    info!(
        "event=import_backup module=import status=ok projects={} bytes={}",
        snapshot.export_metadata.total_projects,
        payload.len()
    );
    Ok(payload.len())
}

/// Raw JSON of the stored backup, if any.
pub fn read_backup<S: KvStore>(repo: &EntityRepository<S>) -> RepoResult<Option<String>> {
    repo.raw(IMPORT_BACKUP_KEY)
}
