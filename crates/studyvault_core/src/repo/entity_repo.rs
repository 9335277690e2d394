//! Per-kind collection access.
//!
//! Two flavors of every primitive exist:
//! - lenient (`get_all`, `save`): failures are logged and absorbed, reads
//!   degrade to an empty collection;
//! - strict (`load`, `try_save`): failures are returned so that migrations
//!   and backups can leave their flags unset and retry later.

use crate::model::kind::EntityKind;
use crate::store::keys::{collection_key, KeyError, KeyScope, CURRENT_PROJECT_KEY};
use crate::store::{KvStore, StoreError};
use log::{debug, warn};
use serde_json::Value;
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("stored value under `{key}` is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("stored value under `{key}` is not a JSON array")]
    NotACollection { key: String },
    #[error("failed to serialize collection for `{key}`: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Entity repository over an injected store.
pub struct EntityRepository<S: KvStore> {
    store: S,
}

impl<S: KvStore> EntityRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Reads one collection. `project_id = None` addresses the global key.
    ///
    /// Missing, unreadable or corrupt collections yield an empty vector.
    pub fn get_all(&self, kind: EntityKind, project_id: Option<&str>) -> Vec<Value> {
        match self.load(kind, project_id) {
            Ok(records) => records.unwrap_or_default(),
            Err(err) => {
                warn!(
                    "event=collection_read module=repo status=error kind={} scoped={} error={}",
                    kind.resource_name(),
                    project_id.is_some(),
                    err
                );
                Vec::new()
            }
        }
    }

    /// Replaces one collection. Failures are logged and absorbed.
    pub fn save(&self, kind: EntityKind, records: &[Value], project_id: Option<&str>) {
        if let Err(err) = self.try_save(kind, records, project_id) {
            warn!(
                "event=collection_write module=repo status=error kind={} scoped={} error={}",
                kind.resource_name(),
                project_id.is_some(),
                err
            );
        }
    }

    /// Strict read. `Ok(None)` means the key is absent.
    pub fn load(&self, kind: EntityKind, project_id: Option<&str>) -> RepoResult<Option<Vec<Value>>> {
        let key = collection_key(kind, KeyScope::from_project(project_id))?;
        self.load_at(&key)
    }

    /// Strict write.
    pub fn try_save(
        &self,
        kind: EntityKind,
        records: &[Value],
        project_id: Option<&str>,
    ) -> RepoResult<()> {
        let key = collection_key(kind, KeyScope::from_project(project_id))?;
        self.save_at(&key, records)
    }

    /// Parses the collection stored under an explicit key.
    pub fn load_at(&self, key: &str) -> RepoResult<Option<Vec<Value>>> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        parse_collection(key, &raw).map(Some)
    }

    /// Serializes a collection under an explicit key.
    pub fn save_at(&self, key: &str, records: &[Value]) -> RepoResult<()> {
        let payload = serde_json::to_string(records).map_err(|source| RepoError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.store.set(key, &payload)?;
        debug!(
            "event=collection_write module=repo status=ok key={} records={}",
            key,
            records.len()
        );
        Ok(())
    }

    /// Stored project list, leniently read.
    pub fn projects(&self) -> Vec<Value> {
        self.get_all(EntityKind::Project, None)
    }

    pub fn current_project(&self) -> RepoResult<Option<String>> {
        Ok(self
            .store
            .get(CURRENT_PROJECT_KEY)?
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty()))
    }

    pub fn set_current_project(&self, project_id: &str) -> RepoResult<()> {
        self.store.set(CURRENT_PROJECT_KEY, project_id)?;
        Ok(())
    }

    pub fn raw(&self, key: &str) -> RepoResult<Option<String>> {
        Ok(self.store.get(key)?)
    }

    pub fn set_raw(&self, key: &str, value: &str) -> RepoResult<()> {
        Ok(self.store.set(key, value)?)
    }

    pub fn remove_raw(&self, key: &str) -> RepoResult<()> {
        Ok(self.store.remove(key)?)
    }

    /// Returns `true` when the flag key holds exactly `expected`.
    pub fn flag_is(&self, key: &str, expected: &str) -> RepoResult<bool> {
        Ok(self.store.get(key)?.as_deref() == Some(expected))
    }
}

/// Parses a stored collection; non-array JSON is rejected.
pub(crate) fn parse_collection(key: &str, raw: &str) -> RepoResult<Vec<Value>> {
    let value: Value = serde_json::from_str(raw).map_err(|source| RepoError::Corrupt {
        key: key.to_string(),
        source,
    })?;
    match value {
        Value::Array(records) => Ok(records),
        _ => Err(RepoError::NotACollection {
            key: key.to_string(),
        }),
    }
}
