//! Key-value store collaborator and its backends.
//!
//! # Responsibility
//! - Define the narrow `get`/`set`/`remove` contract every persistence medium
//!   must satisfy.
//! - Provide a SQLite-backed store for real deployments and an in-memory store
//!   for tests and dry runs.
//! - Own the versioned storage-key formatting function.
//!
//! # Invariants
//! - Values are opaque UTF-8 strings; the store never parses them.
//! - A single writer is assumed; no operation takes a lock.

use thiserror::Error;

pub mod keys;
mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store read failed for key `{key}`: {message}")]
    Read { key: String, message: String },
    #[error("store write failed for key `{key}`: {message}")]
    Write { key: String, message: String },
    #[error("store listing failed: {0}")]
    Listing(String),
}

/// Untyped string store reached only through this interface.
pub trait KvStore {
    /// Returns the raw value stored under `key`, if any.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Removes `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> StoreResult<()>;
    /// Lists every stored key in ascending order.
    fn keys(&self) -> StoreResult<Vec<String>>;
}

impl<T: KvStore + ?Sized> KvStore for &T {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        (**self).keys()
    }
}

/// Size summary of one stored entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageItem {
    pub key: String,
    pub size: usize,
}

/// Aggregate store usage, largest entries first.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub total_size: usize,
    pub item_count: usize,
    pub items: Vec<StorageItem>,
}

/// Collects per-key byte sizes for diagnostics.
pub fn storage_info(store: &impl KvStore) -> StoreResult<StorageInfo> {
    let mut items = Vec::new();
    for key in store.keys()? {
        if let Some(value) = store.get(&key)? {
            items.push(StorageItem {
                size: value.len(),
                key,
            });
        }
    }
    items.sort_by(|left, right| right.size.cmp(&left.size).then(left.key.cmp(&right.key)));

    Ok(StorageInfo {
        total_size: items.iter().map(|item| item.size).sum(),
        item_count: items.len(),
        items,
    })
}
