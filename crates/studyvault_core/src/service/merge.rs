//! Collection merge strategies.
//!
//! # Invariants
//! - No merge mode ever yields two records with the same primary key that
//!   were not already duplicated in `existing`.
//! - `Skip` never alters a stored record.

use crate::model::kind::{EntityKind, RecordKey};
use crate::model::protocol::enforce_version_locks;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// How incoming records combine with stored records sharing a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Incoming collection overwrites the stored one.
    Replace,
    /// Upsert by primary key.
    #[default]
    Update,
    /// Insert only keys that are not stored yet.
    Skip,
}

impl MergeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Update => "update",
            Self::Skip => "skip",
        }
    }
}

impl Display for MergeMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "update" => Ok(Self::Update),
            "skip" => Ok(Self::Skip),
            other => Err(format!(
                "unsupported merge mode `{other}`; expected replace|update|skip"
            )),
        }
    }
}

/// Merged collection plus per-record accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub records: Vec<Value>,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl MergeOutcome {
    /// Incoming records that ended up written.
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Merges `incoming` into `existing` for one collection.
pub fn merge_records(
    existing: &[Value],
    incoming: &[Value],
    mode: MergeMode,
    kind: EntityKind,
) -> MergeOutcome {
    let existing_keys: HashSet<RecordKey> =
        existing.iter().map(|record| kind.primary_key(record)).collect();

    match mode {
        MergeMode::Replace => {
            let mut outcome = MergeOutcome::default();
            let mut positions: HashMap<RecordKey, usize> = HashMap::new();
            for record in incoming {
                let key = kind.primary_key(record);
                match positions.get(&key) {
                    Some(&position) => outcome.records[position] = record.clone(),
                    None => {
                        if existing_keys.contains(&key) {
                            outcome.updated += 1;
                        } else {
                            outcome.inserted += 1;
                        }
                        positions.insert(key, outcome.records.len());
                        outcome.records.push(record.clone());
                    }
                }
            }
            outcome
        }
        MergeMode::Update => {
            let mut outcome = MergeOutcome {
                records: existing.to_vec(),
                ..MergeOutcome::default()
            };
            let mut positions: HashMap<RecordKey, usize> = HashMap::new();
            for (position, record) in existing.iter().enumerate() {
                positions.entry(kind.primary_key(record)).or_insert(position);
            }
            for record in incoming {
                let key = kind.primary_key(record);
                match positions.get(&key) {
                    Some(&position) => {
                        outcome.records[position] = record.clone();
                        outcome.updated += 1;
                    }
                    None => {
                        positions.insert(key, outcome.records.len());
                        outcome.records.push(record.clone());
                        outcome.inserted += 1;
                    }
                }
            }
            outcome
        }
        MergeMode::Skip => {
            let mut outcome = MergeOutcome {
                records: existing.to_vec(),
                ..MergeOutcome::default()
            };
            let mut seen = existing_keys;
            for record in incoming {
                if seen.insert(kind.primary_key(record)) {
                    outcome.records.push(record.clone());
                    outcome.inserted += 1;
                } else {
                    outcome.skipped += 1;
                }
            }
            outcome
        }
    }
}

/// Applies locked-version protection to incoming protocols that will
/// replace a stored protocol with the same key.
pub fn protect_locked_versions(
    existing: &[Value],
    incoming: &mut [Value],
    mode: MergeMode,
) -> Vec<String> {
    if mode == MergeMode::Skip {
        return Vec::new();
    }
    let stored: HashMap<RecordKey, &Value> = existing
        .iter()
        .map(|protocol| (EntityKind::Protocol.primary_key(protocol), protocol))
        .collect();

    incoming
        .iter_mut()
        .flat_map(|protocol| match stored.get(&EntityKind::Protocol.primary_key(protocol)) {
            Some(existing) => enforce_version_locks(existing, protocol),
            None => Vec::new(),
        })
        .collect()
}
