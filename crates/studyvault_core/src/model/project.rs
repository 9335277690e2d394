//! Project aggregate.

use super::{id_text, now_rfc3339};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Id of the project synthesized when single-project data is migrated.
pub const DEFAULT_PROJECT_ID: &str = "default-project";

/// Lifecycle state of a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Active,
    Paused,
    Completed,
    Archived,
}

/// Top-level aggregate every scoped collection hangs off.
///
/// Fields outside the canonical set (study design, wizard state, ...) are
/// carried in `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_number: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    pub created_at: String,
    pub modified_at: String,
    /// Nested methodology configuration from project setup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_methodology: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Project {
    /// Creates an active project stamped with the current time.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            id: id.into(),
            name: name.into(),
            study_number: None,
            description: String::new(),
            phase: None,
            status: ProjectStatus::Active,
            created_at: now.clone(),
            modified_at: now,
            study_methodology: None,
            governance: None,
            extra: Map::new(),
        }
    }

    /// Project that adopts data from a pre-multi-project store.
    pub fn migrated_default() -> Self {
        let mut project = Self::new(DEFAULT_PROJECT_ID, "My Clinical Study");
        project.study_number = Some("STUDY-001".to_string());
        project.description = "Initial study migrated from previous version".to_string();
        project
    }

    /// Serializes into the untyped record shape used by the store.
    pub fn to_record(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Fills `createdAt` / `modifiedAt` the incoming record lacks.
///
/// Values come from `stored` (the record being replaced) when it has them,
/// otherwise from the current time, so re-importing the same entry leaves
/// the stored project unchanged.
pub fn stamp_missing_timestamps(record: &mut Value, stored: Option<&Value>) {
    let Some(fields) = record.as_object_mut() else {
        return;
    };
    let now = now_rfc3339();
    for field in ["createdAt", "modifiedAt"] {
        if fields.get(field).is_some_and(|value| !value.is_null()) {
            continue;
        }
        let value = stored
            .and_then(|stored| stored.get(field))
            .filter(|value| !value.is_null())
            .cloned()
            .unwrap_or_else(|| Value::String(now.clone()));
        fields.insert(field.to_string(), value);
    }
}

/// Best-effort human label of a stored or incoming project record.
pub fn project_display_name(record: &Value) -> String {
    ["name", "projectName", "id"]
        .iter()
        .find_map(|field| id_text(record.get(*field)))
        .unwrap_or_else(|| "Unknown".to_string())
}
