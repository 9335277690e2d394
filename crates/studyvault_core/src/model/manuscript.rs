//! Canonical manuscript manifest sections.
//!
//! The canonical record is an object with the four top-level sections named
//! in `CANONICAL_SECTIONS` plus `manuscriptStructure`. These typed sections
//! are used to synthesize missing parts; stored records remain JSON objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sections whose joint presence marks a record as canonical.
pub const CANONICAL_SECTIONS: [&str; 4] = [
    "projectMeta",
    "notebookContext",
    "manuscriptContent",
    "reviewComments",
];

/// Marker set on placeholders produced when a record could not be normalized.
pub const IMPORT_ARTIFACT_FIELD: &str = "importArtifact";

/// Study title written on placeholders.
pub const PLACEHOLDER_TITLE: &str = "Import Error - Invalid Data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMeta {
    pub project_id: String,
    pub study_title: String,
    pub primary_investigator: String,
    pub protocol_ref: String,
    pub created_at: Value,
    pub modified_at: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticalPlan {
    pub software: String,
    pub primary_test: String,
    pub rationale: String,
}

impl Default for StatisticalPlan {
    fn default() -> Self {
        Self {
            software: "R / SPSS".to_string(),
            primary_test: "t-test".to_string(),
            rationale: "Standard parametric analysis".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodsStructure {
    pub statistical_plan: StatisticalPlan,
    pub population_summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsStructure {
    pub primary_findings: Vec<Value>,
    pub secondary_findings: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionAnchors {
    pub internal_conflicts: String,
    pub lateral_opportunities: Vec<Value>,
}

/// Outline scaffolding of a manuscript.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManuscriptStructure {
    pub methods: MethodsStructure,
    pub results: ResultsStructure,
    pub discussion_anchors: DiscussionAnchors,
}

impl ManuscriptStructure {
    pub fn with_population_summary(summary: impl Into<String>) -> Self {
        let mut structure = Self::default();
        structure.methods.population_summary = summary.into();
        structure
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookContext {
    pub linked_sources: Vec<Value>,
    pub citation_map: Map<String, Value>,
}

/// Grounded reference attached to the notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedSource {
    pub id: Value,
    pub file_name: String,
    pub file_type: String,
    pub uploaded_at: i64,
    pub citation_key: Value,
    pub is_grounded: bool,
    pub excerpts: Vec<SourceExcerpt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceExcerpt {
    pub id: Value,
    pub text: Value,
    pub page: u32,
    pub section: String,
    pub citation_anchor: Value,
}

/// IMRaD body text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManuscriptContent {
    pub introduction: String,
    pub methods: String,
    pub results: String,
    pub discussion: String,
    pub conclusion: String,
}

/// Serializes a typed section into its stored JSON shape.
pub fn section_value<T: Serialize>(section: &T) -> Value {
    serde_json::to_value(section).unwrap_or(Value::Null)
}

/// Default value of one canonical or structural section.
pub fn default_section(name: &str) -> Value {
    match name {
        "projectMeta" => Value::Object(Map::new()),
        "notebookContext" => section_value(&NotebookContext::default()),
        "manuscriptContent" => section_value(&ManuscriptContent::default()),
        "reviewComments" => Value::Array(Vec::new()),
        "manuscriptStructure" => section_value(&ManuscriptStructure::default()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::{default_section, ManuscriptStructure};

    #[test]
    fn default_structure_carries_standard_statistical_plan() {
        let structure = default_section("manuscriptStructure");
        assert_eq!(structure["methods"]["statisticalPlan"]["software"], "R / SPSS");
        assert_eq!(structure["methods"]["statisticalPlan"]["primaryTest"], "t-test");
        assert_eq!(structure["discussionAnchors"]["internalConflicts"], "");
    }

    #[test]
    fn population_summary_is_set_on_methods() {
        let structure = ManuscriptStructure::with_population_summary("42 adults");
        assert_eq!(structure.methods.population_summary, "42 adults");
    }

    #[test]
    fn notebook_default_is_empty() {
        let notebook = default_section("notebookContext");
        assert_eq!(notebook["linkedSources"], serde_json::json!([]));
        assert_eq!(notebook["citationMap"], serde_json::json!({}));
    }
}
