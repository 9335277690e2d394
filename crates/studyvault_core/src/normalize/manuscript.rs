//! Manuscript normalization.
//!
//! Three shapes are known:
//! - `Canonical`: all of `projectMeta`, `notebookContext`,
//!   `manuscriptContent` present plus a `reviewComments` field;
//! - `LegacyV1`: a `manuscriptContent` object without the other sections;
//! - `LegacyV0`: the flat `{id, title, content{...}, sourceLibrary}` form.

use super::{json_type_name, optional_array, synthetic_id, text_field};
use super::{NormalizationError, NormalizationResult};
use crate::model::manuscript::{
    default_section, section_value, LinkedSource, ManuscriptContent, ManuscriptStructure,
    ProjectMeta, SourceExcerpt, CANONICAL_SECTIONS, IMPORT_ARTIFACT_FIELD, PLACEHOLDER_TITLE,
};
use crate::model::id_text;
use log::warn;
use serde_json::{Map, Value};

const MANUSCRIPT_ID_PREFIX: &str = "manuscript";
const STRUCTURE_SECTION: &str = "manuscriptStructure";
/// Stands in for timestamps the source never recorded; stable across imports.
const UNKNOWN_TIMESTAMP: i64 = 0;

/// Classified manuscript input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ManuscriptShape<'a> {
    Canonical(&'a Map<String, Value>),
    LegacyV1(&'a Map<String, Value>),
    LegacyV0(&'a Map<String, Value>),
}

/// Result of the fail-soft entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct ManuscriptOutcome {
    pub record: Value,
    /// Set when `record` is a placeholder.
    pub error: Option<NormalizationError>,
}

/// Pure shape classifier.
pub fn classify_manuscript(raw: &Value) -> NormalizationResult<ManuscriptShape<'_>> {
    let Value::Object(fields) = raw else {
        return Err(NormalizationError::NotAnObject {
            found: json_type_name(raw),
        });
    };

    let has_sections = CANONICAL_SECTIONS[..3]
        .iter()
        .all(|section| is_present(fields.get(*section)));
    if has_sections && fields.contains_key(CANONICAL_SECTIONS[3]) {
        return Ok(ManuscriptShape::Canonical(fields));
    }
    if matches!(fields.get("manuscriptContent"), Some(Value::Object(_))) {
        return Ok(ManuscriptShape::LegacyV1(fields));
    }
    Ok(ManuscriptShape::LegacyV0(fields))
}

/// Converts any known shape into the canonical shape.
///
/// `project` is the owning project record; it supplies the project id and
/// fallback title and investigator for legacy shapes.
pub fn normalize_manuscript(raw: &Value, project: &Value) -> NormalizationResult<Value> {
    match classify_manuscript(raw)? {
        ManuscriptShape::Canonical(fields) => Ok(fill_canonical(fields)),
        ManuscriptShape::LegacyV1(fields) => {
            convert_legacy(raw, fields, fields.get("manuscriptContent"), project)
        }
        ManuscriptShape::LegacyV0(fields) => {
            let content = match fields.get("content") {
                Some(Value::Null) | None => fields.get("manuscriptContent"),
                other => other,
            };
            convert_legacy(raw, fields, content, project)
        }
    }
}

/// Fail-soft wrapper: structural errors yield a tagged placeholder.
pub fn normalize_manuscript_or_placeholder(raw: &Value, project: &Value) -> ManuscriptOutcome {
    match normalize_manuscript(raw, project) {
        Ok(record) => ManuscriptOutcome { record, error: None },
        Err(error) => {
            warn!(
                "event=manuscript_normalize module=normalize status=warn fallback=placeholder error={}",
                error
            );
            ManuscriptOutcome {
                record: placeholder_manuscript(raw, project),
                error: Some(error),
            }
        }
    }
}

/// Minimal valid manuscript tagged as an import artifact.
pub fn placeholder_manuscript(raw: &Value, project: &Value) -> Value {
    let id = id_text(raw.get("id")).unwrap_or_else(|| synthetic_id(MANUSCRIPT_ID_PREFIX, raw));
    let meta = ProjectMeta {
        project_id: project_id(project),
        study_title: PLACEHOLDER_TITLE.to_string(),
        primary_investigator: primary_investigator(project),
        protocol_ref: String::new(),
        created_at: Value::from(UNKNOWN_TIMESTAMP),
        modified_at: Value::from(UNKNOWN_TIMESTAMP),
    };

    let mut record = Map::new();
    record.insert("id".to_string(), Value::String(id));
    record.insert("projectMeta".to_string(), section_value(&meta));
    record.insert(
        STRUCTURE_SECTION.to_string(),
        default_section(STRUCTURE_SECTION),
    );
    record.insert("notebookContext".to_string(), default_section("notebookContext"));
    record.insert(
        "manuscriptContent".to_string(),
        default_section("manuscriptContent"),
    );
    record.insert("reviewComments".to_string(), Value::Array(Vec::new()));
    record.insert(IMPORT_ARTIFACT_FIELD.to_string(), Value::Bool(true));
    Value::Object(record)
}

fn fill_canonical(fields: &Map<String, Value>) -> Value {
    let mut record = fields.clone();
    for section in CANONICAL_SECTIONS.iter().copied().chain([STRUCTURE_SECTION]) {
        if !is_present(record.get(section)) {
            record.insert(section.to_string(), default_section(section));
        }
    }
    Value::Object(record)
}

fn convert_legacy(
    raw: &Value,
    fields: &Map<String, Value>,
    content: Option<&Value>,
    project: &Value,
) -> NormalizationResult<Value> {
    let content = legacy_content(content)?;
    let linked_sources = linked_sources(raw)?;
    let review_comments = optional_array(raw, "reviewComments")?;

    let study_title = text_field(raw, "title")
        .or_else(|| text_field(project, "name"))
        .unwrap_or("Imported Manuscript")
        .to_string();
    let modified_at = present_or(fields.get("modifiedAt"))
        .or_else(|| present_or(raw.pointer("/auditHistory/lastCheck")))
        .unwrap_or_else(|| Value::from(UNKNOWN_TIMESTAMP));
    let meta = ProjectMeta {
        project_id: project_id(project),
        study_title,
        primary_investigator: primary_investigator(project),
        protocol_ref: text_field(raw, "protocolRef").unwrap_or_default().to_string(),
        created_at: present_or(fields.get("createdAt"))
            .unwrap_or_else(|| Value::from(UNKNOWN_TIMESTAMP)),
        modified_at,
    };

    let id = id_text(fields.get("id")).unwrap_or_else(|| synthetic_id(MANUSCRIPT_ID_PREFIX, raw));
    let structure = ManuscriptStructure::with_population_summary(content.methods.clone());

    let mut record = Map::new();
    record.insert("id".to_string(), Value::String(id));
    record.insert("projectMeta".to_string(), section_value(&meta));
    record.insert(STRUCTURE_SECTION.to_string(), section_value(&structure));
    record.insert(
        "notebookContext".to_string(),
        serde_json::json!({
            "linkedSources": linked_sources,
            "citationMap": {},
        }),
    );
    record.insert("manuscriptContent".to_string(), section_value(&content));
    record.insert("reviewComments".to_string(), Value::Array(review_comments));
    Ok(Value::Object(record))
}

fn legacy_content(content: Option<&Value>) -> NormalizationResult<ManuscriptContent> {
    let fields = match content {
        None | Some(Value::Null) => return Ok(ManuscriptContent::default()),
        Some(Value::Object(fields)) => fields,
        Some(other) => return Err(NormalizationError::invalid_field("content", "an object", other)),
    };

    let text = |name: &str| -> NormalizationResult<String> {
        match fields.get(name) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(text)) => Ok(text.clone()),
            Some(other) => Err(NormalizationError::invalid_field(
                format!("content.{name}"),
                "a string",
                other,
            )),
        }
    };

    Ok(ManuscriptContent {
        introduction: text("introduction")?,
        methods: text("methods")?,
        results: text("results")?,
        discussion: text("discussion")?,
        conclusion: text("conclusion")?,
    })
}

fn linked_sources(raw: &Value) -> NormalizationResult<Vec<Value>> {
    let mut sources = Vec::new();
    for source in optional_array(raw, "sourceLibrary")? {
        if !source.is_object() {
            return Err(NormalizationError::invalid_field(
                "sourceLibrary[]",
                "an object",
                &source,
            ));
        }
        let source_id = source
            .get("sourceId")
            .filter(|id| is_present(Some(*id)))
            .or_else(|| source.get("id"))
            .cloned()
            .unwrap_or(Value::Null);

        let excerpts = optional_array(&source, "snippets")?
            .iter()
            .map(|snippet| SourceExcerpt {
                id: snippet.get("id").cloned().unwrap_or(Value::Null),
                text: snippet.get("text").cloned().unwrap_or(Value::Null),
                page: 1,
                section: "body".to_string(),
                citation_anchor: source_id.clone(),
            })
            .collect();

        let linked = LinkedSource {
            id: source_id.clone(),
            file_name: text_field(&source, "title")
                .unwrap_or("Unknown Source")
                .to_string(),
            file_type: "reference".to_string(),
            uploaded_at: source
                .get("uploadedAt")
                .or_else(|| source.get("addedAt"))
                .and_then(Value::as_i64)
                .unwrap_or(UNKNOWN_TIMESTAMP),
            citation_key: source_id,
            is_grounded: true,
            excerpts,
        };
        sources.push(section_value(&linked));
    }
    Ok(sources)
}

fn is_present(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null))
}

fn present_or(value: Option<&Value>) -> Option<Value> {
    value.filter(|value| is_present(Some(*value))).cloned()
}

fn project_id(project: &Value) -> String {
    id_text(project.get("id")).unwrap_or_default()
}

fn primary_investigator(project: &Value) -> String {
    text_field(project, "primaryInvestigator")
        .unwrap_or("Unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::{
        classify_manuscript, normalize_manuscript, normalize_manuscript_or_placeholder,
        ManuscriptShape,
    };
    use serde_json::json;

    fn project() -> serde_json::Value {
        json!({"id": "p1", "name": "Study", "primaryInvestigator": "Dr. Rao"})
    }

    fn canonical() -> serde_json::Value {
        json!({
            "id": "m1",
            "projectMeta": {"projectId": "p1", "studyTitle": "T"},
            "notebookContext": {"linkedSources": [], "citationMap": {}},
            "manuscriptContent": {"introduction": "I"},
            "reviewComments": [],
            "customField": 7
        })
    }

    #[test]
    fn classifier_distinguishes_three_shapes() {
        assert!(matches!(
            classify_manuscript(&canonical()),
            Ok(ManuscriptShape::Canonical(_))
        ));
        assert!(matches!(
            classify_manuscript(&json!({"id": "m1", "manuscriptContent": {}})),
            Ok(ManuscriptShape::LegacyV1(_))
        ));
        assert!(matches!(
            classify_manuscript(&json!({"id": "m1", "title": "T"})),
            Ok(ManuscriptShape::LegacyV0(_))
        ));
        assert!(classify_manuscript(&json!("m1")).is_err());
    }

    #[test]
    fn canonical_records_keep_unknown_fields_and_gain_structure() {
        let normalized = normalize_manuscript(&canonical(), &project()).expect("canonical");
        assert_eq!(normalized["customField"], 7);
        assert_eq!(normalized["manuscriptContent"]["introduction"], "I");
        assert_eq!(
            normalized["manuscriptStructure"]["methods"]["statisticalPlan"]["software"],
            "R / SPSS"
        );
    }

    #[test]
    fn flat_record_maps_title_content_and_sources() {
        let raw = json!({
            "id": "m1",
            "title": "T",
            "content": {"introduction": "I", "methods": "Randomized"},
            "sourceLibrary": [{
                "sourceId": "s1",
                "title": "Paper",
                "snippets": [{"id": "sn1", "text": "quote"}]
            }]
        });
        let normalized = normalize_manuscript(&raw, &project()).expect("legacy");

        assert_eq!(normalized["id"], "m1");
        assert_eq!(normalized["projectMeta"]["studyTitle"], "T");
        assert_eq!(normalized["projectMeta"]["projectId"], "p1");
        assert_eq!(normalized["projectMeta"]["primaryInvestigator"], "Dr. Rao");
        assert_eq!(normalized["manuscriptContent"]["introduction"], "I");
        assert_eq!(normalized["manuscriptContent"]["conclusion"], "");
        assert_eq!(
            normalized["manuscriptStructure"]["methods"]["populationSummary"],
            "Randomized"
        );
        let source = &normalized["notebookContext"]["linkedSources"][0];
        assert_eq!(source["fileName"], "Paper");
        assert_eq!(source["citationKey"], "s1");
        assert_eq!(source["excerpts"][0]["citationAnchor"], "s1");
        assert_eq!(source["excerpts"][0]["page"], 1);
        assert_eq!(source["uploadedAt"], 0);
        assert_eq!(normalized["projectMeta"]["createdAt"], 0);
        assert_eq!(normalized, normalize_manuscript(&raw, &project()).expect("legacy"));
    }

    #[test]
    fn title_falls_back_to_project_name() {
        let normalized =
            normalize_manuscript(&json!({"manuscriptContent": {"results": "R"}}), &project())
                .expect("legacy v1");
        assert_eq!(normalized["projectMeta"]["studyTitle"], "Study");
        assert_eq!(normalized["manuscriptContent"]["results"], "R");
        assert!(normalized["id"]
            .as_str()
            .expect("synthetic id")
            .starts_with("manuscript-"));
    }

    #[test]
    fn structural_errors_become_tagged_placeholders() {
        let raw = json!({"id": "m9", "title": "T", "content": {"introduction": 42}});
        let outcome = normalize_manuscript_or_placeholder(&raw, &project());

        assert!(outcome.error.is_some());
        assert_eq!(outcome.record["id"], "m9");
        assert_eq!(outcome.record["importArtifact"], true);
        assert_eq!(
            outcome.record["projectMeta"]["studyTitle"],
            "Import Error - Invalid Data"
        );
    }
}
