use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use studyvault_core::db::open_db_in_memory;
use studyvault_core::store::keys::IMPORT_BACKUP_KEY;
use studyvault_core::{
    EntityKind, EntityRepository, ExportCategory, ExportOptions, ExportService, ImportOptions,
    ImportService, KvStore, MemoryKvStore, MergeMode, Snapshot, SqliteKvStore,
};

fn memory_repo() -> EntityRepository<MemoryKvStore> {
    EntityRepository::new(MemoryKvStore::new())
}

fn canonical_manuscript(id: &str, project_id: &str) -> Value {
    json!({
        "id": id,
        "projectMeta": {
            "projectId": project_id,
            "studyTitle": "Canonical",
            "primaryInvestigator": "Dr. Rivera",
            "protocolRef": "pr1",
            "createdAt": 1_700_000_000_000_i64,
            "modifiedAt": 1_700_000_000_000_i64
        },
        "manuscriptStructure": {"methods": {"populationSummary": "adults"}},
        "notebookContext": {"linkedSources": [], "citationMap": {}},
        "manuscriptContent": {
            "introduction": "intro",
            "methods": "methods",
            "results": "",
            "discussion": "",
            "conclusion": ""
        },
        "reviewComments": []
    })
}

fn seed<S: KvStore>(repo: &EntityRepository<S>) {
    repo.save(
        EntityKind::Project,
        &[
            json!({"id": "p1", "name": "Cardio", "status": "active"}),
            json!({"id": "p2", "name": "Neuro", "status": "active"}),
        ],
        None,
    );
    repo.save(
        EntityKind::Protocol,
        &[json!({
            "id": "pr1",
            "protocolNumber": "CARD-001",
            "protocolTitle": "Heart study",
            "versions": [{"versionId": "v1", "versionNumber": "1.0", "schemaBlocks": []}]
        })],
        Some("p1"),
    );
    repo.save(
        EntityKind::ClinicalData,
        &[json!({
            "recordId": "r1",
            "subjectId": "S-1",
            "visitNumber": "1",
            "protocolNumber": "CARD-001",
            "protocolVersion": "1.0",
            "data": {"hr": 72}
        })],
        Some("p1"),
    );
    repo.save(
        EntityKind::Manuscript,
        &[canonical_manuscript("m1", "p1")],
        Some("p1"),
    );
    repo.save(
        EntityKind::StatisticalManifest,
        &[json!({"manifestMetadata": {"protocolId": "pr1", "protocolVersion": "1.0"}})],
        Some("p1"),
    );
    repo.save(
        EntityKind::Persona,
        &[json!({"id": "persona-1", "name": "Reviewer"})],
        Some("p2"),
    );
    repo.save(
        EntityKind::Template,
        &[json!({"id": "tpl-1", "name": "Vitals"})],
        None,
    );
    repo.save(
        EntityKind::Persona,
        &[json!({"id": "gp-1", "name": "Statistician"})],
        None,
    );
}

fn snapshot_with(projects: Value) -> Value {
    json!({
        "exportMetadata": {
            "version": "1.0.0",
            "exportedAt": 0,
            "exportedBy": "test",
            "applicationVersion": "test",
            "totalProjects": 0,
            "totalProtocols": 0,
            "totalManuscripts": 0,
            "totalClinicalRecords": 0
        },
        "projects": projects
    })
}

fn bundle(project_id: &str, protocols: Value) -> Value {
    json!({
        "project": {"id": project_id, "name": format!("Project {project_id}")},
        "protocols": protocols
    })
}

fn exported_state<S: KvStore>(repo: &EntityRepository<S>) -> Value {
    let snapshot = ExportService::new(repo).export_all(None);
    json!({
        "projects": snapshot.projects,
        "globalTemplates": snapshot.global_templates,
        "globalPersonas": snapshot.global_personas,
    })
}

#[test]
fn empty_store_exports_an_empty_snapshot() {
    let repo = memory_repo();

    let snapshot = ExportService::new(&repo).export_all(None);
    let value = serde_json::to_value(&snapshot).unwrap();

    assert_eq!(snapshot.export_metadata.total_projects, 0);
    assert_eq!(snapshot.export_metadata.total_protocols, 0);
    assert_eq!(snapshot.export_metadata.total_manuscripts, 0);
    assert_eq!(snapshot.export_metadata.total_clinical_records, 0);
    assert_eq!(value["projects"], json!([]));
    assert_eq!(value["globalTemplates"], json!([]));
    assert_eq!(value["globalPersonas"], json!([]));
    assert_eq!(repo.store().write_count(), 0);
}

#[test]
fn metadata_counts_match_exported_arrays() {
    let repo = memory_repo();
    seed(&repo);

    let snapshot = ExportService::new(&repo).export_all(Some("nightly"));
    let meta = &snapshot.export_metadata;

    assert_eq!(meta.total_projects, snapshot.projects.len());
    assert_eq!(meta.total_protocols, 1);
    assert_eq!(meta.total_manuscripts, 1);
    assert_eq!(meta.total_clinical_records, 1);
    assert_eq!(meta.description.as_deref(), Some("nightly"));
    assert!(snapshot.counts_consistent());
}

#[test]
fn replace_reimport_restores_a_single_protocol() {
    let source = memory_repo();
    source.save(EntityKind::Project, &[json!({"id": "p1", "name": "P1"})], None);
    source.save(EntityKind::Protocol, &[json!({"id": "pr1"})], Some("p1"));
    let snapshot = ExportService::new(&source).export_all(None);

    let target = memory_repo();
    let result = ImportService::new(&target)
        .import_snapshot(&snapshot, ImportOptions::with_mode(MergeMode::Replace));

    assert!(result.success, "errors: {:?}", result.errors);
    let protocols = target.get_all(EntityKind::Protocol, Some("p1"));
    assert_eq!(protocols.len(), 1);
    assert_eq!(protocols[0]["id"], "pr1");
}

#[test]
fn replace_round_trip_through_sqlite_restores_every_collection() {
    let source = memory_repo();
    seed(&source);
    let json = studyvault_core::service::export_service::to_json(
        &ExportService::new(&source).export_all(None),
        true,
    )
    .unwrap();

    let conn = open_db_in_memory().unwrap();
    let target = EntityRepository::new(SqliteKvStore::new(&conn));
    let result = ImportService::new(&target)
        .import_json(&json, ImportOptions::with_mode(MergeMode::Replace));

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(exported_state(&target), exported_state(&source));
    assert_eq!(result.counts.projects, 2);
    assert_eq!(result.counts.protocols, 1);
    assert_eq!(result.counts.global_templates, 1);
    assert_eq!(result.counts.global_personas, 1);
}

#[test]
fn sequential_updates_keep_the_latest_record() {
    let repo = memory_repo();
    let service = ImportService::new(&repo);

    let first = snapshot_with(json!([bundle("p1", json!([{"id": "pr1", "name": "v1"}]))]));
    let second = snapshot_with(json!([bundle("p1", json!([{"id": "pr1", "name": "v2"}]))]));
    assert!(service.import_value(&first, ImportOptions::default()).success);
    assert!(service.import_value(&second, ImportOptions::default()).success);

    let protocols = repo.get_all(EntityKind::Protocol, Some("p1"));
    assert_eq!(protocols.len(), 1);
    assert_eq!(protocols[0]["name"], "v2");
}

#[test]
fn importing_the_same_snapshot_twice_with_update_is_idempotent() {
    let source = memory_repo();
    seed(&source);
    let snapshot = ExportService::new(&source).export_all(None);

    let target = memory_repo();
    let service = ImportService::new(&target);
    assert!(service.import_snapshot(&snapshot, ImportOptions::default()).success);
    let after_first = target.store().dump();
    let second = service.import_snapshot(&snapshot, ImportOptions::default());

    assert!(second.success);
    assert_eq!(target.store().dump(), after_first);
    assert_eq!(target.get_all(EntityKind::Protocol, Some("p1")).len(), 1);
}

#[test]
fn reimporting_flat_legacy_entries_with_update_is_idempotent() {
    let repo = memory_repo();
    let input = snapshot_with(json!([{
        "id": "flat-1",
        "projectName": "Flat study",
        "manuscripts": [{
            "id": "m-legacy",
            "title": "Draft",
            "content": {"introduction": "intro"},
            "sourceLibrary": [{"sourceId": "s1", "title": "Paper", "snippets": []}]
        }]
    }]));
    let service = ImportService::new(&repo);

    assert!(service.import_value(&input, ImportOptions::default()).success);
    let after_first = repo.store().dump();
    let second = service.import_value(&input, ImportOptions::default());

    assert!(second.success, "errors: {:?}", second.errors);
    assert_eq!(repo.store().dump(), after_first);
    let manuscript = &repo.get_all(EntityKind::Manuscript, Some("flat-1"))[0];
    assert_eq!(manuscript["projectMeta"]["createdAt"], 0);
    assert_eq!(manuscript["notebookContext"]["linkedSources"][0]["uploadedAt"], 0);
    assert!(repo.projects()[0]["createdAt"].is_string());
}

#[test]
fn excluded_sections_survive_a_replace_reimport() {
    let repo = memory_repo();
    seed(&repo);
    let options = ExportOptions {
        description: None,
        exclude: [ExportCategory::Personas, ExportCategory::GlobalTemplates].into(),
    };
    let json = studyvault_core::service::export_service::to_json(
        &ExportService::new(&repo).export_with(&options),
        false,
    )
    .unwrap();

    let result = ImportService::new(&repo).import_json(&json, ImportOptions::with_mode(MergeMode::Replace));

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(
        repo.get_all(EntityKind::Persona, Some("p2")),
        vec![json!({"id": "persona-1", "name": "Reviewer"})]
    );
    assert_eq!(repo.get_all(EntityKind::Template, None).len(), 1);
    assert_eq!(repo.get_all(EntityKind::Protocol, Some("p1")).len(), 1);
}

#[test]
fn replace_import_keeps_a_stored_project_whose_entry_failed() {
    let repo = memory_repo();
    seed(&repo);
    let input = snapshot_with(json!([
        {"project": {"id": "p1", "name": "Cardio"}, "protocols": {"bad": 1}},
        bundle("p3", json!([{"id": "pr3"}]))
    ]));

    let result = ImportService::new(&repo).import_value(&input, ImportOptions::with_mode(MergeMode::Replace));

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    let ids: Vec<Value> = repo.projects().iter().map(|project| project["id"].clone()).collect();
    assert_eq!(ids, vec![json!("p1"), json!("p3")]);
    assert_eq!(repo.projects()[0], json!({"id": "p1", "name": "Cardio", "status": "active"}));
    assert_eq!(repo.get_all(EntityKind::Protocol, Some("p1")).len(), 1);
    assert_eq!(repo.get_all(EntityKind::Protocol, Some("p3")).len(), 1);
}

#[test]
fn skip_mode_leaves_existing_records_untouched() {
    let repo = memory_repo();
    seed(&repo);
    let before = repo.store().dump();

    let input = json!({
        "exportMetadata": {"version": "1.0.0"},
        "projects": [bundle("p1", json!([{"id": "pr1", "name": "overwritten"}]))],
        "globalPersonas": [
            {"id": "gp-1", "name": "Changed"},
            {"id": "gp-2", "name": "New"}
        ]
    });
    let result = ImportService::new(&repo).import_value(&input, ImportOptions::with_mode(MergeMode::Skip));

    assert!(result.success);
    assert_eq!(result.counts.projects, 0);
    assert_eq!(result.counts.global_personas, 1);
    assert!(result
        .warnings
        .iter()
        .any(|warning| warning.contains("Skipped existing project")));
    for (key, value) in &before {
        if key != "clinical_global_personas" {
            assert_eq!(repo.store().dump().get(key), Some(value), "{key} changed");
        }
    }
    let personas = repo.get_all(EntityKind::Persona, None);
    assert_eq!(personas[0], json!({"id": "gp-1", "name": "Statistician"}));
    assert_eq!(personas[1]["id"], "gp-2");
}

#[test]
fn failing_project_marks_import_unsuccessful_but_siblings_land() {
    let repo = memory_repo();
    let input = snapshot_with(json!([
        {"project": {"name": "No id"}, "protocols": []},
        bundle("p2", json!([{"id": "pr2"}]))
    ]));

    let result = ImportService::new(&repo).import_value(&input, ImportOptions::default());

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("Failed to import project No id"));
    assert_eq!(repo.get_all(EntityKind::Protocol, Some("p2")).len(), 1);
    assert_eq!(result.counts.projects, 1);
}

#[test]
fn malformed_json_fails_without_writes() {
    let repo = memory_repo();

    let result = ImportService::new(&repo).import_json("{\"projects\": [", ImportOptions::default());

    assert!(!result.success);
    assert!(result.errors[0].starts_with("Failed to parse JSON"));
    assert_eq!(repo.store().write_count(), 0);
}

#[test]
fn missing_top_level_fields_abort_before_writes() {
    let repo = memory_repo();
    let service = ImportService::new(&repo);

    let no_metadata = service.import_value(&json!({"projects": []}), ImportOptions::default());
    let no_projects = service.import_value(
        &json!({"exportMetadata": {}, "projects": {}}),
        ImportOptions::default(),
    );

    assert!(!no_metadata.success);
    assert!(!no_projects.success);
    assert_eq!(repo.store().write_count(), 0);
}

#[test]
fn flat_entries_are_reconstructed_into_projects() {
    let repo = memory_repo();
    let input = snapshot_with(json!([{
        "id": "flat-1",
        "projectName": "Flat study",
        "protocols": [{"id": "pr-flat"}],
        "statisticalManifest": {"manifestMetadata": {"protocolId": "pr-flat"}}
    }]));

    let result = ImportService::new(&repo).import_value(&input, ImportOptions::default());

    assert!(result.success, "errors: {:?}", result.errors);
    let projects = repo.projects();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["name"], "Flat study");
    assert_eq!(repo.get_all(EntityKind::StatisticalManifest, Some("flat-1")).len(), 1);
}

#[test]
fn invalid_manuscripts_become_placeholders_and_bad_manifests_are_dropped() {
    let repo = memory_repo();
    let input = snapshot_with(json!([{
        "project": {"id": "p1", "name": "P1"},
        "manuscripts": [{"id": "m-bad", "content": "not an object"}],
        "statisticalManifests": [{"id": "no-metadata"}]
    }]));

    let result = ImportService::new(&repo).import_value(&input, ImportOptions::default());

    assert!(result.success);
    assert_eq!(result.warnings.len(), 2);
    let manuscripts = repo.get_all(EntityKind::Manuscript, Some("p1"));
    assert_eq!(manuscripts[0]["id"], "m-bad");
    assert_eq!(manuscripts[0]["importArtifact"], true);
    assert!(repo
        .get_all(EntityKind::StatisticalManifest, Some("p1"))
        .is_empty());
}

#[test]
fn non_object_manuscripts_and_manifests_do_not_block_the_project() {
    let repo = memory_repo();
    let input = snapshot_with(json!([{
        "project": {"id": "p1"},
        "protocols": [{"id": "pr1"}],
        "manuscripts": ["junk"],
        "statisticalManifests": [42]
    }]));

    let result = ImportService::new(&repo).import_value(&input, ImportOptions::default());

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.warnings.len(), 2, "{:?}", result.warnings);
    assert_eq!(repo.get_all(EntityKind::Protocol, Some("p1")).len(), 1);
    let manuscripts = repo.get_all(EntityKind::Manuscript, Some("p1"));
    assert_eq!(manuscripts.len(), 1);
    assert_eq!(manuscripts[0]["importArtifact"], true);
    assert!(repo
        .get_all(EntityKind::StatisticalManifest, Some("p1"))
        .is_empty());
}

#[test]
fn duplicate_version_ids_reject_the_bundle_when_validating() {
    let repo = memory_repo();
    let protocol = json!({
        "id": "pr1",
        "versions": [{"versionId": "v1"}, {"versionId": "v1"}]
    });
    let input = snapshot_with(json!([bundle("p1", json!([protocol]))]));

    let validated = ImportService::new(&repo).import_value(&input, ImportOptions::default());
    assert!(!validated.success);
    assert!(repo.projects().is_empty());

    let options = ImportOptions {
        validate_data: false,
        ..ImportOptions::default()
    };
    let unvalidated = ImportService::new(&repo).import_value(&input, options);
    assert!(unvalidated.success);
}

#[test]
fn locked_versions_survive_updates() {
    let repo = memory_repo();
    repo.save(EntityKind::Project, &[json!({"id": "p1"})], None);
    repo.save(
        EntityKind::Protocol,
        &[json!({
            "id": "pr1",
            "versions": [{
                "versionId": "v1",
                "locked": true,
                "schemaBlocks": [{"id": "b1"}]
            }]
        })],
        Some("p1"),
    );
    let input = snapshot_with(json!([bundle(
        "p1",
        json!([{"id": "pr1", "versions": [{"versionId": "v1", "locked": false, "schemaBlocks": []}]}])
    )]));

    let result = ImportService::new(&repo).import_value(&input, ImportOptions::default());

    assert!(result.success);
    assert_eq!(result.warnings.len(), 2);
    let stored = &repo.get_all(EntityKind::Protocol, Some("p1"))[0];
    assert_eq!(stored["versions"][0]["locked"], true);
    assert_eq!(stored["versions"][0]["schemaBlocks"], json!([{"id": "b1"}]));
}

#[test]
fn backup_first_allows_restoring_the_previous_state() {
    let repo = memory_repo();
    repo.save(EntityKind::Project, &[json!({"id": "p1", "name": "P1"})], None);
    repo.save(EntityKind::Protocol, &[json!({"id": "pr1", "name": "v1"})], Some("p1"));
    let service = ImportService::new(&repo);

    let options = ImportOptions {
        backup_first: true,
        ..ImportOptions::default()
    };
    let input = snapshot_with(json!([bundle("p1", json!([{"id": "pr1", "name": "v2"}]))]));
    assert!(service.import_value(&input, options).success);
    assert!(repo.store().get(IMPORT_BACKUP_KEY).unwrap().is_some());
    assert_eq!(repo.get_all(EntityKind::Protocol, Some("p1"))[0]["name"], "v2");

    let restored = service.restore_backup(MergeMode::Replace);

    assert!(restored.success, "errors: {:?}", restored.errors);
    assert_eq!(repo.get_all(EntityKind::Protocol, Some("p1"))[0]["name"], "v1");
}

#[test]
fn restore_without_backup_reports_an_error() {
    let repo = memory_repo();

    let result = ImportService::new(&repo).restore_backup(MergeMode::Update);

    assert!(!result.success);
    assert_eq!(result.errors, vec!["No import backup found".to_string()]);
}

#[test]
fn exported_json_parses_back_into_a_snapshot() {
    let repo = memory_repo();
    seed(&repo);
    let snapshot = ExportService::new(&repo)
        .with_exported_by("Dr. Rivera")
        .export_all(None);

    let json = studyvault_core::service::export_service::to_json(&snapshot, false).unwrap();
    let parsed: Snapshot = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed, snapshot);
    assert_eq!(parsed.export_metadata.exported_by, "Dr. Rivera");
}
