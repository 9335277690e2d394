use pretty_assertions::assert_eq;
use serde_json::json;
use studyvault_core::migrate::{
    has_legacy_protocols, legacy_protocol_count, restore_legacy_protocols,
    rollback_project_architecture,
};
use studyvault_core::model::project::DEFAULT_PROJECT_ID;
use studyvault_core::store::keys::{
    LEGACY_PROTOCOLS_ARCHIVE_KEY, LEGACY_PROTOCOLS_KEY, PROJECTS_KEY,
};
use studyvault_core::{
    run_cascade, run_stage, EntityKind, EntityRepository, KvStore, MemoryKvStore, MigrationError,
    StageId, StageOutcome,
};

fn single_project_store() -> EntityRepository<MemoryKvStore> {
    EntityRepository::new(MemoryKvStore::with_entries([
        ("clinical_protocols", r#"[{"id":"pr1","protocolNumber":"P-1"}]"#),
        ("clinical_personas", r#"[{"id":"pe1"}]"#),
    ]))
}

fn migrated_count(outcome: Option<&StageOutcome>) -> usize {
    match outcome {
        Some(StageOutcome::Migrated(report)) => report.migrated,
        other => panic!("expected a migrated stage, got {other:?}"),
    }
}

#[test]
fn cascade_walks_single_project_data_to_global_keys() {
    let repo = single_project_store();

    let report = run_cascade(&repo);

    assert!(report.is_clean());
    assert_eq!(migrated_count(report.outcome(StageId::ProjectArchitecture)), 2);
    assert_eq!(migrated_count(report.outcome(StageId::ProjectToProtocolScope)), 2);
    assert_eq!(
        report.outcome(StageId::LegacyProtocolStorage),
        Some(&StageOutcome::NothingToMigrate)
    );

    assert_eq!(repo.projects()[0]["id"], DEFAULT_PROJECT_ID);
    assert_eq!(
        repo.current_project().unwrap().as_deref(),
        Some(DEFAULT_PROJECT_ID)
    );
    assert_eq!(
        repo.get_all(EntityKind::Protocol, Some(DEFAULT_PROJECT_ID)),
        vec![json!({"id": "pr1", "protocolNumber": "P-1"})]
    );
    let global = repo.get_all(EntityKind::Protocol, None);
    assert_eq!(global.len(), 1);
    assert_eq!(
        global[0]["description"],
        "Initial study migrated from previous version"
    );
    assert_eq!(repo.get_all(EntityKind::Persona, None).len(), 1);
    assert!(repo.store().get("clinical_protocols").unwrap().is_some());
}

#[test]
fn second_cascade_run_performs_no_writes() {
    let repo = single_project_store();
    run_cascade(&repo);
    let writes = repo.store().write_count();

    let report = run_cascade(&repo);

    assert_eq!(repo.store().write_count(), writes);
    for stage in StageId::ORDERED {
        assert_eq!(report.outcome(stage), Some(&StageOutcome::AlreadyComplete));
    }
}

#[test]
fn empty_store_only_records_flags() {
    let repo = EntityRepository::new(MemoryKvStore::new());

    let report = run_cascade(&repo);

    for stage in StageId::ORDERED {
        assert_eq!(report.outcome(stage), Some(&StageOutcome::NothingToMigrate));
        assert!(repo.flag_is(stage.flag_key(), stage.flag_value()).unwrap());
    }
    assert_eq!(repo.store().get(PROJECTS_KEY).unwrap().as_deref(), Some("[]"));
}

#[test]
fn set_flag_short_circuits_a_stage() {
    let repo = single_project_store();
    repo.set_raw(
        StageId::ProjectArchitecture.flag_key(),
        StageId::ProjectArchitecture.flag_value(),
    )
    .unwrap();
    let writes = repo.store().write_count();

    let outcome = run_stage(&repo, StageId::ProjectArchitecture).unwrap();

    assert_eq!(outcome, StageOutcome::AlreadyComplete);
    assert_eq!(repo.store().write_count(), writes);
    assert!(repo.projects().is_empty());
}

#[test]
fn legacy_protocols_already_present_are_skipped_and_archived() {
    let repo = EntityRepository::new(MemoryKvStore::with_entries([
        (LEGACY_PROTOCOLS_KEY, r#"[{"id":"x"}]"#),
        (PROJECTS_KEY, r#"[{"id":"p1"}]"#),
        ("clinical_project_p1_protocols", r#"[{"id":"x"}]"#),
    ]));

    let outcome = run_stage(&repo, StageId::LegacyProtocolStorage).unwrap();

    let StageOutcome::Migrated(report) = outcome else {
        panic!("expected migration, got {outcome:?}");
    };
    assert_eq!(report.migrated, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(repo.store().get(LEGACY_PROTOCOLS_KEY).unwrap(), None);
    assert_eq!(
        repo.store()
            .get(LEGACY_PROTOCOLS_ARCHIVE_KEY)
            .unwrap()
            .as_deref(),
        Some(r#"[{"id":"x"}]"#)
    );
    assert_eq!(repo.get_all(EntityKind::Protocol, Some("p1")).len(), 1);
}

#[test]
fn legacy_protocols_land_in_the_current_project() {
    let repo = EntityRepository::new(MemoryKvStore::with_entries([
        (LEGACY_PROTOCOLS_KEY, r#"[{"id":"a"},{"id":"b"}]"#),
        (PROJECTS_KEY, r#"[{"id":"p1"},{"id":"p2"}]"#),
        ("clinical_current_project", "p2"),
    ]));

    run_stage(&repo, StageId::LegacyProtocolStorage).unwrap();

    assert!(repo.get_all(EntityKind::Protocol, Some("p1")).is_empty());
    assert_eq!(repo.get_all(EntityKind::Protocol, Some("p2")).len(), 2);
}

#[test]
fn legacy_protocols_wait_for_a_project() {
    let repo = EntityRepository::new(MemoryKvStore::with_entries([(
        LEGACY_PROTOCOLS_KEY,
        r#"[{"id":"x"}]"#,
    )]));

    let report = run_cascade(&repo);

    assert!(matches!(
        report.outcome(StageId::LegacyProtocolStorage),
        Some(StageOutcome::Deferred { .. })
    ));
    let stage = StageId::LegacyProtocolStorage;
    assert!(!repo.flag_is(stage.flag_key(), stage.flag_value()).unwrap());
    assert!(has_legacy_protocols(&repo));
}

#[test]
fn corrupt_legacy_payload_leaves_the_flag_unset() {
    let repo = EntityRepository::new(MemoryKvStore::with_entries([
        (LEGACY_PROTOCOLS_KEY, "{broken"),
        (PROJECTS_KEY, r#"[{"id":"p1"}]"#),
    ]));

    let err = run_stage(&repo, StageId::LegacyProtocolStorage).unwrap_err();

    assert!(matches!(err, MigrationError::CorruptLegacyData { .. }));
    let stage = StageId::LegacyProtocolStorage;
    assert!(!repo.flag_is(stage.flag_key(), stage.flag_value()).unwrap());
    assert_eq!(
        repo.store().get(LEGACY_PROTOCOLS_KEY).unwrap().as_deref(),
        Some("{broken")
    );
    assert_eq!(legacy_protocol_count(&repo), 0);

    let report = run_cascade(&repo);
    assert!(!report.is_clean());
    assert!(report.outcome(StageId::ProjectArchitecture).is_some());
}

#[test]
fn restoring_legacy_protocols_reopens_stage_three() {
    let repo = EntityRepository::new(MemoryKvStore::with_entries([
        (LEGACY_PROTOCOLS_KEY, r#"[{"id":"x"}]"#),
        (PROJECTS_KEY, r#"[{"id":"p1"}]"#),
    ]));
    run_stage(&repo, StageId::LegacyProtocolStorage).unwrap();
    assert!(!has_legacy_protocols(&repo));

    assert!(restore_legacy_protocols(&repo).unwrap());

    assert_eq!(legacy_protocol_count(&repo), 1);
    let stage = StageId::LegacyProtocolStorage;
    assert!(!repo.flag_is(stage.flag_key(), stage.flag_value()).unwrap());
}

#[test]
fn restoring_without_archive_is_a_no_op() {
    let repo = EntityRepository::new(MemoryKvStore::new());

    assert!(!restore_legacy_protocols(&repo).unwrap());
    assert_eq!(repo.store().write_count(), 0);
}

#[test]
fn project_architecture_rollback_allows_a_rerun() {
    let repo = single_project_store();
    run_stage(&repo, StageId::ProjectArchitecture).unwrap();

    rollback_project_architecture(&repo).unwrap();

    assert!(repo.projects().is_empty());
    assert_eq!(repo.current_project().unwrap(), None);
    let rerun = run_stage(&repo, StageId::ProjectArchitecture).unwrap();
    assert!(matches!(rerun, StageOutcome::Migrated(_)));
    assert_eq!(repo.projects().len(), 1);
}
