//! Command handlers.
//!
//! Every handler prints one JSON document on stdout. Diagnostics go to the
//! log file when `logging.dir` is configured.

use crate::cli::{Cli, Command, ExportArgs, ImportArgs, ProtocolExportArgs, ProtocolImportArgs};
use anyhow::Context;
use log::{info, warn};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use studyvault_core::db::open_db;
use studyvault_core::migrate::legacy_protocol_count;
use studyvault_core::service::export_service::to_json;
use studyvault_core::service::protocol_bundle::{
    suggested_file_name, ProtocolExportOptions, ProtocolImportOptions,
};
use studyvault_core::store::storage_info;
use studyvault_core::{
    core_version, init_from_config, run_cascade, CascadeReport, EngineConfig, EntityRepository,
    ExportOptions, ExportService, ImportResult, ImportService, KvStore, MergeMode,
    ProtocolBundleService, SqliteKvStore, StageId,
};

/// Runs one parsed invocation.
pub fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config =
        EngineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }
    if let Err(err) = init_from_config(&config.logging) {
        eprintln!("studyvault warning: file logging disabled: {err}");
    }

    let conn = open_db(&config.storage.db_path).with_context(|| {
        format!("failed to open store `{}`", config.storage.db_path.display())
    })?;
    let repo = EntityRepository::new(SqliteKvStore::new(&conn));

    if matches!(cli.command, Command::Info) {
        print_json(&info(&repo, &config)?)?;
        return Ok(ExitCode::SUCCESS);
    }

    let cascade = run_cascade(&repo);
    if !cascade.is_clean() {
        warn!("event=cli_migrate module=cli status=warn stages_failed=true");
    }

    match cli.command {
        Command::Export(args) => export(&repo, &config, &args),
        Command::Import(args) => import(&repo, &config, &args),
        Command::Migrate => migrate(&cascade),
        Command::Info => Ok(ExitCode::SUCCESS),
        Command::RestoreBackup { mode } => restore_backup(&repo, &config, mode),
        Command::ProtocolExport(args) => protocol_export(&repo, &config, &args),
        Command::ProtocolImport(args) => protocol_import(&repo, &config, &args),
    }
}

fn export<S: KvStore>(
    repo: &EntityRepository<S>,
    config: &EngineConfig,
    args: &ExportArgs,
) -> anyhow::Result<ExitCode> {
    let options = ExportOptions {
        description: args.description.clone(),
        exclude: args.exclude.iter().copied().collect(),
    };
    let snapshot = ExportService::new(repo)
        .with_exported_by(config.export.exported_by.clone())
        .export_with(&options);
    let document = to_json(&snapshot, config.export.pretty && !args.compact)?;

    match &args.out {
        Some(path) => {
            write_file(path, &document)?;
            print_json(&json!({
                "path": path.display().to_string(),
                "bytes": document.len(),
                "exportMetadata": snapshot.export_metadata,
            }))?;
        }
        None => println!("{document}"),
    }
    Ok(ExitCode::SUCCESS)
}

fn import<S: KvStore>(
    repo: &EntityRepository<S>,
    config: &EngineConfig,
    args: &ImportArgs,
) -> anyhow::Result<ExitCode> {
    let document = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read `{}`", args.file.display()))?;
    let mut options = config.import_options();
    if let Some(mode) = args.mode {
        options.merge_mode = mode;
    }
    if args.no_validate {
        options.validate_data = false;
    }
    if args.backup {
        options.backup_first = true;
    }

    let result = ImportService::new(repo)
        .with_exported_by(config.export.exported_by.clone())
        .import_json(&document, options);
    report_import(&result)
}

fn migrate(cascade: &CascadeReport) -> anyhow::Result<ExitCode> {
    print_json(cascade)?;
    Ok(if cascade.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn info<S: KvStore>(repo: &EntityRepository<S>, config: &EngineConfig) -> anyhow::Result<Value> {
    let mut flags = serde_json::Map::new();
    for stage in StageId::ORDERED {
        flags.insert(
            stage.name().to_string(),
            Value::Bool(repo.flag_is(stage.flag_key(), stage.flag_value())?),
        );
    }
    Ok(json!({
        "coreVersion": core_version(),
        "dbPath": config.storage.db_path.display().to_string(),
        "projects": repo.projects().len(),
        "currentProject": repo.current_project()?,
        "legacyProtocols": legacy_protocol_count(repo),
        "migrations": flags,
        "storage": storage_info(repo.store())?,
    }))
}

fn restore_backup<S: KvStore>(
    repo: &EntityRepository<S>,
    config: &EngineConfig,
    mode: MergeMode,
) -> anyhow::Result<ExitCode> {
    let result = ImportService::new(repo)
        .with_exported_by(config.export.exported_by.clone())
        .restore_backup(mode);
    report_import(&result)
}

fn protocol_export<S: KvStore>(
    repo: &EntityRepository<S>,
    config: &EngineConfig,
    args: &ProtocolExportArgs,
) -> anyhow::Result<ExitCode> {
    let options = ProtocolExportOptions {
        include_clinical_data: args.with_data,
        include_manifests: args.with_manifests,
        include_manuscripts: args.with_manuscripts,
    };
    let bundle = ProtocolBundleService::new(repo, config.export.exported_by.clone())
        .export_protocol(&args.project, &args.protocol, options)?;
    let document = if config.export.pretty {
        serde_json::to_string_pretty(&bundle)?
    } else {
        serde_json::to_string(&bundle)?
    };

    match &args.out_dir {
        Some(dir) => {
            let today = chrono::Local::now().date_naive();
            let path = dir.join(suggested_file_name(&bundle.protocol, today));
            write_file(&path, &document)?;
            print_json(&json!({
                "path": path.display().to_string(),
                "bytes": document.len(),
            }))?;
        }
        None => println!("{document}"),
    }
    Ok(ExitCode::SUCCESS)
}

fn protocol_import<S: KvStore>(
    repo: &EntityRepository<S>,
    config: &EngineConfig,
    args: &ProtocolImportArgs,
) -> anyhow::Result<ExitCode> {
    let document = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read `{}`", args.file.display()))?;
    let bundle: Value = serde_json::from_str(&document)
        .with_context(|| format!("`{}` is not valid JSON", args.file.display()))?;

    let options = ProtocolImportOptions {
        generate_new_id: args.new_id,
        overwrite_existing: args.overwrite,
        import_clinical_data: true,
        import_manifests: true,
        import_manuscripts: true,
    };
    let report = ProtocolBundleService::new(repo, config.export.exported_by.clone())
        .import_protocol(&args.project, &bundle, options)?;
    print_json(&report)?;
    Ok(ExitCode::SUCCESS)
}

fn report_import(result: &ImportResult) -> anyhow::Result<ExitCode> {
    info!(
        "event=cli_import module=cli status={} errors={} warnings={}",
        if result.success { "ok" } else { "error" },
        result.errors.len(),
        result.warnings.len()
    );
    print_json(result)?;
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn write_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write `{}`", path.display()))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
