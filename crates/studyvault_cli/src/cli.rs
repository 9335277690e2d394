//! Command-line surface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use studyvault_core::{ExportCategory, MergeMode};

/// Top-level parser for the `studyvault` binary.
#[derive(Debug, Parser)]
#[command(
    name = "studyvault",
    version,
    about = "StudyVault - clinical study data export, import and migration"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// SQLite store file; overrides `storage.db_path`
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Export every project as one snapshot document
    Export(ExportArgs),
    /// Import a snapshot document
    Import(ImportArgs),
    /// Run pending data migrations and print their report
    Migrate,
    /// Show store usage and migration state
    Info,
    /// Re-import the snapshot saved by the last `import --backup`
    RestoreBackup {
        #[arg(long, default_value = "replace")]
        mode: MergeMode,
    },
    /// Export one protocol with its associated records
    ProtocolExport(ProtocolExportArgs),
    /// Import a single-protocol bundle into a project
    ProtocolImport(ProtocolImportArgs),
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Output file; stdout when omitted
    #[arg(long)]
    pub out: Option<PathBuf>,
    #[arg(long)]
    pub description: Option<String>,
    /// Section to leave empty (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<ExportCategory>,
    /// Single-line JSON instead of pretty-printed
    #[arg(long)]
    pub compact: bool,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    pub file: PathBuf,
    /// replace | update | skip; defaults to `import.merge_mode`
    #[arg(long)]
    pub mode: Option<MergeMode>,
    /// Skip pre-write bundle validation
    #[arg(long)]
    pub no_validate: bool,
    /// Save the current state before writing
    #[arg(long)]
    pub backup: bool,
}

#[derive(Debug, Args)]
pub struct ProtocolExportArgs {
    pub project: String,
    pub protocol: String,
    #[arg(long)]
    pub with_data: bool,
    #[arg(long)]
    pub with_manifests: bool,
    #[arg(long)]
    pub with_manuscripts: bool,
    /// Output directory; the file name is derived from the protocol
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ProtocolImportArgs {
    pub project: String,
    pub file: PathBuf,
    /// Always assign fresh protocol and version ids
    #[arg(long)]
    pub new_id: bool,
    /// Replace a stored protocol with the same id
    #[arg(long)]
    pub overwrite: bool,
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::{CommandFactory, Parser};
    use studyvault_core::{ExportCategory, MergeMode};

    #[test]
    fn clap_command_tree_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_options_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["studyvault", "import", "snap.json", "--mode", "skip", "--db", "/tmp/s.db"])
            .expect("cli should parse");

        assert_eq!(cli.db.as_deref(), Some(std::path::Path::new("/tmp/s.db")));
        let Command::Import(args) = cli.command else {
            panic!("expected import command");
        };
        assert_eq!(args.mode, Some(MergeMode::Skip));
        assert!(!args.backup);
    }

    #[test]
    fn export_exclusions_accept_both_spellings() {
        let cli = Cli::try_parse_from([
            "studyvault",
            "export",
            "--exclude",
            "clinical_data",
            "--exclude",
            "global-personas",
        ])
        .expect("cli should parse");

        let Command::Export(args) = cli.command else {
            panic!("expected export command");
        };
        assert_eq!(
            args.exclude,
            vec![ExportCategory::ClinicalData, ExportCategory::GlobalPersonas]
        );
    }

    #[test]
    fn unknown_merge_mode_is_rejected() {
        assert!(Cli::try_parse_from(["studyvault", "restore-backup", "--mode", "merge"]).is_err());
    }
}
