//! Layered engine configuration.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`STUDYVAULT_*`, `__` separates sections)
//! 2. Optional TOML file passed by the caller
//! 3. Built-in defaults
//!
//! `STUDYVAULT_IMPORT__MERGE_MODE=skip` maps to `import.merge_mode`.

use crate::logging::default_log_level;
use crate::service::export_service::DEFAULT_EXPORTED_BY;
use crate::service::import_service::ImportOptions;
use crate::service::merge::MergeMode;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_PREFIX: &str = "STUDYVAULT_";

const DEFAULT_DB_FILE: &str = "studyvault.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] figment::Error),
    #[error("invalid configuration value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// File logging is enabled only when a directory is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConfig {
    pub merge_mode: MergeMode,
    pub validate_data: bool,
    pub backup_first: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        let options = ImportOptions::default();
        Self {
            merge_mode: options.merge_mode,
            validate_data: options.validate_data,
            backup_first: options.backup_first,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    pub exported_by: String,
    pub pretty: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            exported_by: DEFAULT_EXPORTED_BY.to_string(),
            pretty: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

impl EngineConfig {
    /// Loads and validates configuration from every source.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Provider chain; public so tests can layer extra providers.
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dir) = &self.logging.dir {
            if !dir.is_absolute() {
                return Err(ConfigError::InvalidValue {
                    field: "logging.dir".to_string(),
                    reason: format!("must be an absolute path, got `{}`", dir.display()),
                });
            }
        }
        if self.export.exported_by.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "export.exported_by".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Default import options derived from the `import` section.
    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            merge_mode: self.import.merge_mode,
            validate_data: self.import.validate_data,
            backup_first: self.import.backup_first,
        }
    }
}
