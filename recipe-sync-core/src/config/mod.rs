//! Configuration for recipe-sync
//!
//! Layered the usual way: built-in defaults, then an optional TOML file, then
//! `RECIPE_SYNC_<SECTION>_<KEY>` environment overrides, then `validate()`.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

mod error;

pub use error::ConfigError;

use crate::core_export::EXPORT_FILE_NAME;
use crate::core_store::{
    MemorySelectionStore, RestSelectionStore, RestStoreConfig, SelectionStore,
};
use crate::logging::{LogConfig, LogLevel};

const ENV_PREFIX: &str = "RECIPE_SYNC";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

/// Where the static catalog comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// File path or http(s) URL of the catalog JSON
    pub path: String,
}

/// Which remote selection store to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Rest,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "rest" => Ok(StoreBackend::Rest),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown store backend: {}",
                other
            ))),
        }
    }
}

/// Remote selection store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Base URL of the PostgREST endpoint (rest backend only)
    pub url: Option<String>,

    pub api_key: Option<String>,

    pub table: String,

    /// Natural key column used as the upsert conflict target
    pub conflict_key: String,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How often the rest backend polls for changes made by other clients
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

/// Reconciliation actor sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Capacity of the handle -> actor command queue
    pub command_buffer: usize,

    /// Capacity of the outward report queue; reports beyond it are dropped
    pub report_buffer: usize,

    /// Upper bound on inputs folded into one reconciliation pass
    pub max_batch: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub file_name: String,
    pub pretty: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    pub json_format: bool,

    pub with_target: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: "public/recipes.json".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: None,
            api_key: None,
            table: "checked_states".to_string(),
            conflict_key: "recipe_name".to_string(),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            command_buffer: 64,
            report_buffer: 256,
            max_batch: 32,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            file_name: EXPORT_FILE_NAME.to_string(),
            pretty: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e)))
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(raw)
        .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e)))
}

impl Config {
    /// Defaults overlaid with `RECIPE_SYNC_*` environment variables
    ///
    /// Example: RECIPE_SYNC_STORE_URL=https://xyz.supabase.co
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// File (if given) then environment, validated once at the end
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay process environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Overlay values from `lookup`, keyed by full variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |section: &str, key: &str| {
            let name = format!("{}_{}_{}", ENV_PREFIX, section, key);
            lookup(&name).map(|value| (name, value))
        };

        if let Some((_, v)) = var("CATALOG", "PATH") {
            self.catalog.path = v;
        }

        if let Some((k, v)) = var("STORE", "BACKEND") {
            self.store.backend = parse_env(&k, &v)?;
        }
        if let Some((_, v)) = var("STORE", "URL") {
            self.store.url = Some(v);
        }
        if let Some((_, v)) = var("STORE", "API_KEY") {
            self.store.api_key = Some(v);
        }
        if let Some((_, v)) = var("STORE", "TABLE") {
            self.store.table = v;
        }
        if let Some((_, v)) = var("STORE", "CONFLICT_KEY") {
            self.store.conflict_key = v;
        }
        if let Some((k, v)) = var("STORE", "REQUEST_TIMEOUT") {
            self.store.request_timeout = parse_duration(&k, &v)?;
        }
        if let Some((k, v)) = var("STORE", "POLL_INTERVAL") {
            self.store.poll_interval = parse_duration(&k, &v)?;
        }

        if let Some((k, v)) = var("SYNC", "COMMAND_BUFFER") {
            self.sync.command_buffer = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = var("SYNC", "REPORT_BUFFER") {
            self.sync.report_buffer = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = var("SYNC", "MAX_BATCH") {
            self.sync.max_batch = parse_env(&k, &v)?;
        }

        if let Some((_, v)) = var("EXPORT", "FILE_NAME") {
            self.export.file_name = v;
        }
        if let Some((k, v)) = var("EXPORT", "PRETTY") {
            self.export.pretty = parse_env(&k, &v)?;
        }

        if let Some((_, v)) = var("LOGGING", "LEVEL") {
            self.logging.level = v;
        }
        if let Some((k, v)) = var("LOGGING", "JSON_FORMAT") {
            self.logging.json_format = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = var("LOGGING", "WITH_TARGET") {
            self.logging.with_target = parse_env(&k, &v)?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog.path.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "catalog.path must not be empty".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Rest
            && self.store.url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::ValidationFailed(
                "store.url is required for the rest backend".to_string(),
            ));
        }

        if self.store.table.is_empty() || self.store.conflict_key.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "store.table and store.conflict_key must not be empty".to_string(),
            ));
        }

        if self.store.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "store.poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.sync.command_buffer == 0 || self.sync.report_buffer == 0 || self.sync.max_batch == 0 {
            return Err(ConfigError::ValidationFailed(
                "sync buffers and max_batch must be greater than 0".to_string(),
            ));
        }

        if self.export.file_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "export.file_name must not be empty".to_string(),
            ));
        }

        if LogLevel::from_str(&self.logging.level).is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }

    /// Where `export` writes when no explicit path is given
    pub fn export_path(&self) -> PathBuf {
        PathBuf::from(&self.export.file_name)
    }
}

impl StoreConfig {
    /// Build the configured selection store
    pub fn build_store(&self) -> Result<Arc<dyn SelectionStore>, ConfigError> {
        match self.backend {
            StoreBackend::Memory => Ok(Arc::new(MemorySelectionStore::new())),
            StoreBackend::Rest => {
                let url = self.url.clone().ok_or_else(|| {
                    ConfigError::ValidationFailed("store.url is required for the rest backend".to_string())
                })?;
                let rest = RestStoreConfig {
                    url,
                    api_key: self.api_key.clone(),
                    table: self.table.clone(),
                    conflict_key: self.conflict_key.clone(),
                    request_timeout: self.request_timeout,
                    poll_interval: self.poll_interval,
                };
                let store = RestSelectionStore::new(rest)
                    .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
                Ok(Arc::new(store))
            }
        }
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self) -> Result<LogConfig, ConfigError> {
        let level = LogLevel::from_str(&self.level)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        Ok(LogConfig::new(level)
            .with_target(self.with_target)
            .json_format(self.json_format))
    }
}
