// crates/llama-dashboard-store/src/config.rs
// ============================================================================
// Module: Store Configuration
// Description: Connection and retention settings for the dashboard store.
// Purpose: Load and validate store settings from TOML with safe defaults.
// Dependencies: serde, toml, thiserror
// ============================================================================

//! ## Overview
//! [`StoreConfig`] carries the database path, pragma choices, and the
//! metrics retention window. It can be built in code or loaded from a TOML
//! file whose `[store]` table mirrors the struct. Missing keys fall back to
//! the defaults documented on each field.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "LLAMA_DASHBOARD_CONFIG";
/// Config file used when neither an explicit path nor the env var is set.
pub const DEFAULT_CONFIG_NAME: &str = "llama-dashboard.toml";
/// Database path used when the config does not name one.
pub const DEFAULT_DB_PATH: &str = "data/llama-dashboard.db";
/// Default busy timeout (ms).
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default page cache budget (KiB), 64 MiB.
pub const DEFAULT_CACHE_SIZE_KIB: u32 = 64 * 1024;
/// Default metrics retention window (minutes).
pub const DEFAULT_METRICS_RETENTION_MINUTES: u32 = 10;
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Pragma Modes
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (for filesystems without shared memory).
    Delete,
}

impl JournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Normal synchronous mode; safe under WAL.
    #[default]
    Normal,
    /// Full synchronous mode.
    Full,
}

impl SyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Full => "full",
        }
    }
}

// ============================================================================
// SECTION: Store Config
// ============================================================================

/// Configuration for the dashboard store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Path to the `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: JournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SyncMode,
    /// Page cache budget in KiB.
    #[serde(default = "default_cache_size_kib")]
    pub cache_size_kib: u32,
    /// Keep temporary tables and indices in memory.
    #[serde(default = "default_true")]
    pub temp_store_memory: bool,
    /// Metrics rows older than this many minutes are pruned on write.
    #[serde(default = "default_metrics_retention_minutes")]
    pub metrics_retention_minutes: u32,
}

impl StoreConfig {
    /// Returns a default configuration for the given database path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::default(),
            sync_mode: SyncMode::default(),
            cache_size_kib: DEFAULT_CACHE_SIZE_KIB,
            temp_store_memory: true,
            metrics_retention_minutes: DEFAULT_METRICS_RETENTION_MINUTES,
        }
    }

    /// Loads configuration from disk.
    ///
    /// The file is resolved from `path`, then `LLAMA_DASHBOARD_CONFIG`, then
    /// `llama-dashboard.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed, or fails
    /// validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_config_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses configuration from TOML text containing a `[store]` table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let config = file.store;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.path must not be empty".to_string()));
        }
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store.busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.metrics_retention_minutes == 0 {
            return Err(ConfigError::Invalid(
                "store.metrics_retention_minutes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the metrics retention window in milliseconds.
    #[must_use]
    pub fn metrics_retention_ms(&self) -> i64 {
        i64::from(self.metrics_retention_minutes) * 60_000
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DB_PATH)
    }
}

/// On-disk configuration file layout.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    /// Store settings.
    #[serde(default)]
    store: StoreConfig,
}

/// Returns the default database path.
fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default page cache budget.
const fn default_cache_size_kib() -> u32 {
    DEFAULT_CACHE_SIZE_KIB
}

/// Returns the default metrics retention window.
const fn default_metrics_retention_minutes() -> u32 {
    DEFAULT_METRICS_RETENTION_MINUTES
}

/// Serde helper for boolean fields defaulting to true.
const fn default_true() -> bool {
    true
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// Config file is not valid TOML for the expected layout.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Config values are out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the argument or environment.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved config path against length limits.
fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::expect_used,
        clippy::unwrap_used,
        reason = "Test assertions use expect/unwrap for clarity."
    )]

    use std::path::PathBuf;

    use super::ConfigError;
    use super::JournalMode;
    use super::StoreConfig;
    use super::SyncMode;

    #[test]
    fn empty_file_yields_defaults() {
        let config = StoreConfig::from_toml_str("").expect("defaults");
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert_eq!(config.cache_size_kib, 65_536);
        assert_eq!(config.metrics_retention_ms(), 600_000);
    }

    #[test]
    fn store_table_overrides_fields() {
        let config = StoreConfig::from_toml_str(
            "[store]\npath = \"/tmp/dash.db\"\njournal_mode = \"delete\"\nsync_mode = \
             \"full\"\nmetrics_retention_minutes = 30\n",
        )
        .expect("parse");
        assert_eq!(config.path, PathBuf::from("/tmp/dash.db"));
        assert_eq!(config.journal_mode, JournalMode::Delete);
        assert_eq!(config.sync_mode, SyncMode::Full);
        assert_eq!(config.metrics_retention_minutes, 30);
        assert!(config.temp_store_memory);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = StoreConfig::from_toml_str("[store]\nwal = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_retention_is_invalid() {
        let err =
            StoreConfig::from_toml_str("[store]\nmetrics_retention_minutes = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
