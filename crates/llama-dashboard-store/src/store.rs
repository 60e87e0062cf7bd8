// crates/llama-dashboard-store/src/store.rs
// ============================================================================
// Module: Dashboard Store
// Description: Long-lived, thread-safe handle over the dashboard database.
// Purpose: Serialize access to one connection and stamp writes with a clock.
// Dependencies: rusqlite
// ============================================================================

//! ## Overview
//! [`DashboardStore`] owns one connection behind a mutex, so operations run
//! one at a time in call order. Each write takes its timestamp from the
//! store's [`Clock`]. The module-level functions in the other modules stay
//! available for callers that manage their own connection; see
//! [`with_connection`] for the open-operate-close form.
//!
//! ## Invariants
//! - `close` checkpoints the WAL before releasing the file.
//! - A poisoned mutex surfaces as [`StoreError::Db`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::config::StoreConfig;
use crate::connection;
use crate::connection::CheckpointStats;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::extensions;
use crate::extensions::CompleteModelConfig;
use crate::extensions::ExtensionRecord;
use crate::extensions::FitParams;
use crate::extensions::ModelExtension;
use crate::extensions::ServerConfig;
use crate::extensions::ServerConfigRecord;
use crate::maintenance;
use crate::maintenance::ClearReport;
use crate::maintenance::ImportReport;
use crate::metadata;
use crate::metadata::MetadataEntry;
use crate::metrics;
use crate::metrics::MetricSample;
use crate::metrics::MetricSampleInput;
use crate::models;
use crate::models::Model;
use crate::models::ModelFilter;
use crate::models::ModelPatch;
use crate::models::NewModel;

// ============================================================================
// SECTION: Store
// ============================================================================

/// Thread-safe dashboard database handle.
///
/// # Invariants
/// - All connection access is serialized through the mutex.
pub struct DashboardStore {
    /// Store configuration.
    config: StoreConfig,
    /// Shared connection guarded by a mutex.
    connection: Mutex<Connection>,
    /// Timestamp source for writes.
    clock: Arc<dyn Clock>,
}

impl DashboardStore {
    /// Opens the store with the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be opened or has an
    /// unsupported schema version.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Opens the store with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be opened or has an
    /// unsupported schema version.
    pub fn open_with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        config.validate().map_err(|err| StoreError::Invalid(err.to_string()))?;
        let connection = connection::open(&config, clock.now_millis())?;
        Ok(Self {
            config,
            connection: Mutex::new(connection),
            clock,
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Checkpoints the WAL and closes the connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] when the engine refuses to close.
    pub fn close(self) -> StoreResult<()> {
        let connection =
            self.connection.into_inner().map_err(|_| StoreError::Db("mutex poisoned".to_string()))?;
        connection::close(connection)
    }

    /// Runs `f` with exclusive access to the connection.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection, i64) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard =
            self.connection.lock().map_err(|_| StoreError::Db("mutex poisoned".to_string()))?;
        f(&mut guard, self.clock.now_millis())
    }

    // ------------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------------

    /// Records a metrics sample and prunes expired samples.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    pub fn record_metrics(&self, sample: &MetricSampleInput) -> StoreResult<i64> {
        let retention_ms = self.config.metrics_retention_ms();
        self.with_conn(|conn, now| metrics::record(conn, sample, now, retention_ms))
    }

    /// Returns samples inserted within the last `minutes`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn metrics_history(&self, minutes: u32) -> StoreResult<Vec<MetricSample>> {
        self.with_conn(|conn, now| metrics::history(conn, minutes, now))
    }

    /// Returns the most recently inserted sample.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn latest_metrics(&self) -> StoreResult<Option<MetricSample>> {
        self.with_conn(|conn, _| metrics::latest(conn))
    }

    /// Returns the number of retained samples.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn metrics_count(&self) -> StoreResult<u64> {
        self.with_conn(|conn, _| metrics::count(conn))
    }

    // ------------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------------

    /// Creates a model and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] for a blank name.
    pub fn create_model(&self, model: &NewModel) -> StoreResult<i64> {
        self.with_conn(|conn, now| models::create(conn, model, now))
    }

    /// Returns model `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn model(&self, id: i64) -> StoreResult<Option<Model>> {
        self.with_conn(|conn, _| models::get(conn, id))
    }

    /// Returns the first model named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn model_by_name(&self, name: &str) -> StoreResult<Option<Model>> {
        self.with_conn(|conn, _| models::get_by_name(conn, name))
    }

    /// Lists models matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn list_models(&self, filter: &ModelFilter) -> StoreResult<Vec<Model>> {
        self.with_conn(|conn, _| models::list(conn, filter))
    }

    /// Applies `patch` to model `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update fails.
    pub fn update_model(&self, id: i64, patch: &ModelPatch) -> StoreResult<()> {
        self.with_conn(|conn, now| models::update(conn, id, patch, now))
    }

    /// Deletes model `id` and its extension rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    pub fn delete_model(&self, id: i64) -> StoreResult<()> {
        self.with_conn(|conn, _| models::delete(conn, id))
    }

    /// Deletes every model and extension row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    pub fn delete_all_models(&self) -> StoreResult<u64> {
        self.with_conn(|conn, _| models::delete_all(conn))
    }

    /// Returns the number of models.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn model_count(&self) -> StoreResult<u64> {
        self.with_conn(|conn, _| models::count(conn))
    }

    // ------------------------------------------------------------------------
    // Extensions
    // ------------------------------------------------------------------------

    /// Saves the `T` extension row for `model_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConstraintViolation`] when the model is missing.
    pub fn save_extension<T: ModelExtension>(&self, model_id: i64, record: &T) -> StoreResult<()> {
        self.with_conn(|conn, now| extensions::save_extension(conn, model_id, record, now))
    }

    /// Returns the `T` extension row for `model_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    pub fn extension<T: ModelExtension>(
        &self,
        model_id: i64,
    ) -> StoreResult<Option<ExtensionRecord<T>>> {
        self.with_conn(|conn, _| extensions::get_extension(conn, model_id))
    }

    /// Deletes the `T` extension row for `model_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    pub fn delete_extension<T: ModelExtension>(&self, model_id: i64) -> StoreResult<()> {
        self.with_conn(|conn, _| extensions::delete_extension::<T>(conn, model_id))
    }

    /// Returns model `id` with every extension row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when any read fails.
    pub fn complete_model_config(&self, id: i64) -> StoreResult<Option<CompleteModelConfig>> {
        self.with_conn(|conn, _| extensions::complete_model_config(conn, id))
    }

    /// Saves fit statistics and marks the model analyzed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConstraintViolation`] when the model is missing.
    pub fn save_fit_params(&self, model_id: i64, params: &FitParams) -> StoreResult<()> {
        self.with_conn(|conn, now| extensions::save_fit_params(conn, model_id, params, now))
    }

    /// Returns true when the model file should be analyzed again.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the model lookup fails.
    pub fn should_reanalyze_fit_params(&self, model_id: i64, model_path: &Path) -> StoreResult<bool> {
        self.with_conn(|conn, _| {
            extensions::should_reanalyze_fit_params(conn, model_id, model_path)
        })
    }

    /// Saves the global server configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    pub fn save_server_config(&self, config: &ServerConfig) -> StoreResult<()> {
        self.with_conn(|conn, now| extensions::save_server_config(conn, config, now))
    }

    /// Returns the global server configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    pub fn server_config(&self) -> StoreResult<Option<ServerConfigRecord>> {
        self.with_conn(|conn, _| extensions::server_config(conn))
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    /// Sets metadata `key` to `value`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    pub fn set_metadata(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_conn(|conn, now| metadata::set(conn, key, value, now))
    }

    /// Returns metadata `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn metadata(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_conn(|conn, _| metadata::get(conn, key))
    }

    /// Returns metadata `key` with its write time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn metadata_entry(&self, key: &str) -> StoreResult<Option<MetadataEntry>> {
        self.with_conn(|conn, _| metadata::entry(conn, key))
    }

    /// Deletes metadata `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    pub fn delete_metadata(&self, key: &str) -> StoreResult<()> {
        self.with_conn(|conn, _| metadata::delete(conn, key))
    }

    /// Stores `value` as JSON under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when serialization or the write fails.
    pub fn set_metadata_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        self.with_conn(|conn, now| metadata::set_json(conn, key, value, now))
    }

    /// Returns `key` decoded from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the stored value does not decode.
    pub fn metadata_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        self.with_conn(|conn, _| metadata::get_json(conn, key))
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Checkpoints the WAL and compacts the database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] when the checkpoint does not complete or
    /// `VACUUM` fails.
    pub fn vacuum(&self) -> StoreResult<()> {
        self.with_conn(|conn, _| maintenance::vacuum(conn))
    }

    /// Runs a WAL checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the checkpoint fails.
    pub fn checkpoint(&self) -> StoreResult<CheckpointStats> {
        self.with_conn(|conn, _| connection::checkpoint(conn))
    }

    /// Returns the primary database file size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the file cannot be stat'ed.
    pub fn size(&self) -> StoreResult<u64> {
        connection::size(&self.config.path)
    }

    /// Writes a snapshot to `path`, replacing any previous file there.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when `path` is this database or one of
    /// its sidecars, or [`StoreError`] when the snapshot fails.
    pub fn export(&self, path: &Path) -> StoreResult<u64> {
        self.with_conn(|conn, _| maintenance::export(conn, path))
    }

    /// Merges the snapshot at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the merge fails.
    pub fn import(&self, path: &Path) -> StoreResult<ImportReport> {
        self.with_conn(|conn, _| maintenance::import(conn, path))
    }

    /// Deletes all models, extension rows, server config, and metrics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the clear fails.
    pub fn clear_all(&self) -> StoreResult<ClearReport> {
        self.with_conn(|conn, _| maintenance::clear_all(conn))
    }
}

// ============================================================================
// SECTION: One-Shot Access
// ============================================================================

/// Opens the database, runs `f`, and closes it again.
///
/// The close runs even when `f` fails; `f`'s error takes precedence.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for an invalid configuration, or
/// [`StoreError`] from opening, from `f`, or from closing.
pub fn with_connection<T>(
    config: &StoreConfig,
    f: impl FnOnce(&mut Connection) -> StoreResult<T>,
) -> StoreResult<T> {
    config.validate().map_err(|err| StoreError::Invalid(err.to_string()))?;
    let mut connection = connection::open(config, crate::clock::unix_millis())?;
    let result = f(&mut connection);
    let closed = connection::close(connection);
    let value = result?;
    closed?;
    Ok(value)
}
