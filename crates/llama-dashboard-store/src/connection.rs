// crates/llama-dashboard-store/src/connection.rs
// ============================================================================
// Module: Connection Manager
// Description: Open, configure, checkpoint, and close the dashboard database.
// Purpose: Centralize pragma setup and schema application for every handle.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! [`open`] validates the path, opens the file, applies pragmas, and runs
//! the schema registry. WAL is requested but not required: filesystems that
//! refuse it leave the connection in the engine's default mode with a
//! warning. Foreign keys are required because model deletion relies on the
//! engine cascade.
//!
//! [`close`] checkpoints the WAL before releasing the handle so a closed
//! store leaves a self-contained primary file behind.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::MAX_PATH_COMPONENT_LENGTH;
use crate::config::MAX_TOTAL_PATH_LENGTH;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::error::db_error;
use crate::error::io_error;
use crate::schema::apply_schema;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Result of a `wal_checkpoint(TRUNCATE)` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckpointStats {
    /// Non-zero when a reader or writer blocked the checkpoint.
    pub busy: i64,
    /// Frames in the WAL (`-1` when not in WAL mode).
    pub log_frames: i64,
    /// Frames moved back into the database file (`-1` when not in WAL mode).
    pub checkpointed_frames: i64,
}

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

/// Opens the database described by `config` and applies the schema.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for unusable paths, [`StoreError::Io`]
/// when the parent directory cannot be created, [`StoreError::Db`] when the
/// file cannot be opened or foreign keys cannot be enabled, and
/// [`StoreError::VersionMismatch`] for an unsupported schema version.
pub fn open(config: &StoreConfig, now_ms: i64) -> StoreResult<Connection> {
    validate_store_path(&config.path)?;
    ensure_parent_dir(&config.path)?;
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let mut connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    apply_pragmas(&connection, config)?;
    apply_schema(&mut connection, now_ms)?;
    info!(path = %config.path.display(), "dashboard store opened");
    Ok(connection)
}

/// Applies connection pragmas.
///
/// Only the busy timeout and foreign keys are fatal; the rest degrade to a
/// warning.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the busy timeout or foreign keys cannot
/// be configured.
pub fn apply_pragmas(connection: &Connection, config: &StoreConfig) -> StoreResult<()> {
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(db_error)?;
    connection.pragma_update(None, "foreign_keys", true).map_err(db_error)?;
    let enabled: bool =
        connection.pragma_query_value(None, "foreign_keys", |row| row.get(0)).map_err(db_error)?;
    if !enabled {
        return Err(StoreError::Db("foreign keys could not be enabled".to_string()));
    }

    let requested = config.journal_mode.pragma_value();
    match connection.pragma_update_and_check(None, "journal_mode", requested, |row| {
        row.get::<_, String>(0)
    }) {
        Ok(mode) if mode.eq_ignore_ascii_case(requested) => {}
        Ok(mode) => {
            warn!(requested, actual = %mode, "journal mode not applied, continuing");
        }
        Err(err) => {
            warn!(requested, error = %err, "journal mode pragma failed, continuing");
        }
    }
    if let Err(err) = connection.pragma_update(None, "synchronous", config.sync_mode.pragma_value())
    {
        warn!(error = %err, "synchronous pragma failed, continuing");
    }
    let cache_size = -i64::from(config.cache_size_kib);
    if let Err(err) = connection.pragma_update(None, "cache_size", cache_size) {
        warn!(error = %err, "cache_size pragma failed, continuing");
    }
    if config.temp_store_memory
        && let Err(err) = connection.pragma_update(None, "temp_store", "MEMORY")
    {
        warn!(error = %err, "temp_store pragma failed, continuing");
    }
    Ok(())
}

/// Checkpoints the WAL and releases the connection.
///
/// A failed checkpoint is logged and does not prevent the close.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the engine refuses to close the handle.
/// The handle is dropped in that case.
pub fn close(connection: Connection) -> StoreResult<()> {
    if let Err(err) = checkpoint(&connection) {
        warn!(error = %err, "wal checkpoint on close failed");
    }
    match connection.close() {
        Ok(()) => {
            info!("dashboard store closed");
            Ok(())
        }
        Err((handle, err)) => {
            drop(handle);
            Err(db_error(err))
        }
    }
}

/// Runs `PRAGMA wal_checkpoint(TRUNCATE)`.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the pragma fails.
pub fn checkpoint(connection: &Connection) -> StoreResult<CheckpointStats> {
    let stats = connection
        .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
            Ok(CheckpointStats {
                busy: row.get(0)?,
                log_frames: row.get(1)?,
                checkpointed_frames: row.get(2)?,
            })
        })
        .map_err(db_error)?;
    debug!(
        busy = stats.busy,
        log_frames = stats.log_frames,
        checkpointed_frames = stats.checkpointed_frames,
        "wal checkpoint"
    );
    Ok(stats)
}

/// Returns the on-disk size of the primary database file in bytes.
///
/// # Errors
///
/// Returns [`StoreError::Io`] when the file cannot be stat'ed.
pub fn size(path: &Path) -> StoreResult<u64> {
    std::fs::metadata(path).map(|meta| meta.len()).map_err(|err| io_error(&err))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for `path` exists.
pub(crate) fn ensure_parent_dir(path: &Path) -> StoreResult<()> {
    let Some(parent) = path.parent() else {
        return Err(StoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| io_error(&err))
}

/// Validates store paths for safety limits.
pub(crate) fn validate_store_path(path: &Path) -> StoreResult<()> {
    if path.as_os_str().is_empty() {
        return Err(StoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(StoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(StoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(StoreError::Invalid("store path must be a file, not a directory".to_string()));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
