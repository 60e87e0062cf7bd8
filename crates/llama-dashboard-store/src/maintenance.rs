// crates/llama-dashboard-store/src/maintenance.rs
// ============================================================================
// Module: Maintenance & Backup
// Description: Vacuum, snapshot export, merge import, and bulk clear.
// Purpose: Whole-database operations that span every registered table.
// Dependencies: rusqlite, serde, tracing
// ============================================================================

//! ## Overview
//! [`export`] writes a consistent single-file snapshot with `VACUUM INTO`.
//! [`import`] attaches a snapshot and merges it table by table following
//! each table's [`MergePolicy`]:
//! - `Append` tables only gain rows whose key is absent, so importing the
//!   same file twice changes nothing the second time and live rows win.
//! - `Replace` tables take the snapshot's row on key conflict.
//!
//! The merge runs in one transaction. The snapshot is detached afterwards
//! whether or not the merge succeeded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::connection::checkpoint;
use crate::connection::ensure_parent_dir;
use crate::connection::validate_store_path;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::error::db_error;
use crate::error::io_error;
use crate::schema::ALL_TABLES;
use crate::schema::DB_VERSION_KEY;
use crate::schema::EXTENSION_TABLES;
use crate::schema::METRICS_HISTORY;
use crate::schema::MODEL_SERVER_CONFIG;
use crate::schema::MODELS;
use crate::schema::MergePolicy;
use crate::schema::SCHEMA_VERSION;
use crate::schema::TableSpec;
use crate::schema::quote_ident;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Schema name used for the attached snapshot.
const BACKUP_SCHEMA: &str = "backup";
/// Suffix of the staging file an export writes before renaming.
const STAGING_SUFFIX: &str = ".partial";
/// Files that belong to a live database, as suffixes of its path.
const LIVE_FILE_SUFFIXES: [&str; 4] = ["", "-wal", "-shm", "-journal"];

/// Rows merged into one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableImport {
    /// Table name.
    pub table: &'static str,
    /// Merge policy applied.
    pub policy: MergePolicy,
    /// Rows inserted or replaced.
    pub rows: u64,
}

/// Outcome of [`import`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Snapshot path.
    pub source: PathBuf,
    /// True when the snapshot did not exist and nothing was merged.
    pub skipped: bool,
    /// Per-table results, parent-first.
    pub tables: Vec<TableImport>,
}

impl ImportReport {
    /// Returns the total number of rows merged.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|table| table.rows).sum()
    }
}

/// Rows removed by [`clear_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    /// Extension rows across all extension tables.
    pub extension_rows: u64,
    /// Model rows.
    pub models: u64,
    /// Server-config rows.
    pub server_config: u64,
    /// Metrics samples.
    pub metrics: u64,
}

// ============================================================================
// SECTION: Vacuum & Export
// ============================================================================

/// Checkpoints the WAL and rebuilds the database file.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the checkpoint fails or is blocked by
/// another connection, or when `VACUUM` fails. Nothing is vacuumed when the
/// checkpoint does not complete.
pub fn vacuum(connection: &Connection) -> StoreResult<()> {
    let stats = checkpoint(connection)?;
    if stats.busy != 0 {
        return Err(StoreError::Db(
            "wal checkpoint before vacuum was blocked by another connection".to_string(),
        ));
    }
    connection.execute_batch("VACUUM").map_err(db_error)?;
    info!("dashboard store vacuumed");
    Ok(())
}

/// Writes a consistent snapshot of the whole database to `path`.
///
/// The snapshot is written to a sibling staging file and renamed over `path`
/// only once it is complete, so a failed export leaves any previous file at
/// `path` intact. Returns the snapshot size.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for unusable paths, including the live
/// database file and its sidecars, [`StoreError::Io`] for filesystem
/// failures, and [`StoreError::Db`] when the snapshot fails.
pub fn export(connection: &Connection, path: &Path) -> StoreResult<u64> {
    validate_store_path(path)?;
    ensure_parent_dir(path)?;
    reject_live_target(connection, path)?;
    let staging = staging_path(path)?;
    if staging.exists() {
        std::fs::remove_file(&staging).map_err(|err| io_error(&err))?;
    }
    let staging_text = path_text(&staging)?;
    if let Err(err) = connection.execute("VACUUM INTO ?1", params![staging_text]) {
        discard_staging(&staging);
        return Err(db_error(err));
    }
    if let Err(err) = std::fs::rename(&staging, path) {
        discard_staging(&staging);
        return Err(io_error(&err));
    }
    let bytes = std::fs::metadata(path).map(|meta| meta.len()).map_err(|err| io_error(&err))?;
    info!(path = %path.display(), bytes, "dashboard store exported");
    Ok(bytes)
}

/// Rejects export targets that resolve to the live database or a sidecar.
fn reject_live_target(connection: &Connection, path: &Path) -> StoreResult<()> {
    let Some(live) = connection.path().filter(|live| !live.is_empty()) else {
        return Ok(());
    };
    let live = std::fs::canonicalize(live).map_err(|err| io_error(&err))?;
    let target = canonical_target(path)?;
    for suffix in LIVE_FILE_SUFFIXES {
        let mut candidate = live.clone().into_os_string();
        candidate.push(suffix);
        if target == PathBuf::from(candidate) {
            return Err(StoreError::Invalid(format!(
                "export target {} is a live database file",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Resolves `path` through symlinks, or through its parent when absent.
fn canonical_target(path: &Path) -> StoreResult<PathBuf> {
    if path.exists() {
        return std::fs::canonicalize(path).map_err(|err| io_error(&err));
    }
    let Some(file_name) = path.file_name() else {
        return Err(StoreError::Invalid("export path must name a file".to_string()));
    };
    let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty());
    let parent = std::fs::canonicalize(parent.unwrap_or_else(|| Path::new(".")))
        .map_err(|err| io_error(&err))?;
    Ok(parent.join(file_name))
}

/// Returns the staging file written before the final rename.
fn staging_path(path: &Path) -> StoreResult<PathBuf> {
    let Some(file_name) = path.file_name() else {
        return Err(StoreError::Invalid("export path must name a file".to_string()));
    };
    let mut staged = file_name.to_os_string();
    staged.push(STAGING_SUFFIX);
    Ok(path.with_file_name(staged))
}

/// Removes a partial staging file.
fn discard_staging(staging: &Path) {
    if staging.is_file()
        && let Err(err) = std::fs::remove_file(staging)
    {
        warn!(path = %staging.display(), error = %err, "failed to remove partial export");
    }
}

// ============================================================================
// SECTION: Import
// ============================================================================

/// Merges the snapshot at `path` into the live database.
///
/// A missing snapshot is logged and reported as skipped.
///
/// # Errors
///
/// Returns [`StoreError::VersionMismatch`] when the snapshot carries another
/// schema version and [`StoreError::Db`] or
/// [`StoreError::ConstraintViolation`] when the merge fails. A failed merge
/// leaves the live database unchanged.
pub fn import(connection: &mut Connection, path: &Path) -> StoreResult<ImportReport> {
    if !path.is_file() {
        warn!(path = %path.display(), "backup file not found, skipping import");
        return Ok(ImportReport {
            source: path.to_path_buf(),
            skipped: true,
            tables: Vec::new(),
        });
    }
    let source = path_text(path)?;
    connection
        .execute(&format!("ATTACH DATABASE ?1 AS {BACKUP_SCHEMA}"), params![source])
        .map_err(db_error)?;
    let merged = merge_backup(connection);
    let detached = connection
        .execute_batch(&format!("DETACH DATABASE {BACKUP_SCHEMA}"))
        .map_err(db_error);
    let tables = merged?;
    detached?;
    let report = ImportReport {
        source: path.to_path_buf(),
        skipped: false,
        tables,
    };
    info!(path = %path.display(), rows = report.total_rows(), "dashboard store imported");
    Ok(report)
}

/// Merges every registered table present in the attached snapshot.
fn merge_backup(connection: &mut Connection) -> StoreResult<Vec<TableImport>> {
    let present = backup_tables(connection)?;
    if present.contains("metadata") {
        check_backup_version(connection)?;
    }
    let tx = connection.transaction().map_err(db_error)?;
    let mut results = Vec::new();
    for table in ALL_TABLES {
        if !present.contains(table.name) {
            continue;
        }
        let available = backup_columns(&tx, table)?;
        if !available.contains(table.key) {
            warn!(table = table.name, "backup table lacks its key column, skipping");
            continue;
        }
        let columns: Vec<&str> = table
            .columns
            .iter()
            .map(|column| column.name)
            .filter(|name| available.contains(*name))
            .collect();
        let rows = tx.execute(&merge_sql(table, &columns), []).map_err(db_error)?;
        results.push(TableImport {
            table: table.name,
            policy: table.merge,
            rows: u64::try_from(rows).unwrap_or_default(),
        });
    }
    tx.commit().map_err(db_error)?;
    Ok(results)
}

/// Builds the merge statement for one table.
fn merge_sql(table: &TableSpec, columns: &[&str]) -> String {
    let target = columns.iter().map(|name| quote_ident(name)).collect::<Vec<_>>().join(", ");
    let source =
        columns.iter().map(|name| format!("b.{}", quote_ident(name))).collect::<Vec<_>>().join(", ");
    let key = quote_ident(table.key);
    match table.merge {
        MergePolicy::Replace => format!(
            "INSERT OR REPLACE INTO main.{name} ({target}) SELECT {source} FROM \
             {BACKUP_SCHEMA}.{name} AS b",
            name = table.name
        ),
        MergePolicy::Append => {
            let mut sql = format!(
                "INSERT INTO main.{name} ({target}) SELECT {source} FROM {BACKUP_SCHEMA}.{name} \
                 AS b WHERE NOT EXISTS (SELECT 1 FROM main.{name} AS live WHERE live.{key} = \
                 b.{key})",
                name = table.name
            );
            if let Some(parent) = table.parent {
                sql.push_str(&format!(
                    " AND EXISTS (SELECT 1 FROM main.{} AS parent WHERE parent.{} = b.{})",
                    parent.table,
                    quote_ident(parent.key),
                    quote_ident(parent.column)
                ));
            }
            sql
        }
    }
}

/// Returns the names of tables in the attached snapshot.
fn backup_tables(connection: &Connection) -> StoreResult<HashSet<String>> {
    let mut stmt = connection
        .prepare(&format!("SELECT name FROM {BACKUP_SCHEMA}.sqlite_master WHERE type = 'table'"))
        .map_err(db_error)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(db_error)?;
    rows.collect::<Result<HashSet<_>, _>>().map_err(db_error)
}

/// Returns the column names of `table` in the attached snapshot.
fn backup_columns(connection: &Connection, table: &TableSpec) -> StoreResult<HashSet<String>> {
    let mut stmt = connection
        .prepare(&format!("PRAGMA {BACKUP_SCHEMA}.table_info({})", quote_ident(table.name)))
        .map_err(db_error)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1)).map_err(db_error)?;
    rows.collect::<Result<HashSet<_>, _>>().map_err(db_error)
}

/// Rejects snapshots written under a different schema version.
fn check_backup_version(connection: &Connection) -> StoreResult<()> {
    let version: Option<String> = connection
        .query_row(
            &format!("SELECT value FROM {BACKUP_SCHEMA}.metadata WHERE key = ?1"),
            params![DB_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error)?;
    match version.as_deref() {
        Some(SCHEMA_VERSION) | None => Ok(()),
        Some(other) => {
            Err(StoreError::VersionMismatch(format!("backup has unsupported schema version {other}")))
        }
    }
}

// ============================================================================
// SECTION: Clear
// ============================================================================

/// Deletes all models, extension rows, server config, and metrics.
///
/// Metadata, including the schema version, is preserved.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when any delete fails; nothing is removed in
/// that case.
pub fn clear_all(connection: &mut Connection) -> StoreResult<ClearReport> {
    let tx = connection.transaction().map_err(db_error)?;
    let mut report = ClearReport::default();
    for table in EXTENSION_TABLES {
        report.extension_rows += delete_rows(&tx, table)?;
    }
    report.models = delete_rows(&tx, &MODELS)?;
    report.server_config = delete_rows(&tx, &MODEL_SERVER_CONFIG)?;
    report.metrics = delete_rows(&tx, &METRICS_HISTORY)?;
    tx.commit().map_err(db_error)?;
    info!(
        models = report.models,
        extension_rows = report.extension_rows,
        metrics = report.metrics,
        "dashboard store cleared"
    );
    Ok(report)
}

/// Deletes every row of `table`.
fn delete_rows(connection: &Connection, table: &TableSpec) -> StoreResult<u64> {
    let deleted =
        connection.execute(&format!("DELETE FROM {}", table.name), []).map_err(db_error)?;
    Ok(u64::try_from(deleted).unwrap_or_default())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns `path` as UTF-8 for binding into SQL.
fn path_text(path: &Path) -> StoreResult<&str> {
    path.to_str().ok_or_else(|| StoreError::Invalid("path must be valid utf-8".to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
