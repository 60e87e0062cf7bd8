// crates/llama-dashboard-store/src/metadata.rs
// ============================================================================
// Module: Metadata Store
// Description: String key/value settings with last-write timestamps.
// Purpose: Hold the schema version and application settings blobs.
// Dependencies: rusqlite, serde, serde_json
// ============================================================================

//! ## Overview
//! Values are opaque strings. [`set_json`] and [`get_json`] layer serde on
//! top for settings blobs such as [`USER_SETTINGS_KEY`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::error::db_error;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Key holding the dashboard's user settings JSON.
pub const USER_SETTINGS_KEY: &str = "user_settings";

/// A stored metadata entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// Entry key.
    pub key: String,
    /// Entry value.
    pub value: String,
    /// Last write time in unix epoch milliseconds.
    pub updated_at: i64,
}

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Inserts or replaces `key`, refreshing `updated_at`.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the write fails.
pub fn set(connection: &Connection, key: &str, value: &str, now_ms: i64) -> StoreResult<()> {
    connection
        .execute(
            "INSERT INTO metadata (key, value, updated_at) VALUES (?1, ?2, ?3) ON CONFLICT(key) \
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_ms],
        )
        .map_err(db_error)?;
    Ok(())
}

/// Returns the value stored under `key`.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the query fails.
pub fn get(connection: &Connection, key: &str) -> StoreResult<Option<String>> {
    connection
        .query_row("SELECT value FROM metadata WHERE key = ?1", params![key], |row| row.get(0))
        .optional()
        .map_err(db_error)
}

/// Returns the full entry stored under `key`.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the query fails.
pub fn entry(connection: &Connection, key: &str) -> StoreResult<Option<MetadataEntry>> {
    connection
        .query_row(
            "SELECT key, value, updated_at FROM metadata WHERE key = ?1",
            params![key],
            |row| {
                Ok(MetadataEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(db_error)
}

/// Deletes `key`. Absent keys are a no-op.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the delete fails.
pub fn delete(connection: &Connection, key: &str) -> StoreResult<()> {
    connection.execute("DELETE FROM metadata WHERE key = ?1", params![key]).map_err(db_error)?;
    Ok(())
}

/// Serializes `value` as JSON and stores it under `key`.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] when serialization fails and
/// [`StoreError::Db`] when the write fails.
pub fn set_json<T: Serialize>(
    connection: &Connection,
    key: &str,
    value: &T,
    now_ms: i64,
) -> StoreResult<()> {
    let text = serde_json::to_string(value)
        .map_err(|err| StoreError::Invalid(format!("metadata {key} not serializable: {err}")))?;
    set(connection, key, &text, now_ms)
}

/// Reads `key` and decodes it from JSON.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] when the stored value is not valid JSON
/// for `T`.
pub fn get_json<T: DeserializeOwned>(connection: &Connection, key: &str) -> StoreResult<Option<T>> {
    let Some(text) = get(connection, key)? else {
        return Ok(None);
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|err| StoreError::Invalid(format!("metadata {key} is not valid json: {err}")))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
