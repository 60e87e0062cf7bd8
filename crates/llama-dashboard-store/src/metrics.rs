// crates/llama-dashboard-store/src/metrics.rs
// ============================================================================
// Module: Metrics History Store
// Description: Rolling window of system metrics samples.
// Purpose: Record samples, prune expired ones, and serve history windows.
// Dependencies: rusqlite, serde, tracing
// ============================================================================

//! ## Overview
//! Samples are immutable once written. Every [`record`] call prunes rows
//! whose `created_at` has fallen out of the retention window in the same
//! transaction as the insert, so the table stays bounded without a
//! background task.
//!
//! Window filters run on `created_at` (insertion time) while results are
//! ordered by `timestamp` (sample time).

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::error::StoreResult;
use crate::error::db_error;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Gauge readings supplied by a caller. Omitted gauges are stored as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSampleInput {
    /// Sample time in unix epoch milliseconds; insertion time when absent.
    pub timestamp: Option<i64>,
    /// CPU utilization percent.
    pub cpu_usage: Option<f64>,
    /// Memory utilization percent.
    pub memory_usage: Option<f64>,
    /// Disk utilization percent.
    pub disk_usage: Option<f64>,
    /// GPU utilization percent.
    pub gpu_usage: Option<f64>,
    /// GPU temperature in degrees Celsius.
    pub gpu_temperature: Option<f64>,
    /// GPU memory in use.
    pub gpu_memory_used: Option<f64>,
    /// GPU memory capacity.
    pub gpu_memory_total: Option<f64>,
    /// GPU power draw in watts.
    pub gpu_power_usage: Option<f64>,
    /// Number of models currently loaded.
    pub active_models: Option<i64>,
    /// Server uptime in seconds.
    pub uptime: Option<i64>,
    /// Request throughput.
    pub requests_per_minute: Option<f64>,
}

/// A stored metrics sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Row identifier.
    pub id: i64,
    /// Sample time in unix epoch milliseconds.
    pub timestamp: i64,
    /// CPU utilization percent.
    pub cpu_usage: f64,
    /// Memory utilization percent.
    pub memory_usage: f64,
    /// Disk utilization percent.
    pub disk_usage: f64,
    /// GPU utilization percent.
    pub gpu_usage: f64,
    /// GPU temperature in degrees Celsius.
    pub gpu_temperature: f64,
    /// GPU memory in use.
    pub gpu_memory_used: f64,
    /// GPU memory capacity.
    pub gpu_memory_total: f64,
    /// GPU power draw in watts.
    pub gpu_power_usage: f64,
    /// Number of models currently loaded.
    pub active_models: i64,
    /// Server uptime in seconds.
    pub uptime: i64,
    /// Request throughput.
    pub requests_per_minute: f64,
    /// Insertion time in unix epoch milliseconds.
    pub created_at: i64,
}

/// Column list shared by every metrics read.
const SELECT_COLUMNS: &str = "id, timestamp, cpu_usage, memory_usage, disk_usage, gpu_usage, \
                              gpu_temperature, gpu_memory_used, gpu_memory_total, \
                              gpu_power_usage, active_models, uptime, requests_per_minute, \
                              created_at";

/// Milliseconds per minute.
const MINUTE_MS: i64 = 60_000;

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Inserts a sample and prunes rows older than `retention_ms`.
///
/// # Errors
///
/// Returns [`crate::StoreError::Db`] when the insert or cleanup fails; the
/// transaction is rolled back in that case.
pub fn record(
    connection: &mut Connection,
    sample: &MetricSampleInput,
    now_ms: i64,
    retention_ms: i64,
) -> StoreResult<i64> {
    let tx = connection.transaction().map_err(db_error)?;
    tx.execute(
        "INSERT INTO metrics_history (timestamp, cpu_usage, memory_usage, disk_usage, gpu_usage, \
         gpu_temperature, gpu_memory_used, gpu_memory_total, gpu_power_usage, active_models, \
         uptime, requests_per_minute, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, \
         ?10, ?11, ?12, ?13)",
        params![
            sample.timestamp.unwrap_or(now_ms),
            sample.cpu_usage.unwrap_or_default(),
            sample.memory_usage.unwrap_or_default(),
            sample.disk_usage.unwrap_or_default(),
            sample.gpu_usage.unwrap_or_default(),
            sample.gpu_temperature.unwrap_or_default(),
            sample.gpu_memory_used.unwrap_or_default(),
            sample.gpu_memory_total.unwrap_or_default(),
            sample.gpu_power_usage.unwrap_or_default(),
            sample.active_models.unwrap_or_default(),
            sample.uptime.unwrap_or_default(),
            sample.requests_per_minute.unwrap_or_default(),
            now_ms,
        ],
    )
    .map_err(db_error)?;
    let id = tx.last_insert_rowid();
    let cutoff = now_ms.saturating_sub(retention_ms);
    let pruned = tx
        .execute("DELETE FROM metrics_history WHERE created_at < ?1", params![cutoff])
        .map_err(db_error)?;
    tx.commit().map_err(db_error)?;
    if pruned > 0 {
        debug!(pruned, cutoff, "metrics retention cleanup");
    }
    Ok(id)
}

/// Returns samples inserted within the last `minutes`, oldest sample first.
///
/// A zero-minute window is always empty.
///
/// # Errors
///
/// Returns [`crate::StoreError::Db`] when the query fails.
pub fn history(connection: &Connection, minutes: u32, now_ms: i64) -> StoreResult<Vec<MetricSample>> {
    let cutoff = now_ms.saturating_sub(i64::from(minutes) * MINUTE_MS);
    let mut stmt = connection
        .prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM metrics_history WHERE created_at > ?1 ORDER BY \
             timestamp ASC, id ASC"
        ))
        .map_err(db_error)?;
    let rows = stmt.query_map(params![cutoff], sample_from_row).map_err(db_error)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_error)
}

/// Returns the most recently inserted sample.
///
/// # Errors
///
/// Returns [`crate::StoreError::Db`] when the query fails.
pub fn latest(connection: &Connection) -> StoreResult<Option<MetricSample>> {
    connection
        .query_row(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM metrics_history ORDER BY created_at DESC, id DESC \
                 LIMIT 1"
            ),
            [],
            sample_from_row,
        )
        .optional()
        .map_err(db_error)
}

/// Returns the number of retained samples.
///
/// # Errors
///
/// Returns [`crate::StoreError::Db`] when the query fails.
pub fn count(connection: &Connection) -> StoreResult<u64> {
    let count: i64 = connection
        .query_row("SELECT COUNT(*) FROM metrics_history", [], |row| row.get(0))
        .map_err(db_error)?;
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Decodes one metrics row.
fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<MetricSample> {
    Ok(MetricSample {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        cpu_usage: row.get(2)?,
        memory_usage: row.get(3)?,
        disk_usage: row.get(4)?,
        gpu_usage: row.get(5)?,
        gpu_temperature: row.get(6)?,
        gpu_memory_used: row.get(7)?,
        gpu_memory_total: row.get(8)?,
        gpu_power_usage: row.get(9)?,
        active_models: row.get(10)?,
        uptime: row.get(11)?,
        requests_per_minute: row.get(12)?,
        created_at: row.get(13)?,
    })
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

    use rusqlite::Connection;

    use super::MetricSampleInput;
    use super::history;
    use super::latest;
    use super::record;
    use crate::schema::apply_schema;

    fn memory_db() -> Connection {
        let mut conn = Connection::open_in_memory().expect("connection");
        apply_schema(&mut conn, 0).expect("schema");
        conn
    }

    #[test]
    fn sample_time_defaults_to_insertion_time() {
        let mut conn = memory_db();
        record(&mut conn, &MetricSampleInput::default(), 5_000, 600_000).expect("record");
        let sample = latest(&conn).expect("latest").expect("row");
        assert_eq!(sample.timestamp, 5_000);
        assert_eq!(sample.created_at, 5_000);
    }

    #[test]
    fn history_orders_by_sample_time() {
        let mut conn = memory_db();
        let late = MetricSampleInput {
            timestamp: Some(900),
            ..MetricSampleInput::default()
        };
        let early = MetricSampleInput {
            timestamp: Some(100),
            ..MetricSampleInput::default()
        };
        record(&mut conn, &late, 1_000, 600_000).expect("late");
        record(&mut conn, &early, 1_001, 600_000).expect("early");
        let rows = history(&conn, 10, 1_002).expect("history");
        let stamps: Vec<i64> = rows.iter().map(|row| row.timestamp).collect();
        assert_eq!(stamps, vec![100, 900]);
    }
}
