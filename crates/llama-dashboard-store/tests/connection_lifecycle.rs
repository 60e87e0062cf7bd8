// crates/llama-dashboard-store/tests/connection_lifecycle.rs
// ============================================================================
// Module: Connection Lifecycle Tests
// Description: Open, schema versioning, checkpoint, and close behavior.
// Purpose: Validate path handling, pragma setup, and durable reopen.
// ============================================================================

//! ## Overview
//! Integration tests for the connection manager and store facade:
//! - Parent directory creation and path rejection
//! - Schema version seeding and mismatch detection
//! - WAL checkpoint on close and data survival across reopen
//! - Serialized access from multiple threads

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;
use std::sync::Arc;
use std::thread;

use llama_dashboard_store::DashboardStore;
use llama_dashboard_store::JournalMode;
use llama_dashboard_store::MetricSampleInput;
use llama_dashboard_store::NewModel;
use llama_dashboard_store::SCHEMA_VERSION;
use llama_dashboard_store::StoreConfig;
use llama_dashboard_store::StoreError;
use llama_dashboard_store::connection;
use llama_dashboard_store::with_connection;
use rusqlite::Connection;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn config_for(path: &Path) -> StoreConfig {
    StoreConfig::new(path)
}

// ============================================================================
// SECTION: Open
// ============================================================================

#[test]
fn open_creates_missing_parent_directories() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("deeper").join("dash.db");
    let store = DashboardStore::open(config_for(&path)).unwrap();
    assert!(path.exists());
    assert_eq!(store.metadata("db_version").unwrap().as_deref(), Some(SCHEMA_VERSION));
    store.close().unwrap();
}

#[test]
fn open_rejects_directory_path() {
    let temp = TempDir::new().unwrap();
    let result = DashboardStore::open(config_for(temp.path()));
    assert!(matches!(result, Err(StoreError::Invalid(_))));
}

#[test]
fn open_rejects_foreign_schema_version() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dash.db");
    DashboardStore::open(config_for(&path)).unwrap().close().unwrap();

    let conn = Connection::open(&path).unwrap();
    conn.execute("UPDATE metadata SET value = '2.0' WHERE key = 'db_version'", []).unwrap();
    drop(conn);

    let result = DashboardStore::open(config_for(&path));
    assert!(matches!(result, Err(StoreError::VersionMismatch(_))));
}

#[test]
fn open_enables_wal_and_foreign_keys() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dash.db");
    let conn = connection::open(&config_for(&path), 0).unwrap();
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)).unwrap();
    let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
    assert_eq!(mode, "wal");
    assert_eq!(foreign_keys, 1);
    connection::close(conn).unwrap();
}

#[test]
fn delete_journal_mode_is_honored() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dash.db");
    let mut config = config_for(&path);
    config.journal_mode = JournalMode::Delete;
    let conn = connection::open(&config, 0).unwrap();
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)).unwrap();
    assert_eq!(mode, "delete");
    connection::close(conn).unwrap();
}

#[test]
fn zero_retention_config_is_rejected_on_open() {
    let temp = TempDir::new().unwrap();
    let mut config = config_for(&temp.path().join("dash.db"));
    config.metrics_retention_minutes = 0;
    assert!(matches!(DashboardStore::open(config), Err(StoreError::Invalid(_))));
}

// ============================================================================
// SECTION: Close & Reopen
// ============================================================================

#[test]
fn close_truncates_wal_and_data_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dash.db");
    let store = DashboardStore::open(config_for(&path)).unwrap();
    let id = store.create_model(&NewModel::named("persisted")).unwrap();
    store.close().unwrap();

    let wal = temp.path().join("dash.db-wal");
    let wal_len = std::fs::metadata(&wal).map(|meta| meta.len()).unwrap_or(0);
    assert_eq!(wal_len, 0);

    let store = DashboardStore::open(config_for(&path)).unwrap();
    let model = store.model(id).unwrap().expect("model after reopen");
    assert_eq!(model.name, "persisted");
    assert!(store.size().unwrap() > 0);
    store.close().unwrap();
}

#[test]
fn checkpoint_reports_wal_frames() {
    let temp = TempDir::new().unwrap();
    let store = DashboardStore::open(config_for(&temp.path().join("dash.db"))).unwrap();
    store.record_metrics(&MetricSampleInput::default()).unwrap();
    let stats = store.checkpoint().unwrap();
    assert_eq!(stats.busy, 0);
    assert_eq!(stats.log_frames, stats.checkpointed_frames);
    store.close().unwrap();
}

#[test]
fn with_connection_opens_and_closes() {
    let temp = TempDir::new().unwrap();
    let config = config_for(&temp.path().join("dash.db"));
    let id = with_connection(&config, |conn| {
        llama_dashboard_store::models::create(conn, &NewModel::named("one-shot"), 1)
    })
    .unwrap();
    let name = with_connection(&config, |conn| {
        Ok(llama_dashboard_store::models::get(conn, id)?.map(|model| model.name))
    })
    .unwrap();
    assert_eq!(name.as_deref(), Some("one-shot"));
}

#[test]
fn with_connection_validates_config_before_opening() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dash.db");
    let mut config = config_for(&path);
    config.busy_timeout_ms = 0;
    let result = with_connection(&config, |_| Ok(()));
    assert!(matches!(result, Err(StoreError::Invalid(_))));
    assert!(!path.exists());
}

// ============================================================================
// SECTION: Concurrency
// ============================================================================

#[test]
fn concurrent_writers_are_serialized() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(DashboardStore::open(config_for(&temp.path().join("dash.db"))).unwrap());
    let handles: Vec<_> = (0 .. 4)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for index in 0 .. 10 {
                    store.create_model(&NewModel::named(format!("model-{worker}-{index}"))).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(store.model_count().unwrap(), 40);
}
