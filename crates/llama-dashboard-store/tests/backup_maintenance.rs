// crates/llama-dashboard-store/tests/backup_maintenance.rs
// ============================================================================
// Module: Backup & Maintenance Tests
// Description: Export, merge import, vacuum, and bulk clear.
// Purpose: Validate idempotent merges and data safety of maintenance ops.
// ============================================================================

//! ## Overview
//! Integration tests for whole-database maintenance:
//! - Export produces a standalone snapshot that imports into a fresh store
//! - Importing the same snapshot twice adds nothing the second time
//! - Append tables keep live rows; replace tables take snapshot rows
//! - Orphaned extension rows in a snapshot are skipped
//! - Missing, corrupt, and foreign-version snapshots
//! - A merge failing partway rolls back every table
//! - Export never targets the live database and never leaves a partial file
//! - Vacuum preserves data and reports a blocked checkpoint; clear keeps
//!   metadata

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

use llama_dashboard_store::DashboardStore;
use llama_dashboard_store::GpuConfig;
use llama_dashboard_store::MetricSampleInput;
use llama_dashboard_store::ModelFilter;
use llama_dashboard_store::ModelPatch;
use llama_dashboard_store::ModelStatus;
use llama_dashboard_store::NewModel;
use llama_dashboard_store::ServerConfig;
use llama_dashboard_store::StoreConfig;
use llama_dashboard_store::StoreError;
use llama_dashboard_store::maintenance;
use llama_dashboard_store::metrics;
use llama_dashboard_store::with_connection;
use rusqlite::Connection;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open(path: &Path) -> DashboardStore {
    DashboardStore::open(StoreConfig::new(path)).expect("open store")
}

fn rows_for(report: &llama_dashboard_store::ImportReport, table: &str) -> Option<u64> {
    report.tables.iter().find(|entry| entry.table == table).map(|entry| entry.rows)
}

// ============================================================================
// SECTION: Export & Import
// ============================================================================

#[test]
fn export_then_import_into_fresh_store() {
    let temp = TempDir::new().unwrap();
    let source = open(&temp.path().join("source.db"));
    let id = source.create_model(&NewModel::named("exported")).unwrap();
    let gpu = GpuConfig {
        gpu_layers: 20,
        ..GpuConfig::default()
    };
    source.save_extension(id, &gpu).unwrap();
    source.record_metrics(&MetricSampleInput::default()).unwrap();
    source.set_metadata("theme", "dark").unwrap();

    let snapshot = temp.path().join("backups").join("snapshot.db");
    let bytes = source.export(&snapshot).unwrap();
    assert!(bytes > 0);
    assert_eq!(std::fs::metadata(&snapshot).unwrap().len(), bytes);

    let target = open(&temp.path().join("target.db"));
    let report = target.import(&snapshot).unwrap();
    assert!(!report.skipped);
    assert_eq!(rows_for(&report, "models"), Some(1));
    assert_eq!(rows_for(&report, "model_gpu_config"), Some(1));
    assert_eq!(rows_for(&report, "metrics_history"), Some(1));

    let model = target.model_by_name("exported").unwrap().expect("imported model");
    let gpu = target.extension::<GpuConfig>(model.id).unwrap().expect("imported gpu row");
    assert_eq!(gpu.config.gpu_layers, 20);
    assert_eq!(target.metadata("theme").unwrap().as_deref(), Some("dark"));
    assert_eq!(target.metrics_count().unwrap(), 1);
}

#[test]
fn export_replaces_existing_file() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("live.db"));
    let snapshot = temp.path().join("snapshot.db");
    std::fs::write(&snapshot, b"stale").unwrap();
    store.export(&snapshot).unwrap();
    let conn = Connection::open(&snapshot).unwrap();
    let version: String = conn
        .query_row("SELECT value FROM metadata WHERE key = 'db_version'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, "1.0");
}

#[test]
fn export_refuses_live_database_files() {
    let temp = TempDir::new().unwrap();
    let live = temp.path().join("live.db");
    let store = open(&live);
    store.create_model(&NewModel::named("before")).unwrap();

    for target in [live.clone(), temp.path().join("live.db-wal"), temp.path().join("live.db-shm")] {
        let result = store.export(&target);
        assert!(matches!(result, Err(StoreError::Invalid(_))), "{}", target.display());
    }
    let dotted = temp.path().join(".").join("live.db");
    assert!(matches!(store.export(&dotted), Err(StoreError::Invalid(_))));

    store.create_model(&NewModel::named("after")).unwrap();
    store.close().unwrap();
    let reopened = open(&live);
    assert!(reopened.model_by_name("before").unwrap().is_some());
    assert!(reopened.model_by_name("after").unwrap().is_some());
}

#[test]
fn failed_export_keeps_previous_snapshot() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("live.db"));
    let snapshot = temp.path().join("snapshot.db");
    std::fs::write(&snapshot, b"previous").unwrap();
    std::fs::create_dir(temp.path().join("snapshot.db.partial")).unwrap();

    assert!(store.export(&snapshot).is_err());
    assert_eq!(std::fs::read(&snapshot).unwrap(), b"previous");

    std::fs::remove_dir(temp.path().join("snapshot.db.partial")).unwrap();
    store.export(&snapshot).unwrap();
    assert!(!temp.path().join("snapshot.db.partial").exists());
    assert_ne!(std::fs::read(&snapshot).unwrap(), b"previous");
}

#[test]
fn importing_twice_adds_nothing_the_second_time() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("live.db"));
    for name in ["a", "b"] {
        let id = store.create_model(&NewModel::named(name)).unwrap();
        store.save_extension(id, &GpuConfig::default()).unwrap();
    }
    let snapshot = temp.path().join("snapshot.db");
    store.export(&snapshot).unwrap();

    let target = open(&temp.path().join("target.db"));
    let first = target.import(&snapshot).unwrap();
    let second = target.import(&snapshot).unwrap();
    assert_eq!(rows_for(&first, "models"), Some(2));
    assert_eq!(rows_for(&second, "models"), Some(0));
    assert_eq!(rows_for(&second, "model_gpu_config"), Some(0));
    assert_eq!(target.model_count().unwrap(), 2);
}

#[test]
fn append_merge_keeps_live_model_rows() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("live.db"));
    let id = store.create_model(&NewModel::named("shared")).unwrap();
    let snapshot = temp.path().join("snapshot.db");
    store.export(&snapshot).unwrap();

    store
        .update_model(
            id,
            &ModelPatch {
                status: Some(ModelStatus::Running),
                ..ModelPatch::default()
            },
        )
        .unwrap();
    let report = store.import(&snapshot).unwrap();
    assert_eq!(rows_for(&report, "models"), Some(0));
    assert_eq!(store.model(id).unwrap().unwrap().status, ModelStatus::Running);
}

#[test]
fn replace_merge_prefers_snapshot_rows() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("live.db"));
    store.set_metadata("k", "from-backup").unwrap();
    let backed_up = ServerConfig {
        port: 9000,
        ..ServerConfig::default()
    };
    store.save_server_config(&backed_up).unwrap();
    let snapshot = temp.path().join("snapshot.db");
    store.export(&snapshot).unwrap();

    store.set_metadata("k", "live").unwrap();
    let live = ServerConfig {
        port: 7000,
        ..ServerConfig::default()
    };
    store.save_server_config(&live).unwrap();
    store.import(&snapshot).unwrap();

    assert_eq!(store.metadata("k").unwrap().as_deref(), Some("from-backup"));
    assert_eq!(store.server_config().unwrap().expect("server config").config.port, 9000);
}

#[test]
fn orphaned_snapshot_extensions_are_skipped() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("live.db"));
    let id = store.create_model(&NewModel::named("orphan-parent")).unwrap();
    store.save_extension(id, &GpuConfig::default()).unwrap();
    let snapshot = temp.path().join("snapshot.db");
    store.export(&snapshot).unwrap();

    let conn = Connection::open(&snapshot).unwrap();
    conn.execute("DELETE FROM models", []).unwrap();
    let orphans: i64 =
        conn.query_row("SELECT COUNT(*) FROM model_gpu_config", [], |row| row.get(0)).unwrap();
    assert_eq!(orphans, 1);
    drop(conn);

    let target = open(&temp.path().join("target.db"));
    let report = target.import(&snapshot).unwrap();
    assert_eq!(rows_for(&report, "model_gpu_config"), Some(0));
    assert!(target.list_models(&ModelFilter::default()).unwrap().is_empty());
}

#[test]
fn missing_snapshot_is_skipped() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("live.db"));
    let report = store.import(&temp.path().join("nope.db")).unwrap();
    assert!(report.skipped);
    assert_eq!(report.total_rows(), 0);
}

#[test]
fn corrupt_snapshot_fails_and_store_stays_usable() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("live.db"));
    let corrupt = temp.path().join("corrupt.db");
    std::fs::write(&corrupt, vec![b'x'; 4096]).unwrap();

    let result = store.import(&corrupt);
    assert!(matches!(result, Err(StoreError::Db(_))));
    store.create_model(&NewModel::named("after-corrupt")).unwrap();

    let good = temp.path().join("good.db");
    open(&temp.path().join("other.db")).export(&good).unwrap();
    assert!(!store.import(&good).unwrap().skipped);
    assert_eq!(store.model_count().unwrap(), 1);
}

#[test]
fn failed_merge_rolls_back_every_table() {
    let temp = TempDir::new().unwrap();
    let live = temp.path().join("live.db");
    let snapshot = temp.path().join("snapshot.db");
    let store = open(&live);
    store.export(&snapshot).unwrap();
    store.close().unwrap();

    let conn = Connection::open(&snapshot).unwrap();
    conn.execute_batch(
        "PRAGMA foreign_keys = OFF;
         INSERT INTO metrics_history (timestamp, created_at) VALUES (1, 1);
         DROP TABLE models;
         CREATE TABLE models (
             id INTEGER PRIMARY KEY,
             name TEXT NOT NULL,
             type TEXT NOT NULL,
             status TEXT NOT NULL,
             created_at INTEGER NOT NULL,
             updated_at INTEGER NOT NULL
         );
         INSERT INTO models (id, name, type, status, created_at, updated_at)
             VALUES (1, 'bad', 'llama', 'paused', 1, 1);",
    )
    .unwrap();
    drop(conn);

    with_connection(&StoreConfig::new(&live), |conn| {
        let err = maintenance::import(conn, &snapshot).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
        assert_eq!(metrics::count(conn)?, 0);
        let mut stmt = conn.prepare("PRAGMA database_list").unwrap();
        let schemas: Vec<String> = stmt
            .query_map([], |row| row.get(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(!schemas.iter().any(|name| name == "backup"));
        Ok(())
    })
    .unwrap();
}

#[test]
fn foreign_snapshot_version_is_rejected_without_changes() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("live.db"));
    store.create_model(&NewModel::named("snap")).unwrap();
    let snapshot = temp.path().join("snapshot.db");
    store.export(&snapshot).unwrap();
    store.delete_all_models().unwrap();

    let conn = Connection::open(&snapshot).unwrap();
    conn.execute("UPDATE metadata SET value = '0.1' WHERE key = 'db_version'", []).unwrap();
    drop(conn);

    let result = store.import(&snapshot);
    assert!(matches!(result, Err(StoreError::VersionMismatch(_))));
    assert_eq!(store.model_count().unwrap(), 0);

    let good = temp.path().join("good.db");
    open(&temp.path().join("other.db")).export(&good).unwrap();
    let report = store.import(&good).unwrap();
    assert!(!report.skipped);
}

// ============================================================================
// SECTION: Vacuum & Clear
// ============================================================================

#[test]
fn vacuum_preserves_committed_data() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("live.db"));
    for index in 0 .. 20 {
        store.create_model(&NewModel::named(format!("m{index}"))).unwrap();
    }
    store.delete_all_models().unwrap();
    let keep = store.create_model(&NewModel::named("kept")).unwrap();
    store.set_metadata("k", "v").unwrap();

    store.vacuum().unwrap();
    assert_eq!(store.model(keep).unwrap().unwrap().name, "kept");
    assert_eq!(store.metadata("k").unwrap().as_deref(), Some("v"));
    assert_eq!(store.model_count().unwrap(), 1);
}

#[test]
fn vacuum_reports_a_blocked_checkpoint() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("live.db");
    let config = StoreConfig {
        busy_timeout_ms: 100,
        ..StoreConfig::new(&path)
    };
    let store = DashboardStore::open(config).unwrap();
    store.create_model(&NewModel::named("pinned")).unwrap();

    let reader = Connection::open(&path).unwrap();
    reader.execute_batch("BEGIN").unwrap();
    let seen: i64 = reader.query_row("SELECT COUNT(*) FROM models", [], |row| row.get(0)).unwrap();
    assert_eq!(seen, 1);

    assert!(matches!(store.vacuum(), Err(StoreError::Db(_))));

    reader.execute_batch("COMMIT").unwrap();
    drop(reader);
    store.vacuum().unwrap();
    assert_eq!(store.model_count().unwrap(), 1);
}

#[test]
fn clear_all_keeps_metadata() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("live.db"));
    let id = store.create_model(&NewModel::named("cleared")).unwrap();
    store.save_extension(id, &GpuConfig::default()).unwrap();
    store.save_server_config(&ServerConfig::default()).unwrap();
    store.record_metrics(&MetricSampleInput::default()).unwrap();
    store.set_metadata("k", "v").unwrap();

    let report = store.clear_all().unwrap();
    assert_eq!(report.models, 1);
    assert_eq!(report.extension_rows, 1);
    assert_eq!(report.server_config, 1);
    assert_eq!(report.metrics, 1);
    assert_eq!(store.model_count().unwrap(), 0);
    assert_eq!(store.metrics_count().unwrap(), 0);
    assert!(store.server_config().unwrap().is_none());
    assert_eq!(store.metadata("k").unwrap().as_deref(), Some("v"));
    assert_eq!(store.metadata("db_version").unwrap().as_deref(), Some("1.0"));
}
