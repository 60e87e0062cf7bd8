// crates/llama-dashboard-store/tests/metadata_store.rs
// ============================================================================
// Module: Metadata Store Tests
// Description: Key/value upserts, deletes, and JSON settings helpers.
// Purpose: Validate last-write-wins semantics and timestamp refresh.
// ============================================================================

//! ## Overview
//! Integration tests for the metadata key/value store:
//! - Upsert replaces the value and refreshes `updated_at`
//! - Deletes are idempotent
//! - JSON helpers round-trip settings objects

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

use std::sync::Arc;

use llama_dashboard_store::Clock;
use llama_dashboard_store::DashboardStore;
use llama_dashboard_store::ManualClock;
use llama_dashboard_store::StoreConfig;
use llama_dashboard_store::USER_SETTINGS_KEY;
use serde::Deserialize;
use serde::Serialize;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Settings {
    theme: String,
    refresh_seconds: u32,
}

fn store_with_clock(temp: &TempDir) -> (DashboardStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(100));
    let config = StoreConfig::new(temp.path().join("metadata.db"));
    let store = DashboardStore::open_with_clock(config, Arc::clone(&clock) as Arc<dyn Clock>)
        .expect("open store");
    (store, clock)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn set_overwrites_and_refreshes_timestamp() {
    let temp = TempDir::new().unwrap();
    let (store, clock) = store_with_clock(&temp);
    store.set_metadata("k", "v1").unwrap();
    clock.advance(50);
    store.set_metadata("k", "v2").unwrap();

    assert_eq!(store.metadata("k").unwrap().as_deref(), Some("v2"));
    let entry = store.metadata_entry("k").unwrap().expect("entry");
    assert_eq!(entry.value, "v2");
    assert_eq!(entry.updated_at, 150);
}

#[test]
fn missing_keys_read_as_none() {
    let temp = TempDir::new().unwrap();
    let (store, _clock) = store_with_clock(&temp);
    assert!(store.metadata("absent").unwrap().is_none());
    assert!(store.metadata_entry("absent").unwrap().is_none());
    assert!(store.metadata_json::<Settings>("absent").unwrap().is_none());
}

#[test]
fn delete_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let (store, _clock) = store_with_clock(&temp);
    store.set_metadata("gone", "soon").unwrap();
    store.delete_metadata("gone").unwrap();
    store.delete_metadata("gone").unwrap();
    assert!(store.metadata("gone").unwrap().is_none());
}

#[test]
fn user_settings_round_trip_as_json() {
    let temp = TempDir::new().unwrap();
    let (store, _clock) = store_with_clock(&temp);
    let settings = Settings {
        theme: "dark".to_string(),
        refresh_seconds: 5,
    };
    store.set_metadata_json(USER_SETTINGS_KEY, &settings).unwrap();
    let loaded: Settings = store.metadata_json(USER_SETTINGS_KEY).unwrap().expect("settings");
    assert_eq!(loaded, settings);
    let raw = store.metadata(USER_SETTINGS_KEY).unwrap().expect("raw");
    assert!(raw.contains("\"theme\":\"dark\""));
}
