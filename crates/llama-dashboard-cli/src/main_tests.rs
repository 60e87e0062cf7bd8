// crates/llama-dashboard-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Entry Point Tests
// Description: Argument parsing and configuration resolution checks.
// Purpose: Keep flag handling stable for scripted maintenance jobs.
// ============================================================================

//! ## Overview
//! Unit tests for the CLI argument surface and config resolution.

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
use std::path::PathBuf;

use clap::Parser;
use llama_dashboard_store::DashboardStore;
use llama_dashboard_store::ModelStatus;
use llama_dashboard_store::NewModel;
use llama_dashboard_store::StoreConfig;
use tempfile::TempDir;

use super::Cli;
use super::Commands;
use super::DEFAULT_HISTORY_MINUTES;
use super::MetadataCommand;
use super::MetricsCommand;
use super::ModelsCommand;
use super::dispatch;
use super::parse_status;
use super::resolve_config;
use super::run;

// ============================================================================
// SECTION: Parsing
// ============================================================================

#[test]
fn history_defaults_to_ten_minutes() {
    let cli = Cli::try_parse_from(["llama-dashboard", "metrics", "history"]).unwrap();
    match cli.command {
        Commands::Metrics {
            command: MetricsCommand::History {
                minutes,
            },
        } => assert_eq!(minutes, DEFAULT_HISTORY_MINUTES),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn negative_minutes_are_rejected() {
    let result =
        Cli::try_parse_from(["llama-dashboard", "metrics", "history", "--minutes", "-5"]);
    assert!(result.is_err());
}

#[test]
fn global_flags_follow_subcommands() {
    let cli = Cli::try_parse_from(["llama-dashboard", "info", "--db", "/tmp/x.db", "--verbose"])
        .unwrap();
    assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
    assert!(cli.verbose);
}

#[test]
fn model_list_filters_parse() {
    let cli = Cli::try_parse_from([
        "llama-dashboard",
        "models",
        "list",
        "--status",
        "running",
        "--type",
        "mistral",
        "--name",
        "7B",
    ])
    .unwrap();
    let Commands::Models {
        command: ModelsCommand::List(args),
    } = cli.command
    else {
        panic!("expected models list");
    };
    assert_eq!(args.status, Some(ModelStatus::Running));
    assert_eq!(args.kind.as_deref(), Some("mistral"));
    assert_eq!(args.name.as_deref(), Some("7B"));
}

#[test]
fn unknown_status_is_rejected() {
    assert!(parse_status("paused").is_err());
    assert_eq!(parse_status("error").unwrap(), ModelStatus::Error);
    let result = Cli::try_parse_from(["llama-dashboard", "models", "list", "--status", "paused"]);
    assert!(result.is_err());
}

#[test]
fn metadata_set_takes_key_and_value() {
    let cli = Cli::try_parse_from(["llama-dashboard", "metadata", "set", "theme", "dark"]).unwrap();
    let Commands::Metadata {
        command: MetadataCommand::Set {
            key,
            value,
        },
    } = cli.command
    else {
        panic!("expected metadata set");
    };
    assert_eq!(key, "theme");
    assert_eq!(value, "dark");
}

// ============================================================================
// SECTION: Config Resolution
// ============================================================================

#[test]
fn explicit_config_file_is_loaded_and_db_overrides_path() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("dashboard.toml");
    std::fs::write(
        &config_path,
        "[store]\npath = \"from-file.db\"\nmetrics_retention_minutes = 30\n",
    )
    .unwrap();

    let loaded = resolve_config(Some(&config_path), None).unwrap();
    assert_eq!(loaded.path, PathBuf::from("from-file.db"));
    assert_eq!(loaded.metrics_retention_minutes, 30);

    let overridden = resolve_config(Some(&config_path), Some(Path::new("cli.db"))).unwrap();
    assert_eq!(overridden.path, PathBuf::from("cli.db"));
    assert_eq!(overridden.metrics_retention_minutes, 30);
}

#[test]
fn invalid_config_file_is_reported() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("dashboard.toml");
    std::fs::write(&config_path, "[store]\nmetrics_retention_minutes = 0\n").unwrap();
    let err = resolve_config(Some(&config_path), None).unwrap_err();
    assert!(err.to_string().contains("metrics_retention_minutes"));
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

#[test]
fn clear_requires_confirmation() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("guarded.db");
    let cli = Cli::try_parse_from(["llama-dashboard", "clear", "--db", db.to_str().unwrap()])
        .unwrap();
    let err = run(cli).unwrap_err();
    assert!(err.to_string().contains("--yes"));
    assert!(!db.exists());
}

#[test]
fn show_reports_missing_model() {
    let temp = TempDir::new().unwrap();
    let store = DashboardStore::open(StoreConfig::new(temp.path().join("show.db"))).unwrap();
    let id = store.create_model(&NewModel::named("present")).unwrap();

    let present = ModelsCommand::Show {
        id,
    };
    assert!(
        dispatch(
            &store,
            Commands::Models {
                command: present,
            },
        )
        .is_ok()
    );

    let missing = ModelsCommand::Show {
        id: id + 1,
    };
    let err = dispatch(
        &store,
        Commands::Models {
            command: missing,
        },
    )
    .unwrap_err();
    assert!(err.to_string().contains("not found"));
    store.close().unwrap();
}
