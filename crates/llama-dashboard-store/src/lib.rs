// crates/llama-dashboard-store/src/lib.rs
// ============================================================================
// Module: Llama Dashboard Store
// Description: Embedded SQLite persistence for the llama dashboard.
// Purpose: Store model configuration, metrics history, and metadata.
// Dependencies: rusqlite, serde, serde_json, thiserror, toml, tracing
// ============================================================================

//! ## Overview
//! One on-disk `SQLite` file holds:
//! - model rows and their 1:1 extension tables ([`models`], [`extensions`]),
//! - a rolling window of system metrics ([`metrics`]),
//! - key/value metadata including the schema version ([`metadata`]).
//!
//! [`DashboardStore`] is the entry point for long-lived callers. The
//! per-module functions take an explicit connection and timestamp for
//! callers that manage their own handle.

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod maintenance;
pub mod metadata;
pub mod metrics;
pub mod models;
pub mod schema;
pub mod store;

pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use config::ConfigError;
pub use config::JournalMode;
pub use config::StoreConfig;
pub use config::SyncMode;
pub use connection::CheckpointStats;
pub use error::StoreError;
pub use error::StoreResult;
pub use extensions::AdvancedConfig;
pub use extensions::CompleteModelConfig;
pub use extensions::ExtensionRecord;
pub use extensions::FitParams;
pub use extensions::GpuConfig;
pub use extensions::LoraConfig;
pub use extensions::MemoryConfig;
pub use extensions::ModelExtension;
pub use extensions::MultimodalConfig;
pub use extensions::SamplingConfig;
pub use extensions::ServerConfig;
pub use extensions::ServerConfigRecord;
pub use maintenance::ClearReport;
pub use maintenance::ImportReport;
pub use maintenance::TableImport;
pub use metadata::MetadataEntry;
pub use metadata::USER_SETTINGS_KEY;
pub use metrics::MetricSample;
pub use metrics::MetricSampleInput;
pub use models::Model;
pub use models::ModelFilter;
pub use models::ModelKind;
pub use models::ModelPatch;
pub use models::ModelStatus;
pub use models::NewModel;
pub use schema::SCHEMA_VERSION;
pub use store::DashboardStore;
pub use store::with_connection;
