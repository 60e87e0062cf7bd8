// crates/llama-dashboard-store/src/schema.rs
// ============================================================================
// Module: Schema Registry
// Description: Declarative table definitions for the dashboard database.
// Purpose: Single source of truth for DDL, column lists, and merge policy.
// Dependencies: rusqlite, serde
// ============================================================================

//! ## Overview
//! Every table the store owns is described once as a [`TableSpec`]. DDL,
//! index creation, extension-row binding, and the import merge all read
//! from these definitions, so a column added here flows everywhere.
//!
//! Tables are listed parent-first in [`ALL_TABLES`]; creation and import
//! walk that order so foreign keys always find their parent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Serialize;

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::error::db_error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version written to the metadata table on first initialization.
pub const SCHEMA_VERSION: &str = "1.0";
/// Metadata key holding the schema version.
pub const DB_VERSION_KEY: &str = "db_version";

/// Columns maintained by the store rather than by record payloads.
const BOOKKEEPING_COLUMNS: [&str; 4] = ["id", "model_id", "created_at", "updated_at"];

// ============================================================================
// SECTION: Table Definition Types
// ============================================================================

/// One column: its name and the SQL type/constraint text that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name (unquoted).
    pub name: &'static str,
    /// Type and column constraints.
    pub definition: &'static str,
}

/// Builds a [`ColumnSpec`].
const fn column(name: &'static str, definition: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        definition,
    }
}

/// Secondary index on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name.
    pub name: &'static str,
    /// Indexed column list.
    pub columns: &'static str,
}

/// Foreign-key parent a merged row must find before it is imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentRef {
    /// Referencing column in this table.
    pub column: &'static str,
    /// Parent table.
    pub table: &'static str,
    /// Referenced column in the parent table.
    pub key: &'static str,
}

/// How a table's rows merge when importing a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Insert only rows whose key is absent; live rows are never touched.
    Append,
    /// Insert or replace on key conflict; the backup row wins.
    Replace,
}

/// Declarative table definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name.
    pub name: &'static str,
    /// Columns in storage order.
    pub columns: &'static [ColumnSpec],
    /// Table-level constraints (foreign keys).
    pub constraints: &'static [&'static str],
    /// Secondary indexes.
    pub indexes: &'static [IndexSpec],
    /// Primary key column used for merge existence checks.
    pub key: &'static str,
    /// Parent required by merged rows, if any.
    pub parent: Option<ParentRef>,
    /// Import merge policy.
    pub merge: MergePolicy,
}

impl TableSpec {
    /// Returns the idempotent `CREATE TABLE` statement.
    #[must_use]
    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|column| format!("{} {}", quote_ident(column.name), column.definition))
            .collect();
        parts.extend(self.constraints.iter().map(|constraint| (*constraint).to_string()));
        format!("CREATE TABLE IF NOT EXISTS {} (\n    {}\n)", self.name, parts.join(",\n    "))
    }

    /// Returns idempotent `CREATE INDEX` statements.
    #[must_use]
    pub fn index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|index| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    index.name, self.name, index.columns
                )
            })
            .collect()
    }

    /// Returns columns that carry record payload (not ids or timestamps).
    pub fn payload_columns(&self) -> impl Iterator<Item = &'static ColumnSpec> {
        self.columns.iter().filter(|column| !BOOKKEEPING_COLUMNS.contains(&column.name))
    }

    /// Returns true when the table declares `name`.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column.name == name)
    }
}

/// Double-quotes an SQL identifier.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ============================================================================
// SECTION: Metrics History
// ============================================================================

/// Rolling system metrics samples.
pub const METRICS_HISTORY: TableSpec = TableSpec {
    name: "metrics_history",
    columns: &[
        column("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        column("timestamp", "INTEGER NOT NULL"),
        column("cpu_usage", "REAL NOT NULL DEFAULT 0"),
        column("memory_usage", "REAL NOT NULL DEFAULT 0"),
        column("disk_usage", "REAL NOT NULL DEFAULT 0"),
        column("gpu_usage", "REAL NOT NULL DEFAULT 0"),
        column("gpu_temperature", "REAL NOT NULL DEFAULT 0"),
        column("gpu_memory_used", "REAL NOT NULL DEFAULT 0"),
        column("gpu_memory_total", "REAL NOT NULL DEFAULT 0"),
        column("gpu_power_usage", "REAL NOT NULL DEFAULT 0"),
        column("active_models", "INTEGER NOT NULL DEFAULT 0"),
        column("uptime", "INTEGER NOT NULL DEFAULT 0"),
        column("requests_per_minute", "REAL NOT NULL DEFAULT 0"),
        column("created_at", "INTEGER NOT NULL"),
    ],
    constraints: &[],
    indexes: &[
        IndexSpec {
            name: "idx_metrics_timestamp",
            columns: "timestamp",
        },
        IndexSpec {
            name: "idx_metrics_created_at",
            columns: "created_at",
        },
    ],
    key: "id",
    parent: None,
    merge: MergePolicy::Append,
};

// ============================================================================
// SECTION: Models
// ============================================================================

/// Core model identity and status rows.
pub const MODELS: TableSpec = TableSpec {
    name: "models",
    columns: &[
        column("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        column("name", "TEXT NOT NULL"),
        column("type", "TEXT NOT NULL DEFAULT 'llama'"),
        column(
            "status",
            "TEXT NOT NULL DEFAULT 'stopped' CHECK (status IN ('running', 'stopped', 'loading', \
             'error'))",
        ),
        column("model_path", "TEXT"),
        column("model_url", "TEXT"),
        column("hf_repo", "TEXT"),
        column("hf_file", "TEXT"),
        column("ctx_size", "INTEGER"),
        column("batch_size", "INTEGER"),
        column("ubatch_size", "INTEGER"),
        column("threads", "INTEGER"),
        column("gpu_layers", "INTEGER"),
        column("temperature", "REAL"),
        column("top_p", "REAL"),
        column("top_k", "INTEGER"),
        column("host", "TEXT"),
        column("port", "INTEGER"),
        column("file_size_bytes", "INTEGER"),
        column("fit_params_available", "INTEGER NOT NULL DEFAULT 0"),
        column("last_fit_params_check", "INTEGER"),
        column("created_at", "INTEGER NOT NULL"),
        column("updated_at", "INTEGER NOT NULL"),
    ],
    constraints: &[],
    indexes: &[
        IndexSpec {
            name: "idx_models_name",
            columns: "name",
        },
        IndexSpec {
            name: "idx_models_status",
            columns: "status",
        },
        IndexSpec {
            name: "idx_models_type",
            columns: "type",
        },
        IndexSpec {
            name: "idx_models_created",
            columns: "created_at",
        },
    ],
    key: "id",
    parent: None,
    merge: MergePolicy::Append,
};

// ============================================================================
// SECTION: Model Extension Tables
// ============================================================================

/// Foreign key shared by every extension table.
const MODEL_FOREIGN_KEY: &str = "FOREIGN KEY (model_id) REFERENCES models(id) ON DELETE CASCADE";

/// Merge parent shared by every extension table.
const MODEL_PARENT: ParentRef = ParentRef {
    column: "model_id",
    table: "models",
    key: "id",
};

/// Sampling, grammar, and RoPE parameters.
pub const MODEL_SAMPLING_CONFIG: TableSpec = TableSpec {
    name: "model_sampling_config",
    columns: &[
        column("model_id", "INTEGER PRIMARY KEY NOT NULL"),
        column("temperature", "REAL NOT NULL DEFAULT 0.8"),
        column("top_k", "INTEGER NOT NULL DEFAULT 40"),
        column("top_p", "REAL NOT NULL DEFAULT 0.9"),
        column("min_p", "REAL NOT NULL DEFAULT 0.1"),
        column("top_nsigma", "REAL NOT NULL DEFAULT -1.0"),
        column("xtc_probability", "REAL NOT NULL DEFAULT 0.0"),
        column("xtc_threshold", "REAL NOT NULL DEFAULT 0.1"),
        column("typical_p", "REAL NOT NULL DEFAULT 1.0"),
        column("repeat_last_n", "INTEGER NOT NULL DEFAULT 64"),
        column("repeat_penalty", "REAL NOT NULL DEFAULT 1.0"),
        column("presence_penalty", "REAL NOT NULL DEFAULT 0.0"),
        column("frequency_penalty", "REAL NOT NULL DEFAULT 0.0"),
        column("dry_multiplier", "REAL NOT NULL DEFAULT 0.0"),
        column("dry_base", "REAL NOT NULL DEFAULT 1.75"),
        column("dry_allowed_length", "INTEGER NOT NULL DEFAULT 2"),
        column("dry_penalty_last_n", "INTEGER NOT NULL DEFAULT -1"),
        column("dry_sequence_breaker", "TEXT"),
        column("dynatemp_range", "REAL NOT NULL DEFAULT 0.0"),
        column("dynatemp_exponent", "REAL NOT NULL DEFAULT 1.0"),
        column("mirostat", "INTEGER NOT NULL DEFAULT 0"),
        column("mirostat_eta", "REAL NOT NULL DEFAULT 0.1"),
        column("mirostat_tau", "REAL NOT NULL DEFAULT 5.0"),
        column("samplers", "TEXT"),
        column("sampler_seq", "TEXT NOT NULL DEFAULT 'edskypmxt'"),
        column("seed", "INTEGER NOT NULL DEFAULT -1"),
        column("grammar", "TEXT"),
        column("grammar_file", "TEXT"),
        column("json_schema", "TEXT"),
        column("json_schema_file", "TEXT"),
        column("ignore_eos", "INTEGER NOT NULL DEFAULT 0"),
        column("escape", "INTEGER NOT NULL DEFAULT 1"),
        column("rope_scaling_type", "TEXT"),
        column("rope_scale", "REAL"),
        column("rope_freq_base", "REAL"),
        column("rope_freq_scale", "REAL"),
        column("yarn_orig_ctx", "INTEGER NOT NULL DEFAULT 0"),
        column("yarn_ext_factor", "REAL NOT NULL DEFAULT -1.0"),
        column("yarn_attn_factor", "REAL NOT NULL DEFAULT -1.0"),
        column("yarn_beta_slow", "REAL NOT NULL DEFAULT -1.0"),
        column("yarn_beta_fast", "REAL NOT NULL DEFAULT -1.0"),
        column("flash_attn", "TEXT NOT NULL DEFAULT 'auto'"),
        column("logit_bias", "TEXT"),
        column("created_at", "INTEGER NOT NULL"),
        column("updated_at", "INTEGER NOT NULL"),
    ],
    constraints: &[MODEL_FOREIGN_KEY],
    indexes: &[],
    key: "model_id",
    parent: Some(MODEL_PARENT),
    merge: MergePolicy::Append,
};

/// KV cache and host memory settings.
pub const MODEL_MEMORY_CONFIG: TableSpec = TableSpec {
    name: "model_memory_config",
    columns: &[
        column("model_id", "INTEGER PRIMARY KEY NOT NULL"),
        column("cache_ram", "INTEGER NOT NULL DEFAULT -1"),
        column("cache_type_k", "TEXT"),
        column("cache_type_v", "TEXT"),
        column("mmap", "INTEGER NOT NULL DEFAULT 0"),
        column("mlock", "INTEGER NOT NULL DEFAULT 0"),
        column("numa", "TEXT"),
        column("defrag_thold", "REAL"),
        column("created_at", "INTEGER NOT NULL"),
        column("updated_at", "INTEGER NOT NULL"),
    ],
    constraints: &[MODEL_FOREIGN_KEY],
    indexes: &[],
    key: "model_id",
    parent: Some(MODEL_PARENT),
    merge: MergePolicy::Append,
};

/// GPU device selection and offload placement.
pub const MODEL_GPU_CONFIG: TableSpec = TableSpec {
    name: "model_gpu_config",
    columns: &[
        column("model_id", "INTEGER PRIMARY KEY NOT NULL"),
        column("device", "TEXT"),
        column("list_devices", "INTEGER NOT NULL DEFAULT 0"),
        column("gpu_layers", "INTEGER NOT NULL DEFAULT -1"),
        column("split_mode", "TEXT"),
        column("tensor_split", "TEXT"),
        column("main_gpu", "INTEGER"),
        column("kv_offload", "INTEGER NOT NULL DEFAULT 0"),
        column("repack", "INTEGER NOT NULL DEFAULT 0"),
        column("no_host", "INTEGER NOT NULL DEFAULT 0"),
        column("created_at", "INTEGER NOT NULL"),
        column("updated_at", "INTEGER NOT NULL"),
    ],
    constraints: &[MODEL_FOREIGN_KEY],
    indexes: &[],
    key: "model_id",
    parent: Some(MODEL_PARENT),
    merge: MergePolicy::Append,
};

/// Advanced runtime flags and free-form custom parameters.
pub const MODEL_ADVANCED_CONFIG: TableSpec = TableSpec {
    name: "model_advanced_config",
    columns: &[
        column("model_id", "INTEGER PRIMARY KEY NOT NULL"),
        column("swa_full", "INTEGER NOT NULL DEFAULT 0"),
        column("override_tensor", "TEXT"),
        column("cpu_moe", "INTEGER NOT NULL DEFAULT 0"),
        column("n_cpu_moe", "INTEGER NOT NULL DEFAULT 0"),
        column("kv_unified", "INTEGER NOT NULL DEFAULT 0"),
        column("pooling", "TEXT"),
        column("context_shift", "INTEGER NOT NULL DEFAULT 0"),
        column("rpc", "TEXT"),
        column("offline", "INTEGER NOT NULL DEFAULT 0"),
        column("override_kv", "TEXT"),
        column("op_offload", "INTEGER NOT NULL DEFAULT 0"),
        column("fit", "TEXT"),
        column("fit_target", "INTEGER NOT NULL DEFAULT 1024"),
        column("fit_ctx", "INTEGER NOT NULL DEFAULT 4096"),
        column("check_tensors", "INTEGER NOT NULL DEFAULT 0"),
        column("sleep_idle_seconds", "INTEGER NOT NULL DEFAULT -1"),
        column("polling", "TEXT"),
        column("polling_batch", "TEXT"),
        column("reasoning_format", "TEXT"),
        column("reasoning_budget", "INTEGER NOT NULL DEFAULT -1"),
        column("custom_params", "TEXT"),
        column("created_at", "INTEGER NOT NULL"),
        column("updated_at", "INTEGER NOT NULL"),
    ],
    constraints: &[MODEL_FOREIGN_KEY],
    indexes: &[],
    key: "model_id",
    parent: Some(MODEL_PARENT),
    merge: MergePolicy::Append,
};

/// LoRA adapters, control vectors, and speculative draft model.
pub const MODEL_LORA_CONFIG: TableSpec = TableSpec {
    name: "model_lora_config",
    columns: &[
        column("model_id", "INTEGER PRIMARY KEY NOT NULL"),
        column("lora", "TEXT"),
        column("lora_scaled", "TEXT"),
        column("control_vector", "TEXT"),
        column("control_vector_scaled", "TEXT"),
        column("control_vector_layer_range", "TEXT"),
        column("model_draft", "TEXT"),
        column("model_url_draft", "TEXT"),
        column("ctx_size_draft", "INTEGER"),
        column("threads_draft", "INTEGER"),
        column("threads_batch_draft", "INTEGER"),
        column("draft_max", "INTEGER NOT NULL DEFAULT 16"),
        column("draft_min", "INTEGER NOT NULL DEFAULT 0"),
        column("draft_p_min", "REAL NOT NULL DEFAULT 0.8"),
        column("cache_type_k_draft", "TEXT"),
        column("cache_type_v_draft", "TEXT"),
        column("cpu_moe_draft", "INTEGER NOT NULL DEFAULT 0"),
        column("n_cpu_moe_draft", "INTEGER NOT NULL DEFAULT 0"),
        column("n_gpu_layers_draft", "INTEGER"),
        column("device_draft", "TEXT"),
        column("spec_replace", "TEXT"),
        column("created_at", "INTEGER NOT NULL"),
        column("updated_at", "INTEGER NOT NULL"),
    ],
    constraints: &[MODEL_FOREIGN_KEY],
    indexes: &[],
    key: "model_id",
    parent: Some(MODEL_PARENT),
    merge: MergePolicy::Append,
};

/// Multimodal projector settings.
pub const MODEL_MULTIMODAL_CONFIG: TableSpec = TableSpec {
    name: "model_multimodal_config",
    columns: &[
        column("model_id", "INTEGER PRIMARY KEY NOT NULL"),
        column("mmproj", "TEXT"),
        column("mmproj_url", "TEXT"),
        column("mmproj_auto", "INTEGER NOT NULL DEFAULT 0"),
        column("mmproj_offload", "INTEGER NOT NULL DEFAULT 0"),
        column("image_min_tokens", "INTEGER"),
        column("image_max_tokens", "INTEGER"),
        column("created_at", "INTEGER NOT NULL"),
        column("updated_at", "INTEGER NOT NULL"),
    ],
    constraints: &[MODEL_FOREIGN_KEY],
    indexes: &[],
    key: "model_id",
    parent: Some(MODEL_PARENT),
    merge: MergePolicy::Append,
};

/// Derived fit statistics from model analysis.
pub const MODEL_FIT_PARAMS: TableSpec = TableSpec {
    name: "model_fit_params",
    columns: &[
        column("model_id", "INTEGER PRIMARY KEY NOT NULL"),
        column("recommended_ctx_size", "INTEGER"),
        column("recommended_gpu_layers", "INTEGER"),
        column("recommended_tensor_split", "TEXT"),
        column("file_size_bytes", "INTEGER"),
        column("quantization_type", "TEXT"),
        column("parameter_count", "INTEGER"),
        column("architecture", "TEXT"),
        column("context_window", "INTEGER"),
        column("fit_params_analyzed_at", "INTEGER"),
        column("fit_params_success", "INTEGER NOT NULL DEFAULT 0"),
        column("fit_params_error", "TEXT"),
        column("fit_params_raw_output", "TEXT"),
        column("projected_cpu_memory_mb", "REAL"),
        column("projected_gpu_memory_mb", "REAL"),
        column("created_at", "INTEGER NOT NULL"),
        column("updated_at", "INTEGER NOT NULL"),
    ],
    constraints: &[MODEL_FOREIGN_KEY],
    indexes: &[],
    key: "model_id",
    parent: Some(MODEL_PARENT),
    merge: MergePolicy::Append,
};

// ============================================================================
// SECTION: Server Config
// ============================================================================

/// Global llama-server settings (singleton row `id = 1`).
pub const MODEL_SERVER_CONFIG: TableSpec = TableSpec {
    name: "model_server_config",
    columns: &[
        column("id", "INTEGER PRIMARY KEY NOT NULL CHECK (id = 1)"),
        column("host", "TEXT NOT NULL DEFAULT '127.0.0.1'"),
        column("port", "INTEGER NOT NULL DEFAULT 8080"),
        column("api_prefix", "TEXT"),
        column("path", "TEXT"),
        column("webui", "TEXT"),
        column("webui_config_file", "TEXT"),
        column("no_webui", "INTEGER NOT NULL DEFAULT 0"),
        column("embeddings", "INTEGER NOT NULL DEFAULT 0"),
        column("reranking", "INTEGER NOT NULL DEFAULT 0"),
        column("api_key", "TEXT"),
        column("api_key_file", "TEXT"),
        column("ssl_key_file", "TEXT"),
        column("ssl_cert_file", "TEXT"),
        column("timeout", "INTEGER NOT NULL DEFAULT 600"),
        column("threads_http", "INTEGER"),
        column("cache_reuse", "INTEGER"),
        column("metrics_enabled", "INTEGER NOT NULL DEFAULT 1"),
        column("props_enabled", "INTEGER NOT NULL DEFAULT 0"),
        column("slots_enabled", "INTEGER NOT NULL DEFAULT 0"),
        column("slot_save_path", "TEXT"),
        column("media_path", "TEXT"),
        column("models_dir", "TEXT"),
        column("models_preset", "TEXT"),
        column("models_max", "INTEGER NOT NULL DEFAULT 4"),
        column("models_autoload", "INTEGER NOT NULL DEFAULT 0"),
        column("jinja", "INTEGER NOT NULL DEFAULT 0"),
        column("chat_template", "TEXT"),
        column("chat_template_file", "TEXT"),
        column("chat_template_kwargs", "TEXT"),
        column("prefill_assistant", "INTEGER NOT NULL DEFAULT 0"),
        column("ctx_checkpoints", "INTEGER NOT NULL DEFAULT 8"),
        column("verbose_prompt", "INTEGER NOT NULL DEFAULT 0"),
        column("warmup", "INTEGER NOT NULL DEFAULT 0"),
        column("spm_infill", "INTEGER NOT NULL DEFAULT 0"),
        column("log_disable", "INTEGER NOT NULL DEFAULT 0"),
        column("log_file", "TEXT"),
        column("log_colors", "TEXT"),
        column("log_verbose", "INTEGER NOT NULL DEFAULT 0"),
        column("log_prefix", "INTEGER NOT NULL DEFAULT 0"),
        column("log_timestamps", "INTEGER NOT NULL DEFAULT 0"),
        column("created_at", "INTEGER NOT NULL"),
        column("updated_at", "INTEGER NOT NULL"),
    ],
    constraints: &[],
    indexes: &[],
    key: "id",
    parent: None,
    merge: MergePolicy::Replace,
};

// ============================================================================
// SECTION: Metadata
// ============================================================================

/// Generic key/value metadata.
pub const METADATA: TableSpec = TableSpec {
    name: "metadata",
    columns: &[
        column("key", "TEXT PRIMARY KEY NOT NULL"),
        column("value", "TEXT NOT NULL"),
        column("updated_at", "INTEGER NOT NULL"),
    ],
    constraints: &[],
    indexes: &[],
    key: "key",
    parent: None,
    merge: MergePolicy::Replace,
};

// ============================================================================
// SECTION: Registry
// ============================================================================

/// The seven 1:1 model extension tables.
pub const EXTENSION_TABLES: [&TableSpec; 7] = [
    &MODEL_SAMPLING_CONFIG,
    &MODEL_MEMORY_CONFIG,
    &MODEL_GPU_CONFIG,
    &MODEL_ADVANCED_CONFIG,
    &MODEL_LORA_CONFIG,
    &MODEL_MULTIMODAL_CONFIG,
    &MODEL_FIT_PARAMS,
];

/// Every table, parent-first.
pub const ALL_TABLES: [&TableSpec; 11] = [
    &METRICS_HISTORY,
    &MODELS,
    &MODEL_SAMPLING_CONFIG,
    &MODEL_MEMORY_CONFIG,
    &MODEL_GPU_CONFIG,
    &MODEL_ADVANCED_CONFIG,
    &MODEL_LORA_CONFIG,
    &MODEL_MULTIMODAL_CONFIG,
    &MODEL_FIT_PARAMS,
    &MODEL_SERVER_CONFIG,
    &METADATA,
];

/// Returns the full idempotent DDL script.
#[must_use]
pub fn ddl_script() -> String {
    let mut script = String::new();
    for table in ALL_TABLES {
        script.push_str(&table.create_sql());
        script.push_str(";\n");
        for index in table.index_sql() {
            script.push_str(&index);
            script.push_str(";\n");
        }
    }
    script
}

/// Applies the schema and seeds or validates the schema version.
///
/// # Errors
///
/// Returns [`StoreError::VersionMismatch`] when the file carries a
/// different schema version, or [`StoreError::Db`] when DDL fails.
pub fn apply_schema(connection: &mut Connection, now_ms: i64) -> StoreResult<()> {
    let tx = connection.transaction().map_err(db_error)?;
    tx.execute_batch(&ddl_script()).map_err(db_error)?;
    tx.execute(
        "INSERT OR IGNORE INTO metadata (key, value, updated_at) VALUES (?1, ?2, ?3)",
        params![DB_VERSION_KEY, SCHEMA_VERSION, now_ms],
    )
    .map_err(db_error)?;
    let version: Option<String> = tx
        .query_row("SELECT value FROM metadata WHERE key = ?1", params![DB_VERSION_KEY], |row| {
            row.get(0)
        })
        .optional()
        .map_err(db_error)?;
    match version.as_deref() {
        Some(SCHEMA_VERSION) => {}
        Some(other) => {
            return Err(StoreError::VersionMismatch(format!(
                "unsupported schema version: {other}"
            )));
        }
        None => {
            return Err(StoreError::Db("schema version row missing after seed".to_string()));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
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

    use super::ALL_TABLES;
    use super::EXTENSION_TABLES;
    use super::MODEL_SAMPLING_CONFIG;
    use super::MergePolicy;
    use super::apply_schema;
    use super::quote_ident;

    #[test]
    fn reserved_column_names_are_quoted() {
        let sql = MODEL_SAMPLING_CONFIG.create_sql();
        assert!(sql.contains("\"escape\" INTEGER NOT NULL DEFAULT 1"));
        assert!(sql.contains("FOREIGN KEY (model_id) REFERENCES models(id) ON DELETE CASCADE"));
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn extension_tables_key_on_model_id() {
        for table in EXTENSION_TABLES {
            assert_eq!(table.key, "model_id", "{}", table.name);
            assert_eq!(table.merge, MergePolicy::Append);
            assert!(table.parent.is_some());
            assert!(table.payload_columns().all(|column| column.name != "model_id"));
        }
    }

    #[test]
    fn every_key_is_a_declared_column() {
        for table in ALL_TABLES {
            assert!(table.has_column(table.key), "{}", table.name);
        }
    }

    #[test]
    fn apply_schema_is_idempotent() {
        let mut conn = Connection::open_in_memory().expect("connection");
        apply_schema(&mut conn, 1).expect("first apply");
        apply_schema(&mut conn, 2).expect("second apply");
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE \
                 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(tables, 11);
        let seeded_at: i64 = conn
            .query_row("SELECT updated_at FROM metadata WHERE key = 'db_version'", [], |row| {
                row.get(0)
            })
            .expect("version row");
        assert_eq!(seeded_at, 1);
    }

    #[test]
    fn foreign_version_is_rejected() {
        let mut conn = Connection::open_in_memory().expect("connection");
        apply_schema(&mut conn, 1).expect("apply");
        conn.execute("UPDATE metadata SET value = '9.9' WHERE key = 'db_version'", [])
            .expect("tamper");
        let err = apply_schema(&mut conn, 2).unwrap_err();
        assert!(matches!(err, super::StoreError::VersionMismatch(_)));
    }
}
