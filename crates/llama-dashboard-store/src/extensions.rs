// crates/llama-dashboard-store/src/extensions.rs
// ============================================================================
// Module: Model Extensions
// Description: Typed 1:1 extension records and the server-config singleton.
// Purpose: Store detailed llama-server settings keyed by model id.
// Dependencies: rusqlite, serde, serde_json
// ============================================================================

//! ## Overview
//! Each extension table has a typed record implementing [`ModelExtension`].
//! Records bind to their table through serde: a record is serialized to a
//! JSON object and its fields are matched to the table's payload columns by
//! name, so the column list in [`crate::schema`] and the struct fields must
//! agree. Reads go the other way, building a JSON object from the row and
//! decoding it with serde. Booleans are stored as `0`/`1`.
//!
//! Extension rows are created lazily: a model has none until a caller saves
//! one. Saving upserts on `model_id`, keeping the first `created_at`.
//! Rows disappear with their model through the `ON DELETE CASCADE` foreign
//! key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::time::UNIX_EPOCH;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use rusqlite::types::ValueRef;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::de::Error as _;
use serde_json::Map;
use serde_json::Number;

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::error::db_error;
use crate::models;
use crate::models::Model;
use crate::schema::MODEL_ADVANCED_CONFIG;
use crate::schema::MODEL_FIT_PARAMS;
use crate::schema::MODEL_GPU_CONFIG;
use crate::schema::MODEL_LORA_CONFIG;
use crate::schema::MODEL_MEMORY_CONFIG;
use crate::schema::MODEL_MULTIMODAL_CONFIG;
use crate::schema::MODEL_SAMPLING_CONFIG;
use crate::schema::MODEL_SERVER_CONFIG;
use crate::schema::TableSpec;
use crate::schema::quote_ident;

// ============================================================================
// SECTION: Extension Trait
// ============================================================================

/// A typed record stored 1:1 against a model.
pub trait ModelExtension: Serialize + DeserializeOwned + Default {
    /// Backing table.
    const TABLE: &'static TableSpec;
}

/// A stored extension row with bookkeeping columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionRecord<T> {
    /// Owning model id.
    pub model_id: i64,
    /// First save time in unix epoch milliseconds.
    pub created_at: i64,
    /// Last save time in unix epoch milliseconds.
    pub updated_at: i64,
    /// Record payload.
    #[serde(flatten)]
    pub config: T,
}

/// The stored server-config singleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfigRecord {
    /// First save time in unix epoch milliseconds.
    pub created_at: i64,
    /// Last save time in unix epoch milliseconds.
    pub updated_at: i64,
    /// Settings payload.
    #[serde(flatten)]
    pub config: ServerConfig,
}

/// A model row together with every extension row that exists for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteModelConfig {
    /// Core row.
    pub model: Model,
    /// Sampling settings.
    pub sampling: Option<ExtensionRecord<SamplingConfig>>,
    /// Memory settings.
    pub memory: Option<ExtensionRecord<MemoryConfig>>,
    /// GPU settings.
    pub gpu: Option<ExtensionRecord<GpuConfig>>,
    /// Advanced settings.
    pub advanced: Option<ExtensionRecord<AdvancedConfig>>,
    /// LoRA and draft-model settings.
    pub lora: Option<ExtensionRecord<LoraConfig>>,
    /// Multimodal settings.
    pub multimodal: Option<ExtensionRecord<MultimodalConfig>>,
    /// Fit statistics.
    pub fit_params: Option<ExtensionRecord<FitParams>>,
}

// ============================================================================
// SECTION: Sampling
// ============================================================================

/// Sampling, grammar, and `RoPE` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Sampling temperature.
    pub temperature: f64,
    /// Top-k cutoff.
    pub top_k: i64,
    /// Nucleus threshold.
    pub top_p: f64,
    /// Minimum probability relative to the top token.
    pub min_p: f64,
    /// Top-n-sigma cutoff (`-1` disables).
    pub top_nsigma: f64,
    /// XTC removal probability.
    pub xtc_probability: f64,
    /// XTC threshold.
    pub xtc_threshold: f64,
    /// Locally typical sampling threshold.
    pub typical_p: f64,
    /// Tokens considered for repetition penalty.
    pub repeat_last_n: i64,
    /// Repetition penalty.
    pub repeat_penalty: f64,
    /// Presence penalty.
    pub presence_penalty: f64,
    /// Frequency penalty.
    pub frequency_penalty: f64,
    /// DRY multiplier.
    pub dry_multiplier: f64,
    /// DRY base.
    pub dry_base: f64,
    /// DRY allowed length.
    pub dry_allowed_length: i64,
    /// DRY penalty window (`-1` is context size).
    pub dry_penalty_last_n: i64,
    /// DRY sequence breaker.
    pub dry_sequence_breaker: Option<String>,
    /// Dynamic temperature range.
    pub dynatemp_range: f64,
    /// Dynamic temperature exponent.
    pub dynatemp_exponent: f64,
    /// Mirostat mode (0, 1, 2).
    pub mirostat: i64,
    /// Mirostat learning rate.
    pub mirostat_eta: f64,
    /// Mirostat target entropy.
    pub mirostat_tau: f64,
    /// Sampler list.
    pub samplers: Option<String>,
    /// Sampler order shorthand.
    pub sampler_seq: String,
    /// RNG seed (`-1` is random).
    pub seed: i64,
    /// Inline grammar.
    pub grammar: Option<String>,
    /// Grammar file path.
    pub grammar_file: Option<String>,
    /// Inline JSON schema.
    pub json_schema: Option<String>,
    /// JSON schema file path.
    pub json_schema_file: Option<String>,
    /// Ignore end-of-stream tokens.
    #[serde(deserialize_with = "bool_from_sql")]
    pub ignore_eos: bool,
    /// Process escape sequences in prompts.
    #[serde(deserialize_with = "bool_from_sql")]
    pub escape: bool,
    /// `RoPE` scaling type.
    pub rope_scaling_type: Option<String>,
    /// `RoPE` context scale factor.
    pub rope_scale: Option<f64>,
    /// `RoPE` base frequency.
    pub rope_freq_base: Option<f64>,
    /// `RoPE` frequency scale.
    pub rope_freq_scale: Option<f64>,
    /// `YaRN` original context size.
    pub yarn_orig_ctx: i64,
    /// `YaRN` extrapolation mix factor.
    pub yarn_ext_factor: f64,
    /// `YaRN` attention magnitude.
    pub yarn_attn_factor: f64,
    /// `YaRN` low correction dimension.
    pub yarn_beta_slow: f64,
    /// `YaRN` high correction dimension.
    pub yarn_beta_fast: f64,
    /// Flash attention mode (`on`, `off`, `auto`).
    pub flash_attn: String,
    /// Logit bias list (`TOKEN(+/-)BIAS`, comma separated).
    pub logit_bias: Option<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.9,
            min_p: 0.1,
            top_nsigma: -1.0,
            xtc_probability: 0.0,
            xtc_threshold: 0.1,
            typical_p: 1.0,
            repeat_last_n: 64,
            repeat_penalty: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            dry_multiplier: 0.0,
            dry_base: 1.75,
            dry_allowed_length: 2,
            dry_penalty_last_n: -1,
            dry_sequence_breaker: None,
            dynatemp_range: 0.0,
            dynatemp_exponent: 1.0,
            mirostat: 0,
            mirostat_eta: 0.1,
            mirostat_tau: 5.0,
            samplers: None,
            sampler_seq: "edskypmxt".to_string(),
            seed: -1,
            grammar: None,
            grammar_file: None,
            json_schema: None,
            json_schema_file: None,
            ignore_eos: false,
            escape: true,
            rope_scaling_type: None,
            rope_scale: None,
            rope_freq_base: None,
            rope_freq_scale: None,
            yarn_orig_ctx: 0,
            yarn_ext_factor: -1.0,
            yarn_attn_factor: -1.0,
            yarn_beta_slow: -1.0,
            yarn_beta_fast: -1.0,
            flash_attn: "auto".to_string(),
            logit_bias: None,
        }
    }
}

impl ModelExtension for SamplingConfig {
    const TABLE: &'static TableSpec = &MODEL_SAMPLING_CONFIG;
}

// ============================================================================
// SECTION: Memory
// ============================================================================

/// KV cache and host memory settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Prompt cache RAM budget in MiB (`-1` unlimited).
    pub cache_ram: i64,
    /// K cache data type.
    pub cache_type_k: Option<String>,
    /// V cache data type.
    pub cache_type_v: Option<String>,
    /// Memory-map the weights.
    #[serde(deserialize_with = "bool_from_sql")]
    pub mmap: bool,
    /// Lock the weights in RAM.
    #[serde(deserialize_with = "bool_from_sql")]
    pub mlock: bool,
    /// NUMA strategy.
    pub numa: Option<String>,
    /// KV cache defragmentation threshold.
    pub defrag_thold: Option<f64>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cache_ram: -1,
            cache_type_k: None,
            cache_type_v: None,
            mmap: false,
            mlock: false,
            numa: None,
            defrag_thold: None,
        }
    }
}

impl ModelExtension for MemoryConfig {
    const TABLE: &'static TableSpec = &MODEL_MEMORY_CONFIG;
}

// ============================================================================
// SECTION: GPU
// ============================================================================

/// GPU device selection and offload placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Device list.
    pub device: Option<String>,
    /// List devices at startup.
    #[serde(deserialize_with = "bool_from_sql")]
    pub list_devices: bool,
    /// Layers to offload (`-1` all).
    pub gpu_layers: i64,
    /// Multi-GPU split mode.
    pub split_mode: Option<String>,
    /// Per-device tensor split proportions.
    pub tensor_split: Option<String>,
    /// Primary device index.
    pub main_gpu: Option<i64>,
    /// Disable KV offload.
    #[serde(deserialize_with = "bool_from_sql")]
    pub kv_offload: bool,
    /// Repack weights.
    #[serde(deserialize_with = "bool_from_sql")]
    pub repack: bool,
    /// Bypass host buffers.
    #[serde(deserialize_with = "bool_from_sql")]
    pub no_host: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            device: None,
            list_devices: false,
            gpu_layers: -1,
            split_mode: None,
            tensor_split: None,
            main_gpu: None,
            kv_offload: false,
            repack: false,
            no_host: false,
        }
    }
}

impl ModelExtension for GpuConfig {
    const TABLE: &'static TableSpec = &MODEL_GPU_CONFIG;
}

// ============================================================================
// SECTION: Advanced
// ============================================================================

/// Advanced runtime flags and custom parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    /// Full-size sliding window attention cache.
    #[serde(deserialize_with = "bool_from_sql")]
    pub swa_full: bool,
    /// Tensor buffer overrides.
    pub override_tensor: Option<String>,
    /// Keep all MoE experts on CPU.
    #[serde(deserialize_with = "bool_from_sql")]
    pub cpu_moe: bool,
    /// MoE layers kept on CPU.
    pub n_cpu_moe: i64,
    /// Unified KV buffer.
    #[serde(deserialize_with = "bool_from_sql")]
    pub kv_unified: bool,
    /// Embedding pooling type.
    pub pooling: Option<String>,
    /// Enable context shift.
    #[serde(deserialize_with = "bool_from_sql")]
    pub context_shift: bool,
    /// RPC servers.
    pub rpc: Option<String>,
    /// Offline mode.
    #[serde(deserialize_with = "bool_from_sql")]
    pub offline: bool,
    /// Model metadata overrides.
    pub override_kv: Option<String>,
    /// Offload host tensor operations.
    #[serde(deserialize_with = "bool_from_sql")]
    pub op_offload: bool,
    /// Automatic fit mode.
    pub fit: Option<String>,
    /// Fit target margin in MiB.
    pub fit_target: i64,
    /// Minimum context for fitting.
    pub fit_ctx: i64,
    /// Validate tensor data.
    #[serde(deserialize_with = "bool_from_sql")]
    pub check_tensors: bool,
    /// Idle seconds before sleeping (`-1` never).
    pub sleep_idle_seconds: i64,
    /// Polling level.
    pub polling: Option<String>,
    /// Batch polling level.
    pub polling_batch: Option<String>,
    /// Reasoning output format.
    pub reasoning_format: Option<String>,
    /// Reasoning token budget (`-1` unlimited).
    pub reasoning_budget: i64,
    /// Free-form extra parameters.
    pub custom_params: Option<String>,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            swa_full: false,
            override_tensor: None,
            cpu_moe: false,
            n_cpu_moe: 0,
            kv_unified: false,
            pooling: None,
            context_shift: false,
            rpc: None,
            offline: false,
            override_kv: None,
            op_offload: false,
            fit: None,
            fit_target: 1024,
            fit_ctx: 4096,
            check_tensors: false,
            sleep_idle_seconds: -1,
            polling: None,
            polling_batch: None,
            reasoning_format: None,
            reasoning_budget: -1,
            custom_params: None,
        }
    }
}

impl ModelExtension for AdvancedConfig {
    const TABLE: &'static TableSpec = &MODEL_ADVANCED_CONFIG;
}

// ============================================================================
// SECTION: LoRA
// ============================================================================

/// LoRA adapters, control vectors, and speculative draft model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    /// LoRA adapter paths.
    pub lora: Option<String>,
    /// Scaled LoRA adapters.
    pub lora_scaled: Option<String>,
    /// Control vector paths.
    pub control_vector: Option<String>,
    /// Scaled control vectors.
    pub control_vector_scaled: Option<String>,
    /// Layer range for control vectors.
    pub control_vector_layer_range: Option<String>,
    /// Draft model path.
    pub model_draft: Option<String>,
    /// Draft model URL.
    pub model_url_draft: Option<String>,
    /// Draft context size.
    pub ctx_size_draft: Option<i64>,
    /// Draft generation threads.
    pub threads_draft: Option<i64>,
    /// Draft batch threads.
    pub threads_batch_draft: Option<i64>,
    /// Maximum drafted tokens.
    pub draft_max: i64,
    /// Minimum drafted tokens.
    pub draft_min: i64,
    /// Minimum draft probability.
    pub draft_p_min: f64,
    /// Draft K cache type.
    pub cache_type_k_draft: Option<String>,
    /// Draft V cache type.
    pub cache_type_v_draft: Option<String>,
    /// Keep draft MoE experts on CPU.
    #[serde(deserialize_with = "bool_from_sql")]
    pub cpu_moe_draft: bool,
    /// Draft MoE layers kept on CPU.
    pub n_cpu_moe_draft: i64,
    /// Draft layers offloaded to GPU.
    pub n_gpu_layers_draft: Option<i64>,
    /// Draft devices.
    pub device_draft: Option<String>,
    /// Draft token replacement rules.
    pub spec_replace: Option<String>,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            lora: None,
            lora_scaled: None,
            control_vector: None,
            control_vector_scaled: None,
            control_vector_layer_range: None,
            model_draft: None,
            model_url_draft: None,
            ctx_size_draft: None,
            threads_draft: None,
            threads_batch_draft: None,
            draft_max: 16,
            draft_min: 0,
            draft_p_min: 0.8,
            cache_type_k_draft: None,
            cache_type_v_draft: None,
            cpu_moe_draft: false,
            n_cpu_moe_draft: 0,
            n_gpu_layers_draft: None,
            device_draft: None,
            spec_replace: None,
        }
    }
}

impl ModelExtension for LoraConfig {
    const TABLE: &'static TableSpec = &MODEL_LORA_CONFIG;
}

// ============================================================================
// SECTION: Multimodal
// ============================================================================

/// Multimodal projector settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultimodalConfig {
    /// Projector file path.
    pub mmproj: Option<String>,
    /// Projector URL.
    pub mmproj_url: Option<String>,
    /// Fetch the projector automatically.
    #[serde(deserialize_with = "bool_from_sql")]
    pub mmproj_auto: bool,
    /// Offload the projector to GPU.
    #[serde(deserialize_with = "bool_from_sql")]
    pub mmproj_offload: bool,
    /// Minimum image tokens.
    pub image_min_tokens: Option<i64>,
    /// Maximum image tokens.
    pub image_max_tokens: Option<i64>,
}

impl ModelExtension for MultimodalConfig {
    const TABLE: &'static TableSpec = &MODEL_MULTIMODAL_CONFIG;
}

// ============================================================================
// SECTION: Fit Params
// ============================================================================

/// Derived fit statistics from model file analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitParams {
    /// Recommended context size.
    pub recommended_ctx_size: Option<i64>,
    /// Recommended GPU layer count.
    pub recommended_gpu_layers: Option<i64>,
    /// Recommended tensor split.
    pub recommended_tensor_split: Option<String>,
    /// Weights file size in bytes.
    pub file_size_bytes: Option<i64>,
    /// Quantization label.
    pub quantization_type: Option<String>,
    /// Parameter count.
    pub parameter_count: Option<i64>,
    /// Architecture label.
    pub architecture: Option<String>,
    /// Trained context window.
    pub context_window: Option<i64>,
    /// Analysis time in unix epoch milliseconds; save time when absent.
    pub fit_params_analyzed_at: Option<i64>,
    /// Whether the analysis succeeded.
    #[serde(deserialize_with = "bool_from_sql")]
    pub fit_params_success: bool,
    /// Analysis error message.
    pub fit_params_error: Option<String>,
    /// Raw analyzer output.
    pub fit_params_raw_output: Option<String>,
    /// Projected host memory in MiB.
    pub projected_cpu_memory_mb: Option<f64>,
    /// Projected device memory in MiB.
    pub projected_gpu_memory_mb: Option<f64>,
}

impl ModelExtension for FitParams {
    const TABLE: &'static TableSpec = &MODEL_FIT_PARAMS;
}

// ============================================================================
// SECTION: Server Config
// ============================================================================

/// Global llama-server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: i64,
    /// API path prefix.
    pub api_prefix: Option<String>,
    /// Static file path.
    pub path: Option<String>,
    /// Web UI selection.
    pub webui: Option<String>,
    /// Web UI config file.
    pub webui_config_file: Option<String>,
    /// Disable the web UI.
    #[serde(deserialize_with = "bool_from_sql")]
    pub no_webui: bool,
    /// Embeddings-only endpoint.
    #[serde(deserialize_with = "bool_from_sql")]
    pub embeddings: bool,
    /// Reranking endpoint.
    #[serde(deserialize_with = "bool_from_sql")]
    pub reranking: bool,
    /// API key.
    pub api_key: Option<String>,
    /// API key file.
    pub api_key_file: Option<String>,
    /// TLS private key file.
    pub ssl_key_file: Option<String>,
    /// TLS certificate file.
    pub ssl_cert_file: Option<String>,
    /// Request timeout in seconds.
    pub timeout: i64,
    /// HTTP worker threads.
    pub threads_http: Option<i64>,
    /// Minimum chunk size for KV cache reuse.
    pub cache_reuse: Option<i64>,
    /// Expose the metrics endpoint.
    #[serde(deserialize_with = "bool_from_sql")]
    pub metrics_enabled: bool,
    /// Expose the props endpoint.
    #[serde(deserialize_with = "bool_from_sql")]
    pub props_enabled: bool,
    /// Expose the slots endpoint.
    #[serde(deserialize_with = "bool_from_sql")]
    pub slots_enabled: bool,
    /// Slot save directory.
    pub slot_save_path: Option<String>,
    /// Media directory.
    pub media_path: Option<String>,
    /// Router models directory.
    pub models_dir: Option<String>,
    /// Router models preset file.
    pub models_preset: Option<String>,
    /// Router maximum loaded models.
    pub models_max: i64,
    /// Router loads models on demand.
    #[serde(deserialize_with = "bool_from_sql")]
    pub models_autoload: bool,
    /// Use Jinja chat templates.
    #[serde(deserialize_with = "bool_from_sql")]
    pub jinja: bool,
    /// Chat template name.
    pub chat_template: Option<String>,
    /// Chat template file.
    pub chat_template_file: Option<String>,
    /// Chat template keyword arguments.
    pub chat_template_kwargs: Option<String>,
    /// Prefill the assistant turn.
    #[serde(deserialize_with = "bool_from_sql")]
    pub prefill_assistant: bool,
    /// Context checkpoints per slot.
    pub ctx_checkpoints: i64,
    /// Print the prompt before generation.
    #[serde(deserialize_with = "bool_from_sql")]
    pub verbose_prompt: bool,
    /// Run a warmup pass.
    #[serde(deserialize_with = "bool_from_sql")]
    pub warmup: bool,
    /// SPM infill pattern.
    #[serde(deserialize_with = "bool_from_sql")]
    pub spm_infill: bool,
    /// Disable logging.
    #[serde(deserialize_with = "bool_from_sql")]
    pub log_disable: bool,
    /// Log file.
    pub log_file: Option<String>,
    /// Colored log mode.
    pub log_colors: Option<String>,
    /// Verbose logging.
    #[serde(deserialize_with = "bool_from_sql")]
    pub log_verbose: bool,
    /// Prefix log lines.
    #[serde(deserialize_with = "bool_from_sql")]
    pub log_prefix: bool,
    /// Timestamp log lines.
    #[serde(deserialize_with = "bool_from_sql")]
    pub log_timestamps: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_prefix: None,
            path: None,
            webui: None,
            webui_config_file: None,
            no_webui: false,
            embeddings: false,
            reranking: false,
            api_key: None,
            api_key_file: None,
            ssl_key_file: None,
            ssl_cert_file: None,
            timeout: 600,
            threads_http: None,
            cache_reuse: None,
            metrics_enabled: true,
            props_enabled: false,
            slots_enabled: false,
            slot_save_path: None,
            media_path: None,
            models_dir: None,
            models_preset: None,
            models_max: 4,
            models_autoload: false,
            jinja: false,
            chat_template: None,
            chat_template_file: None,
            chat_template_kwargs: None,
            prefill_assistant: false,
            ctx_checkpoints: 8,
            verbose_prompt: false,
            warmup: false,
            spm_infill: false,
            log_disable: false,
            log_file: None,
            log_colors: None,
            log_verbose: false,
            log_prefix: false,
            log_timestamps: false,
        }
    }
}

/// Key of the server-config singleton row.
const SERVER_CONFIG_ID: i64 = 1;

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Upserts the `T` row for `model_id`, keeping its first `created_at`.
///
/// # Errors
///
/// Returns [`StoreError::ConstraintViolation`] when the model does not exist
/// and [`StoreError::Invalid`] when the record does not match its table.
pub fn save_extension<T: ModelExtension>(
    connection: &Connection,
    model_id: i64,
    record: &T,
    now_ms: i64,
) -> StoreResult<()> {
    upsert_row(connection, T::TABLE, model_id, record, now_ms)
}

/// Returns the `T` row for `model_id`.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the query fails and
/// [`StoreError::Invalid`] when the stored row cannot be decoded.
pub fn get_extension<T: ModelExtension>(
    connection: &Connection,
    model_id: i64,
) -> StoreResult<Option<ExtensionRecord<T>>> {
    Ok(fetch_row(connection, T::TABLE, model_id)?.map(|row| ExtensionRecord {
        model_id: row.key,
        created_at: row.created_at,
        updated_at: row.updated_at,
        config: row.config,
    }))
}

/// Deletes the `T` row for `model_id`. Absent rows are a no-op.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the delete fails.
pub fn delete_extension<T: ModelExtension>(connection: &Connection, model_id: i64) -> StoreResult<()> {
    connection
        .execute(
            &format!("DELETE FROM {} WHERE model_id = ?1", T::TABLE.name),
            params![model_id],
        )
        .map_err(db_error)?;
    Ok(())
}

/// Returns model `id` with all of its extension rows.
///
/// # Errors
///
/// Returns [`StoreError::Db`] or [`StoreError::Invalid`] when any read fails.
pub fn complete_model_config(
    connection: &Connection,
    id: i64,
) -> StoreResult<Option<CompleteModelConfig>> {
    let Some(model) = models::get(connection, id)? else {
        return Ok(None);
    };
    Ok(Some(CompleteModelConfig {
        model,
        sampling: get_extension(connection, id)?,
        memory: get_extension(connection, id)?,
        gpu: get_extension(connection, id)?,
        advanced: get_extension(connection, id)?,
        lora: get_extension(connection, id)?,
        multimodal: get_extension(connection, id)?,
        fit_params: get_extension(connection, id)?,
    }))
}

/// Saves fit statistics and marks the model as analyzed in one transaction.
///
/// # Errors
///
/// Returns [`StoreError::ConstraintViolation`] when the model does not
/// exist; nothing is written in that case.
pub fn save_fit_params(
    connection: &mut Connection,
    model_id: i64,
    params: &FitParams,
    now_ms: i64,
) -> StoreResult<()> {
    let mut record = params.clone();
    record.fit_params_analyzed_at.get_or_insert(now_ms);
    let tx = connection.transaction().map_err(db_error)?;
    save_extension(&tx, model_id, &record, now_ms)?;
    models::mark_fit_checked(&tx, model_id, true, now_ms)?;
    tx.commit().map_err(db_error)
}

/// Returns true when the model file should be analyzed again.
///
/// Models never checked need analysis. A missing model file cannot be
/// analyzed. Otherwise the file must have changed since the last check.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the model lookup fails.
pub fn should_reanalyze_fit_params(
    connection: &Connection,
    model_id: i64,
    model_path: &Path,
) -> StoreResult<bool> {
    let last_check: Option<i64> = connection
        .query_row(
            "SELECT last_fit_params_check FROM models WHERE id = ?1",
            params![model_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error)?
        .flatten();
    let Some(last_check) = last_check.filter(|value| *value > 0) else {
        return Ok(true);
    };
    let Ok(meta) = std::fs::metadata(model_path) else {
        return Ok(false);
    };
    let modified_ms = meta
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .and_then(|age| i64::try_from(age.as_millis()).ok())
        .unwrap_or_default();
    Ok(modified_ms > last_check)
}

/// Upserts the global server configuration.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the write fails.
pub fn save_server_config(
    connection: &Connection,
    config: &ServerConfig,
    now_ms: i64,
) -> StoreResult<()> {
    upsert_row(connection, &MODEL_SERVER_CONFIG, SERVER_CONFIG_ID, config, now_ms)
}

/// Returns the global server configuration, if one was saved.
///
/// # Errors
///
/// Returns [`StoreError::Db`] or [`StoreError::Invalid`] when the read fails.
pub fn server_config(connection: &Connection) -> StoreResult<Option<ServerConfigRecord>> {
    Ok(fetch_row(connection, &MODEL_SERVER_CONFIG, SERVER_CONFIG_ID)?.map(|row| {
        ServerConfigRecord {
            created_at: row.created_at,
            updated_at: row.updated_at,
            config: row.config,
        }
    }))
}

// ============================================================================
// SECTION: Row Binding
// ============================================================================

/// A decoded keyed row.
struct KeyedRow<T> {
    /// Key column value.
    key: i64,
    /// First save time.
    created_at: i64,
    /// Last save time.
    updated_at: i64,
    /// Decoded payload.
    config: T,
}

/// Inserts or updates the row keyed by `key` from a serializable record.
fn upsert_row<T: Serialize>(
    connection: &Connection,
    table: &TableSpec,
    key: i64,
    record: &T,
    now_ms: i64,
) -> StoreResult<()> {
    let payload = record_values(table, record)?;
    let mut columns = vec![quote_ident(table.key)];
    let mut values = vec![Value::Integer(key)];
    let mut updates = Vec::with_capacity(payload.len() + 1);
    for (name, value) in payload {
        let quoted = quote_ident(name);
        updates.push(format!("{quoted} = excluded.{quoted}"));
        columns.push(quoted);
        values.push(value);
    }
    columns.push("created_at".to_string());
    columns.push("updated_at".to_string());
    values.push(Value::Integer(now_ms));
    values.push(Value::Integer(now_ms));
    updates.push("updated_at = excluded.updated_at".to_string());
    let placeholders = vec!["?"; values.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders}) ON CONFLICT({}) DO UPDATE SET {}",
        table.name,
        columns.join(", "),
        quote_ident(table.key),
        updates.join(", ")
    );
    connection.execute(&sql, params_from_iter(values)).map_err(db_error)?;
    Ok(())
}

/// Reads the row keyed by `key` and decodes its payload.
fn fetch_row<T: DeserializeOwned>(
    connection: &Connection,
    table: &TableSpec,
    key: i64,
) -> StoreResult<Option<KeyedRow<T>>> {
    let payload: Vec<&'static str> = table.payload_columns().map(|column| column.name).collect();
    let select = payload.iter().map(|name| quote_ident(name)).collect::<Vec<_>>().join(", ");
    let sql = format!(
        "SELECT created_at, updated_at, {select} FROM {} WHERE {} = ?1",
        table.name,
        quote_ident(table.key)
    );
    let raw = connection
        .query_row(&sql, params![key], |row| {
            let created_at: i64 = row.get(0)?;
            let updated_at: i64 = row.get(1)?;
            let mut map = Map::new();
            for (index, name) in payload.iter().enumerate() {
                map.insert((*name).to_string(), json_from_sql(row.get_ref(index + 2)?));
            }
            Ok((created_at, updated_at, map))
        })
        .optional()
        .map_err(db_error)?;
    let Some((created_at, updated_at, map)) = raw else {
        return Ok(None);
    };
    let config = serde_json::from_value(serde_json::Value::Object(map)).map_err(|err| {
        StoreError::Invalid(format!("{} row for key {key} is undecodable: {err}", table.name))
    })?;
    Ok(Some(KeyedRow {
        key,
        created_at,
        updated_at,
        config,
    }))
}

/// Maps a record's fields onto the table's payload columns.
fn record_values<T: Serialize>(
    table: &TableSpec,
    record: &T,
) -> StoreResult<Vec<(&'static str, Value)>> {
    let json = serde_json::to_value(record)
        .map_err(|err| StoreError::Invalid(format!("{} record: {err}", table.name)))?;
    let serde_json::Value::Object(fields) = json else {
        return Err(StoreError::Invalid(format!("{} record must be an object", table.name)));
    };
    table
        .payload_columns()
        .map(|column| {
            let value = fields.get(column.name).ok_or_else(|| {
                StoreError::Invalid(format!("{} record missing field {}", table.name, column.name))
            })?;
            Ok((column.name, sql_from_json(value)))
        })
        .collect()
}

/// Converts a JSON field into an SQL value.
fn sql_from_json(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(flag) => Value::Integer(i64::from(*flag)),
        serde_json::Value::Number(number) => number
            .as_i64()
            .map(Value::Integer)
            .or_else(|| number.as_f64().map(Value::Real))
            .unwrap_or(Value::Null),
        serde_json::Value::String(text) => Value::Text(text.clone()),
        nested => Value::Text(nested.to_string()),
    }
}

/// Converts an SQL cell into a JSON field.
fn json_from_sql(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => serde_json::Value::Null,
        ValueRef::Integer(number) => serde_json::Value::from(number),
        ValueRef::Real(number) => {
            Number::from_f64(number).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        ValueRef::Text(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Accepts JSON booleans and stored `0`/`1` integers.
fn bool_from_sql<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(flag) => Ok(flag),
        serde_json::Value::Number(number) => Ok(number.as_f64().is_some_and(|value| value != 0.0)),
        other => Err(D::Error::custom(format!("expected boolean, found {other}"))),
    }
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

    use super::AdvancedConfig;
    use super::FitParams;
    use super::GpuConfig;
    use super::LoraConfig;
    use super::MemoryConfig;
    use super::ModelExtension;
    use super::MultimodalConfig;
    use super::SamplingConfig;
    use super::ServerConfig;
    use super::record_values;
    use crate::schema::MODEL_SERVER_CONFIG;
    use crate::schema::TableSpec;

    fn assert_covers<T: ModelExtension>() {
        assert_covers_table(T::TABLE, &T::default());
    }

    fn assert_covers_table<T: serde::Serialize>(table: &TableSpec, record: &T) {
        let values = record_values(table, record).expect(table.name);
        assert_eq!(values.len(), table.payload_columns().count(), "{}", table.name);
        let json = serde_json::to_value(record).expect("json");
        let fields = json.as_object().expect("object").len();
        assert_eq!(fields, values.len(), "{} has fields without columns", table.name);
    }

    #[test]
    fn records_match_their_tables() {
        assert_covers::<SamplingConfig>();
        assert_covers::<MemoryConfig>();
        assert_covers::<GpuConfig>();
        assert_covers::<AdvancedConfig>();
        assert_covers::<LoraConfig>();
        assert_covers::<MultimodalConfig>();
        assert_covers::<FitParams>();
        assert_covers_table(&MODEL_SERVER_CONFIG, &ServerConfig::default());
    }

    #[test]
    fn booleans_decode_from_stored_integers() {
        let gpu: GpuConfig =
            serde_json::from_str(r#"{"repack": 1, "no_host": 0, "kv_offload": true}"#)
                .expect("decode");
        assert!(gpu.repack);
        assert!(!gpu.no_host);
        assert!(gpu.kv_offload);
        assert_eq!(gpu.gpu_layers, -1);
    }
}
