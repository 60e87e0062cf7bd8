// crates/llama-dashboard-store/src/models.rs
// ============================================================================
// Module: Model Store
// Description: Core model rows: create, read, filter, patch, and delete.
// Purpose: Own the `models` table; extension rows follow through the cascade.
// Dependencies: rusqlite, serde
// ============================================================================

//! ## Overview
//! A model row carries identity (`name`, `type`), lifecycle `status`, and a
//! handful of launch scalars. Detailed llama-server settings live in the
//! extension tables keyed by `model_id`; see [`crate::extensions`].
//!
//! `name` and `type` are fixed at creation. [`ModelPatch`] deliberately has
//! no field for either.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::error::db_error;

// ============================================================================
// SECTION: Model Kind
// ============================================================================

/// Model family. Unknown values round-trip through [`ModelKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelKind {
    /// Llama family (default).
    #[default]
    Llama,
    /// GPT family.
    Gpt,
    /// Mistral family.
    Mistral,
    /// User-defined model.
    Custom,
    /// Any other label.
    Other(String),
}

impl ModelKind {
    /// Returns the stored label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Llama => "llama",
            Self::Gpt => "gpt",
            Self::Mistral => "mistral",
            Self::Custom => "custom",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for ModelKind {
    fn from(label: String) -> Self {
        match label.as_str() {
            "llama" => Self::Llama,
            "gpt" => Self::Gpt,
            "mistral" => Self::Mistral,
            "custom" => Self::Custom,
            _ => Self::Other(label),
        }
    }
}

impl From<&str> for ModelKind {
    fn from(label: &str) -> Self {
        Self::from(label.to_string())
    }
}

impl From<ModelKind> for String {
    fn from(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Other(label) => label,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Model Status
// ============================================================================

/// Lifecycle status of a model server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    /// Serving requests.
    Running,
    /// Not loaded (default).
    #[default]
    Stopped,
    /// Loading weights.
    Loading,
    /// Failed to start or crashed.
    Error,
}

impl ModelStatus {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Loading => "loading",
            Self::Error => "error",
        }
    }
}

impl FromStr for ModelStatus {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "loading" => Ok(Self::Loading),
            "error" => Ok(Self::Error),
            other => Err(StoreError::Invalid(format!("unknown model status: {other}"))),
        }
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// A stored model row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Row identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Model family.
    #[serde(rename = "type")]
    pub kind: ModelKind,
    /// Lifecycle status.
    pub status: ModelStatus,
    /// Local weights path.
    pub model_path: Option<String>,
    /// Remote weights URL.
    pub model_url: Option<String>,
    /// Hugging Face repository.
    pub hf_repo: Option<String>,
    /// Hugging Face file within the repository.
    pub hf_file: Option<String>,
    /// Context size in tokens.
    pub ctx_size: Option<i64>,
    /// Logical batch size.
    pub batch_size: Option<i64>,
    /// Physical batch size.
    pub ubatch_size: Option<i64>,
    /// Generation threads.
    pub threads: Option<i64>,
    /// Layers offloaded to GPU.
    pub gpu_layers: Option<i64>,
    /// Default sampling temperature.
    pub temperature: Option<f64>,
    /// Default nucleus sampling threshold.
    pub top_p: Option<f64>,
    /// Default top-k cutoff.
    pub top_k: Option<i64>,
    /// Bind host for this model's server.
    pub host: Option<String>,
    /// Bind port for this model's server.
    pub port: Option<i64>,
    /// Weights file size in bytes.
    pub file_size_bytes: Option<i64>,
    /// Whether fit statistics have been computed.
    pub fit_params_available: bool,
    /// Last fit analysis time in unix epoch milliseconds.
    pub last_fit_params_check: Option<i64>,
    /// Creation time in unix epoch milliseconds.
    pub created_at: i64,
    /// Last update time in unix epoch milliseconds.
    pub updated_at: i64,
}

/// Input for [`create`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewModel {
    /// Display name; trimmed and required.
    pub name: String,
    /// Model family; `llama` when absent.
    #[serde(rename = "type")]
    pub kind: Option<ModelKind>,
    /// Initial status; `stopped` when absent.
    pub status: Option<ModelStatus>,
    /// Local weights path.
    pub model_path: Option<String>,
    /// Remote weights URL.
    pub model_url: Option<String>,
    /// Hugging Face repository.
    pub hf_repo: Option<String>,
    /// Hugging Face file within the repository.
    pub hf_file: Option<String>,
    /// Context size in tokens.
    pub ctx_size: Option<i64>,
    /// Logical batch size.
    pub batch_size: Option<i64>,
    /// Physical batch size.
    pub ubatch_size: Option<i64>,
    /// Generation threads.
    pub threads: Option<i64>,
    /// Layers offloaded to GPU.
    pub gpu_layers: Option<i64>,
    /// Default sampling temperature.
    pub temperature: Option<f64>,
    /// Default nucleus sampling threshold.
    pub top_p: Option<f64>,
    /// Default top-k cutoff.
    pub top_k: Option<i64>,
    /// Bind host.
    pub host: Option<String>,
    /// Bind port.
    pub port: Option<i64>,
    /// Weights file size in bytes.
    pub file_size_bytes: Option<i64>,
}

impl NewModel {
    /// Returns a new-model input with only a name set.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Partial update for a model row.
///
/// `status` is set when present. Nullable columns are tri-state: `None`
/// leaves the column untouched, `Some(None)` resets it to NULL, and
/// `Some(Some(value))` stores `value`. In JSON an absent key means untouched
/// and an explicit `null` means reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelPatch {
    /// New status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ModelStatus>,
    /// New local weights path.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub model_path: Option<Option<String>>,
    /// New remote weights URL.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub model_url: Option<Option<String>>,
    /// New Hugging Face repository.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub hf_repo: Option<Option<String>>,
    /// New Hugging Face file.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub hf_file: Option<Option<String>>,
    /// New context size.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub ctx_size: Option<Option<i64>>,
    /// New logical batch size.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<Option<i64>>,
    /// New physical batch size.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub ubatch_size: Option<Option<i64>>,
    /// New thread count.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub threads: Option<Option<i64>>,
    /// New GPU layer count.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub gpu_layers: Option<Option<i64>>,
    /// New temperature.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Option<f64>>,
    /// New nucleus threshold.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub top_p: Option<Option<f64>>,
    /// New top-k cutoff.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub top_k: Option<Option<i64>>,
    /// New bind host.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub host: Option<Option<String>>,
    /// New bind port.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub port: Option<Option<i64>>,
    /// New weights file size.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<Option<i64>>,
}

impl ModelPatch {
    /// Returns `(column, value)` pairs for every present field.
    #[must_use]
    pub fn assignments(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        if let Some(status) = self.status {
            out.push(("status", Value::Text(status.as_str().to_string())));
        }
        push_assignment(&mut out, "model_path", self.model_path.clone());
        push_assignment(&mut out, "model_url", self.model_url.clone());
        push_assignment(&mut out, "hf_repo", self.hf_repo.clone());
        push_assignment(&mut out, "hf_file", self.hf_file.clone());
        push_assignment(&mut out, "ctx_size", self.ctx_size);
        push_assignment(&mut out, "batch_size", self.batch_size);
        push_assignment(&mut out, "ubatch_size", self.ubatch_size);
        push_assignment(&mut out, "threads", self.threads);
        push_assignment(&mut out, "gpu_layers", self.gpu_layers);
        push_assignment(&mut out, "temperature", self.temperature);
        push_assignment(&mut out, "top_p", self.top_p);
        push_assignment(&mut out, "top_k", self.top_k);
        push_assignment(&mut out, "host", self.host.clone());
        push_assignment(&mut out, "port", self.port);
        push_assignment(&mut out, "file_size_bytes", self.file_size_bytes);
        out
    }

    /// Returns true when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }
}

/// Appends an assignment when the field is present; `Some(None)` binds NULL.
fn push_assignment<T: Into<Value>>(
    out: &mut Vec<(&'static str, Value)>,
    column: &'static str,
    value: Option<Option<T>>,
) {
    if let Some(value) = value {
        out.push((column, value.map_or(Value::Null, Into::into)));
    }
}

/// Marks a present JSON key as set, so an explicit `null` becomes `Some(None)`.
fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Conjunctive filter for [`list`]. Empty filters match every model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFilter {
    /// Exact status match.
    pub status: Option<ModelStatus>,
    /// Exact type match.
    #[serde(rename = "type")]
    pub kind: Option<ModelKind>,
    /// Case-sensitive substring of the name.
    pub name: Option<String>,
}

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Column list shared by every model read.
const SELECT_COLUMNS: &str = "id, name, type, status, model_path, model_url, hf_repo, hf_file, \
                              ctx_size, batch_size, ubatch_size, threads, gpu_layers, \
                              temperature, top_p, top_k, host, port, file_size_bytes, \
                              fit_params_available, last_fit_params_check, created_at, updated_at";

/// Inserts a model row and returns its id.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for a blank name and
/// [`StoreError::Db`] when the insert fails.
pub fn create(connection: &Connection, model: &NewModel, now_ms: i64) -> StoreResult<i64> {
    let name = model.name.trim();
    if name.is_empty() {
        return Err(StoreError::Invalid("model name must not be empty".to_string()));
    }
    let kind = model.kind.clone().unwrap_or_default();
    let status = model.status.unwrap_or_default();
    connection
        .execute(
            "INSERT INTO models (name, type, status, model_path, model_url, hf_repo, hf_file, \
             ctx_size, batch_size, ubatch_size, threads, gpu_layers, temperature, top_p, top_k, \
             host, port, file_size_bytes, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, \
             ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)",
            params![
                name,
                kind.as_str(),
                status.as_str(),
                model.model_path,
                model.model_url,
                model.hf_repo,
                model.hf_file,
                model.ctx_size,
                model.batch_size,
                model.ubatch_size,
                model.threads,
                model.gpu_layers,
                model.temperature,
                model.top_p,
                model.top_k,
                model.host,
                model.port,
                model.file_size_bytes,
                now_ms,
            ],
        )
        .map_err(db_error)?;
    Ok(connection.last_insert_rowid())
}

/// Returns the model with `id`.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the query fails and
/// [`StoreError::Invalid`] when the stored status is unrecognized.
pub fn get(connection: &Connection, id: i64) -> StoreResult<Option<Model>> {
    connection
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM models WHERE id = ?1"),
            params![id],
            RawModel::from_row,
        )
        .optional()
        .map_err(db_error)?
        .map(RawModel::into_model)
        .transpose()
}

/// Returns the lowest-id model whose name equals `name` exactly.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the query fails.
pub fn get_by_name(connection: &Connection, name: &str) -> StoreResult<Option<Model>> {
    connection
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM models WHERE name = ?1 ORDER BY id ASC LIMIT 1"),
            params![name],
            RawModel::from_row,
        )
        .optional()
        .map_err(db_error)?
        .map(RawModel::into_model)
        .transpose()
}

/// Returns models matching every predicate in `filter`, newest first.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the query fails.
pub fn list(connection: &Connection, filter: &ModelFilter) -> StoreResult<Vec<Model>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(kind) = &filter.kind {
        clauses.push("type = ?");
        values.push(Value::Text(kind.as_str().to_string()));
    }
    if let Some(name) = filter.name.as_deref().filter(|name| !name.is_empty()) {
        clauses.push("instr(name, ?) > 0");
        values.push(Value::Text(name.to_string()));
    }
    let where_clause =
        if clauses.is_empty() { String::new() } else { format!(" WHERE {}", clauses.join(" AND ")) };
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM models{where_clause} ORDER BY created_at DESC, id DESC"
    );
    let mut stmt = connection.prepare(&sql).map_err(db_error)?;
    let rows = stmt.query_map(params_from_iter(values), RawModel::from_row).map_err(db_error)?;
    let mut models = Vec::new();
    for row in rows {
        models.push(row.map_err(db_error)?.into_model()?);
    }
    Ok(models)
}

/// Applies `patch` to model `id`. Missing ids are a no-op.
///
/// `updated_at` always advances, even for an empty patch or a clock that
/// has not moved since the last write.
///
/// # Errors
///
/// Returns [`StoreError::ConstraintViolation`] for values the schema rejects
/// and [`StoreError::Db`] for other engine failures.
pub fn update(connection: &Connection, id: i64, patch: &ModelPatch, now_ms: i64) -> StoreResult<()> {
    let assignments = patch.assignments();
    let mut set_clauses: Vec<String> =
        assignments.iter().map(|(column, _)| format!("{column} = ?")).collect();
    set_clauses.push("updated_at = MAX(?, updated_at + 1)".to_string());
    let mut values: Vec<Value> = assignments.into_iter().map(|(_, value)| value).collect();
    values.push(Value::Integer(now_ms));
    values.push(Value::Integer(id));
    let sql = format!("UPDATE models SET {} WHERE id = ?", set_clauses.join(", "));
    connection.execute(&sql, params_from_iter(values)).map_err(db_error)?;
    Ok(())
}

/// Records the outcome of a fit analysis on the model row.
pub(crate) fn mark_fit_checked(
    connection: &Connection,
    id: i64,
    available: bool,
    now_ms: i64,
) -> StoreResult<()> {
    connection
        .execute(
            "UPDATE models SET fit_params_available = ?1, last_fit_params_check = ?2, updated_at \
             = MAX(?2, updated_at + 1) WHERE id = ?3",
            params![available, now_ms, id],
        )
        .map_err(db_error)?;
    Ok(())
}

/// Deletes model `id` and, through the cascade, its extension rows.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the delete fails.
pub fn delete(connection: &Connection, id: i64) -> StoreResult<()> {
    connection.execute("DELETE FROM models WHERE id = ?1", params![id]).map_err(db_error)?;
    Ok(())
}

/// Deletes every model and every extension row.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the delete fails.
pub fn delete_all(connection: &Connection) -> StoreResult<u64> {
    let deleted = connection.execute("DELETE FROM models", []).map_err(db_error)?;
    Ok(u64::try_from(deleted).unwrap_or_default())
}

/// Returns the number of models.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when the query fails.
pub fn count(connection: &Connection) -> StoreResult<u64> {
    let count: i64 = connection
        .query_row("SELECT COUNT(*) FROM models", [], |row| row.get(0))
        .map_err(db_error)?;
    Ok(u64::try_from(count).unwrap_or_default())
}

// ============================================================================
// SECTION: Row Decoding
// ============================================================================

/// Model row with the status still in stored form.
struct RawModel {
    /// Decoded fields; `status` is a placeholder until validated.
    model: Model,
    /// Stored status label.
    status: String,
}

impl RawModel {
    /// Reads one model row.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get(2)?;
        Ok(Self {
            status: row.get(3)?,
            model: Model {
                id: row.get(0)?,
                name: row.get(1)?,
                kind: ModelKind::from(kind),
                status: ModelStatus::default(),
                model_path: row.get(4)?,
                model_url: row.get(5)?,
                hf_repo: row.get(6)?,
                hf_file: row.get(7)?,
                ctx_size: row.get(8)?,
                batch_size: row.get(9)?,
                ubatch_size: row.get(10)?,
                threads: row.get(11)?,
                gpu_layers: row.get(12)?,
                temperature: row.get(13)?,
                top_p: row.get(14)?,
                top_k: row.get(15)?,
                host: row.get(16)?,
                port: row.get(17)?,
                file_size_bytes: row.get(18)?,
                fit_params_available: row.get(19)?,
                last_fit_params_check: row.get(20)?,
                created_at: row.get(21)?,
                updated_at: row.get(22)?,
            },
        })
    }

    /// Validates the stored status.
    fn into_model(self) -> StoreResult<Model> {
        let mut model = self.model;
        model.status = self.status.parse()?;
        Ok(model)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
