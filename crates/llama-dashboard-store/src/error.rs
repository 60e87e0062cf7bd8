// crates/llama-dashboard-store/src/error.rs
// ============================================================================
// Module: Store Errors
// Description: Typed error taxonomy for the dashboard store.
// Purpose: Separate constraint failures from generic engine failures.
// Dependencies: rusqlite, thiserror
// ============================================================================

//! ## Overview
//! All store operations return [`StoreError`]. Engine errors are classified
//! once, in [`db_error`], so constraint failures (foreign keys, CHECK, NOT
//! NULL) surface as [`StoreError::ConstraintViolation`] and everything else
//! from the engine (including busy/locked timeouts) as [`StoreError::Db`].
//! Missing rows are never errors; read paths return `Option`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Dashboard store errors.
///
/// # Invariants
/// - Error messages never embed stored values (API keys, tokens).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Filesystem error (open/create, directory creation, stat).
    #[error("dashboard store io error: {0}")]
    Io(String),
    /// `SQLite` engine error, including busy and locked timeouts.
    #[error("dashboard store db error: {0}")]
    Db(String),
    /// Schema constraint failure (foreign key, CHECK, NOT NULL, UNIQUE).
    #[error("dashboard store constraint violation: {0}")]
    ConstraintViolation(String),
    /// Import source does not exist.
    #[error("dashboard store backup missing: {}", .0.display())]
    BackupMissing(PathBuf),
    /// Invalid input or undecodable stored data.
    #[error("dashboard store invalid data: {0}")]
    Invalid(String),
    /// Unsupported schema version in the live store or a backup.
    #[error("dashboard store version mismatch: {0}")]
    VersionMismatch(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Maps a `rusqlite` error into the store taxonomy.
#[must_use]
pub fn db_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::ConstraintViolation(err.to_string())
        }
        _ => StoreError::Db(err.to_string()),
    }
}

/// Maps a filesystem error into the store taxonomy.
#[must_use]
pub fn io_error(err: &std::io::Error) -> StoreError {
    StoreError::Io(err.to_string())
}

impl StoreError {
    /// Returns true when the engine reported lock contention.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Db(message) => {
                let lower = message.to_ascii_lowercase();
                lower.contains("busy") || lower.contains("locked")
            }
            _ => false,
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
