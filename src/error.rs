//! Crate-wide error type.
//!
//! Every fallible operation returns [`Result`]. [`Error::is_transient`] is the
//! single classifier used by the store retry wrapper.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::ffi;
use rusqlite::ErrorCode;

use crate::core::context::Context;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to acquire {kind} session within {timeout:?}")]
    PoolTimeout { kind: &'static str, timeout: Duration },

    #[error("store for {0} context is unavailable")]
    StoreUnavailable(Context),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid sequence pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{tool} failed: {message}")]
    Tool { tool: &'static str, message: String },

    #[error("{tool} timed out after {timeout:?}")]
    ToolTimeout { tool: &'static str, timeout: Duration },

    #[error("invalid value: {0}")]
    Validation(String),

    #[error("worker pool: {0}")]
    Worker(String),
}

/// Message fragments of failures SQLite reports without a specific code.
const TRANSIENT_MESSAGES: &[&str] = &[
    "database is locked",
    "database table is locked",
    "cannot commit transaction - sql statements in progress",
    "cursor needed to be reset",
    "cannot start a transaction within a transaction",
    "cannot rollback - no transaction is active",
    "error binding parameter",
    "probably unsupported type",
    "did not produce a new primary key",
];

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    /// Whether the failure is store contention worth retrying.
    ///
    /// Typed SQLite codes decide first: busy/locked, schema-change races,
    /// and foreign-key or uniqueness violations from concurrent
    /// create-if-absent writers. Untyped failures fall back to message
    /// matching.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        let Error::Db(err) = self else {
            return false;
        };
        match err {
            rusqlite::Error::SqliteFailure(failure, message) => {
                match failure.code {
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::SchemaChanged => {
                        return true;
                    }
                    ErrorCode::ConstraintViolation => {
                        return matches!(
                            failure.extended_code,
                            ffi::SQLITE_CONSTRAINT_FOREIGNKEY
                                | ffi::SQLITE_CONSTRAINT_UNIQUE
                                | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                        );
                    }
                    _ => {}
                }
                let text = message.clone().unwrap_or_else(|| failure.to_string());
                message_is_transient(&text)
            }
            rusqlite::Error::ToSqlConversionFailure(_) => true,
            other => message_is_transient(&other.to_string()),
        }
    }
}

fn message_is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MESSAGES.iter().any(|m| lower.contains(m))
}
