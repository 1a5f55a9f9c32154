//! Core error types for pomociclo-core.
//!
//! Every fallible entry point in the library returns one of these enums.
//! Precondition violations raised by the study cycle live in
//! [`CycleError`]; they abort the operation without touching any state.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for pomociclo-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Durable store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Backend session API errors
    #[error("Session API error: {0}")]
    Api(#[from] ApiError),

    /// Study cycle precondition violations
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by a [`KeyValueStore`](crate::storage::KeyValueStore).
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// The connection mutex was poisoned by a panicking writer
    #[error("Store connection poisoned")]
    Poisoned,

    /// Data directory could not be resolved or created
    #[error("Failed to access data directory: {0}")]
    DataDir(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dot-path key
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Errors returned by the backend session API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport-level failure (connection refused, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("server error: {status} - {message}")]
    Status { status: u16, message: String },

    /// Base URL or endpoint could not be parsed
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// No backend configured
    #[error("backend API is not configured")]
    NotConfigured,
}

/// Precondition violations of study cycle operations.
///
/// None of these mutate state; the caller reports them to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    #[error("select a subject to study")]
    NoSubjectSelected,

    #[error("subject '{name}' already reached its goal; go back a block or reset it to start over")]
    SubjectComplete { name: String },

    #[error("cannot go back into a block of another subject ({block_subject})")]
    CrossSubjectUndo { block_subject: String },

    #[error("unknown subject: {0}")]
    UnknownSubject(String),

    #[error("subject already exists: {0}")]
    DuplicateSubject(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) if e.code == rusqlite::ErrorCode::DatabaseLocked => {
                StorageError::Locked
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
