//! Core error types for deremind-core.
//!
//! This module defines the error hierarchy using thiserror. Nothing in here
//! is allowed to bring the hosting process down: store and notification
//! failures are logged by the engine and the affected reminder stays pending
//! until the next recovery or reconciliation pass.

use std::path::PathBuf;
use thiserror::Error;

use crate::reminder::ReminderId;

/// Core error type for deremind-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Storage-related errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Notification delivery errors
    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    /// The reminder is not present in the in-memory view
    #[error("Reminder {0} not found")]
    NotFound(ReminderId),

    /// The engine worker has shut down and no longer accepts commands
    #[error("Reminder engine is stopped")]
    EngineStopped,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistence errors. All of them are transient from the engine's point of
/// view: a failed flush is retried per item, a failed load leaves the view
/// empty until the next start.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the database file
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked by another writer
    #[error("Database is locked")]
    Locked,

    /// The blocking task running the statement was cancelled or panicked
    #[error("Store task failed: {0}")]
    Join(String),
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Locked | StoreError::Join(_))
    }
}

/// A timer callback failed. Logged by the scheduler, never surfaced to callers.
#[derive(Error, Debug)]
pub enum SchedulingFault {
    #[error("timer callback for reminder {id} failed: {message}")]
    CallbackFailed { id: ReminderId, message: String },

    #[error("timer callback for reminder {id} panicked: {message}")]
    CallbackPanicked { id: ReminderId, message: String },
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

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Validation errors for reminder drafts and edits.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Title is empty or whitespace
    #[error("Reminder title must not be empty")]
    EmptyTitle,

    /// Repeating reminder without a usable interval
    #[error("Repeat interval must be positive for repeating reminders (got {millis} ms)")]
    NonPositiveInterval { millis: i64 },
}

/// Notification sink errors.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// The sink could not deliver the alert
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The receiving side of the sink is gone
    #[error("Notification channel closed")]
    Closed,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Join(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
