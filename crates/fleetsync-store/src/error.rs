//! Error types for fleetsync-store.

use std::path::PathBuf;

/// Result type for fleetsync-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fleetsync-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Sensor not found in database.
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    /// A sensor or record carried neither a LUID nor a MAC identifier.
    #[error("Sensor has neither a local nor a cloud identifier")]
    MissingIdentity,

    /// A stored enum value or identifier could not be parsed.
    #[error("Invalid stored value: {0}")]
    Parse(#[from] fleetsync_types::ParseError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
