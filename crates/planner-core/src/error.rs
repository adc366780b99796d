//! Error types for planner-core

use thiserror::Error;

/// Result type alias using planner-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in planner-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Collection name not in the registry
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Invalid input (malformed request shape)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stored value could not be decoded into its wire shape
    #[error("Codec error: {0}")]
    Codec(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error was caused by the caller rather than storage.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::UnknownCollection(_))
    }
}
