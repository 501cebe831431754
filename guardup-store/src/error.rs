//! Error types for guardup-store

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing peer records
#[derive(Debug, Error)]
pub enum Error {
    /// A record with this name already exists
    #[error("peer '{0}' already exists in the store")]
    DuplicateName(String),

    /// No record with this name exists
    #[error("peer '{0}' not found in the store")]
    NotFound(String),

    /// The record failed a basic sanity check before being written
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// I/O error while preparing the database file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying SQLite failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl Error {
    /// Check if this is a lookup miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Check if this is a uniqueness violation
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateName(_))
    }
}
