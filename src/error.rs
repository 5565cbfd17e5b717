//! Error types for patricia_db

use thiserror::Error;

/// Result type alias for patricia_db operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in patricia_db operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid user data: expected non-empty key and value")]
    InvalidUserData,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid database file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),

    /// The trie reached a state its restructuring rules cannot produce.
    /// The current operation is aborted and nothing above it is relinked.
    #[error("Structural invariant violated: {0}")]
    StructuralInvariant(String),
}

impl Error {
    /// Whether this error came from the node or value store backend
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Serialization(_)
                | Error::NotFound(_)
                | Error::Corruption(_)
                | Error::InvalidFile(_)
                | Error::VersionMismatch { .. }
        )
    }
}
