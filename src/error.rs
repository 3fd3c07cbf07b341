//! Error types for AtlasObj
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using AtlasError
pub type Result<T> = std::result::Result<T, AtlasError>;

/// Unified error type for AtlasObj operations
#[derive(Debug, Error)]
pub enum AtlasError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lifecycle / Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Storage is not opened")]
    NotOpened,

    #[error("Storage is already opened")]
    AlreadyOpened,

    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // On-disk State Errors
    // -------------------------------------------------------------------------
    /// Header or generation metadata is inconsistent
    #[error("Database corrupted: {0}")]
    Corruption(String),

    /// The file cannot grow any further within the addressable range
    #[error("Not enough space: {0}")]
    Capacity(String),

    /// A handle refers to a free slot or to an object of the wrong kind
    #[error("Invalid object handle: {0}")]
    Consistency(String),

    // -------------------------------------------------------------------------
    // Catalog / Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for AtlasError {
    fn from(err: bincode::Error) -> Self {
        AtlasError::Serialization(err.to_string())
    }
}
