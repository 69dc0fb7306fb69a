//! Error types for layerkv
//!
//! Operation-level results for open/merge/iterate/seek. Point-read
//! outcomes (found, deleted, timeout...) are not errors and live in
//! [`crate::segment::LookupStatus`].

use thiserror::Error;

/// Result type alias using LayerError
pub type Result<T> = std::result::Result<T, LayerError>;

/// Unified error type for layerkv operations
#[derive(Debug, Error)]
pub enum LayerError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    // -------------------------------------------------------------------------
    // Iteration
    // -------------------------------------------------------------------------
    /// Iterator exhausted. Expected, never logged as an error.
    #[error("End of iteration")]
    Eof,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LayerError {
    /// True for the normal end-of-iteration condition
    pub fn is_eof(&self) -> bool {
        matches!(self, LayerError::Eof)
    }
}

impl From<bincode::Error> for LayerError {
    fn from(e: bincode::Error) -> Self {
        LayerError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for LayerError {
    fn from(e: serde_json::Error) -> Self {
        LayerError::Serialization(e.to_string())
    }
}
