//! Error types for TierDB
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using TierError
pub type Result<T> = std::result::Result<T, TierError>;

/// Unified error type for TierDB operations
#[derive(Debug, Error)]
pub enum TierError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Catalog Errors
    // -------------------------------------------------------------------------
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Zero, or not past the table's last applied op
    #[error("Invalid op index: {0}")]
    InvalidOpIndex(String),

    // -------------------------------------------------------------------------
    // Buffer Pool Errors
    // -------------------------------------------------------------------------
    #[error("Out of capacity: {0}")]
    OutOfCapacity(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Post-commit catalog inconsistency or a checksum failure. Never retried.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TierError {
    /// Whether a failed flush attempt may be retried on the next flush cycle.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TierError::Corruption(_) | TierError::Cancelled(_) | TierError::InvalidOpIndex(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TierError::NotFound(_))
    }
}

impl From<bincode::Error> for TierError {
    fn from(e: bincode::Error) -> Self {
        TierError::Serialization(e.to_string())
    }
}
