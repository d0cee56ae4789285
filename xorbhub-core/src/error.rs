//! Error types for XorbHub
//!
//! Provides a unified error type for all core operations.

use thiserror::Error;

/// Result type alias for XorbHub operations
pub type Result<T> = std::result::Result<T, XorbError>;

/// Unified error type for XorbHub
#[derive(Error, Debug)]
pub enum XorbError {
    // ===== Integrity Errors =====
    #[error("Integrity error: content digest {actual} does not match claimed {expected}")]
    Integrity { expected: String, actual: String },

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    // ===== Lookup Errors =====
    #[error("Not found: {0}")]
    NotFound(String),

    // ===== Storage Errors =====
    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Partial batch: block {block} unreadable: {reason}")]
    PartialBatch { block: String, reason: String },

    // ===== Format Errors =====
    #[error("Serialization invariant violated: {0}")]
    SerializationInvariant(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl XorbError {
    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            XorbError::TransientStore(_) | XorbError::PartialBatch { .. } | XorbError::Io(_)
        )
    }
}

impl From<serde_json::Error> for XorbError {
    fn from(err: serde_json::Error) -> Self {
        XorbError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = XorbError::Integrity {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(
            err.to_string(),
            "Integrity error: content digest bb does not match claimed aa"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: XorbError = io_err.into();
        assert!(matches!(err, XorbError::Io(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_integrity_is_not_transient() {
        let err = XorbError::Integrity {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(!err.is_transient());
        assert!(!XorbError::SerializationInvariant("size".into()).is_transient());
    }
}
