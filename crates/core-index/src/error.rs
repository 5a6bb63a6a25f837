//! Error types for index operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for index operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, merging, or loading indices
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Index validation failed
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Index format version mismatch
    #[error("Index version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// Index file not found
    #[error("Index not found: {path}")]
    IndexNotFound { path: PathBuf },

    /// Sample id outside the dataset range
    #[error("Sample id {sample_id} out of range (total {total})")]
    SampleOutOfRange { sample_id: u64, total: u64 },

    /// Partial indices disagree on dataset-level metadata
    #[error("Partial index mismatch: {0}")]
    PartialMismatch(String),
}

impl Error {
    /// Create a validation error with a message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    /// Create an index-not-found error
    pub fn index_not_found<P: Into<PathBuf>>(path: P) -> Self {
        Error::IndexNotFound { path: path.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = Error::validation("chunk ids not contiguous");
        assert_eq!(err.to_string(), "Validation error: chunk ids not contiguous");
    }

    #[test]
    fn test_out_of_range_display() {
        let err = Error::SampleOutOfRange {
            sample_id: 12,
            total: 10,
        };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("10"));
    }
}
