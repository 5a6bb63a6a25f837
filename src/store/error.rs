//! Error types for the object store abstraction

use std::fmt;
use std::io;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Unified error type for object store operations
#[derive(Debug)]
pub enum StoreError {
    /// I/O error during a store operation
    Io(io::Error),

    /// Object not found
    NotFound { path: String, store: String },

    /// Byte-range request outside the object
    RangeUnsatisfiable {
        path: String,
        start: u64,
        end: u64,
        size: u64,
    },

    /// Operation timed out
    Timeout {
        operation: String,
        duration_secs: u64,
    },

    /// Network error during a remote operation
    Network { message: String },

    /// Invalid configuration for a store
    InvalidConfig { store: String, message: String },

    /// Operation not supported by this store
    Unsupported { store: String, operation: String },

    /// Generic store error with context
    Other { store: String, message: String },
}

impl StoreError {
    /// Check if this error is retriable (transient)
    pub fn is_retriable(&self) -> bool {
        match self {
            StoreError::Timeout { .. } => true,
            StoreError::Network { .. } => true,
            StoreError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),

            StoreError::NotFound { .. } => false,
            StoreError::RangeUnsatisfiable { .. } => false,
            StoreError::InvalidConfig { .. } => false,
            StoreError::Unsupported { .. } => false,
            StoreError::Other { .. } => false,
        }
    }

    /// Check if this error indicates the object was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Create a not-found error
    pub fn not_found<P: Into<String>, S: Into<String>>(path: P, store: S) -> Self {
        StoreError::NotFound {
            path: path.into(),
            store: store.into(),
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported<S: Into<String>, O: Into<String>>(store: S, operation: O) -> Self {
        StoreError::Unsupported {
            store: store.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "I/O error: {}", err),
            StoreError::NotFound { path, store } => {
                write!(f, "Object not found on {}: {}", store, path)
            }
            StoreError::RangeUnsatisfiable {
                path,
                start,
                end,
                size,
            } => {
                write!(
                    f,
                    "Range [{}, {}) unsatisfiable for {} ({} bytes)",
                    start, end, path, size
                )
            }
            StoreError::Timeout {
                operation,
                duration_secs,
            } => {
                write!(
                    f,
                    "Operation '{}' timed out after {} seconds",
                    operation, duration_secs
                )
            }
            StoreError::Network { message } => write!(f, "Network error: {}", message),
            StoreError::InvalidConfig { store, message } => {
                write!(f, "Invalid configuration for {}: {}", store, message)
            }
            StoreError::Unsupported { store, operation } => {
                write!(f, "Operation '{}' not supported by store {}", operation, store)
            }
            StoreError::Other { store, message } => {
                write!(f, "Store error on {}: {}", store, message)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound {
                path: String::new(),
                store: "unknown".to_string(),
            },
            _ => StoreError::Io(err),
        }
    }
}
