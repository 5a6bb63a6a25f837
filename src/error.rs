/*!
 * Error types for Strata
 */

use std::fmt;
use std::io;

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, StrataError>;

#[derive(Debug)]
pub enum StrataError {
    /// Invalid options, missing fields, or contradictory budgets
    Config(String),

    /// Corrupt or unreadable chunk data
    Format {
        chunk: Option<String>,
        source: strata_core_format::Error,
    },

    /// Index build, merge, or load failure
    Index(strata_core_index::Error),

    /// I/O error
    Io(io::Error),

    /// Object store operation failed
    Store(StoreError),

    /// Cache cannot admit a chunk because the pinned working set exceeds
    /// the configured limit
    CacheFull {
        needed: u64,
        limit: u64,
        pinned: Vec<String>,
    },

    /// Worker world parameters inconsistent with the recorded dataset
    Assignment(String),

    /// Input partitioning failed
    Partition(String),

    /// Failure inside the user-provided function in the writer path
    UserFn {
        item: usize,
        message: String,
        retries: u32,
    },

    /// Leader gave up waiting for partial indices
    MergeTimeout {
        waited_secs: u64,
        present: usize,
        expected: usize,
    },

    /// Resume state could not be loaded or applied
    Resume(String),

    /// Retries exhausted
    RetriesExhausted { attempts: u32 },

    /// Generic error with message
    Other(String),
}

impl StrataError {
    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        match self {
            StrataError::Config(_) => true,
            StrataError::Format { .. } => true,
            StrataError::Index(_) => true,
            StrataError::CacheFull { .. } => true,
            StrataError::Assignment(_) => true,
            StrataError::Partition(_) => true,
            StrataError::MergeTimeout { .. } => true,
            StrataError::RetriesExhausted { .. } => true,

            StrataError::Io(_) => false,
            StrataError::Store(e) => !e.is_retriable(),
            StrataError::UserFn { .. } => false,
            StrataError::Resume(_) => false,
            StrataError::Other(_) => false,
        }
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            StrataError::Io(io_err) => Self::is_io_transient(io_err),
            StrataError::Store(e) => e.is_retriable(),
            StrataError::UserFn { .. } => true,
            StrataError::Resume(_) => true,
            _ => false,
        }
    }

    /// Check if an I/O error is transient
    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
                | WriteZero
        )
    }

    /// Get error category for logging and instrumentation
    pub fn category(&self) -> ErrorCategory {
        match self {
            StrataError::Config(_) => ErrorCategory::Configuration,
            StrataError::Format { .. } => ErrorCategory::Format,
            StrataError::Index(_) => ErrorCategory::Index,
            StrataError::Io(_) => ErrorCategory::IoError,
            StrataError::Store(_) => ErrorCategory::Network,
            StrataError::CacheFull { .. } => ErrorCategory::Cache,
            StrataError::Assignment(_) => ErrorCategory::Assignment,
            StrataError::Partition(_) => ErrorCategory::Partition,
            StrataError::UserFn { .. } => ErrorCategory::UserFunction,
            StrataError::MergeTimeout { .. } => ErrorCategory::Merge,
            StrataError::Resume(_) => ErrorCategory::Resume,
            StrataError::RetriesExhausted { .. } => ErrorCategory::Retry,
            StrataError::Other(_) => ErrorCategory::Unknown,
        }
    }

    /// Process exit code for CLI drivers
    pub fn exit_code(&self) -> i32 {
        match self {
            StrataError::Config(_) => 2,
            StrataError::Assignment(_) | StrataError::Partition(_) => 3,
            StrataError::UserFn { .. } | StrataError::RetriesExhausted { .. } => 4,
            StrataError::Store(_) => 5,
            StrataError::MergeTimeout { .. } => 6,
            _ => 1,
        }
    }

    /// Create a format error tagged with the chunk it came from
    pub fn format_in_chunk<S: Into<String>>(chunk: S, source: strata_core_format::Error) -> Self {
        StrataError::Format {
            chunk: Some(chunk.into()),
            source,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration errors
    Configuration,
    /// Chunk format / corruption errors
    Format,
    /// Index errors
    Index,
    /// I/O operation errors
    IoError,
    /// Object store / network errors
    Network,
    /// Cache admission errors
    Cache,
    /// Sample assignment errors
    Assignment,
    /// Input partitioning errors
    Partition,
    /// User function errors
    UserFunction,
    /// Index merge coordination errors
    Merge,
    /// Resume/checkpoint errors
    Resume,
    /// Retry exhaustion
    Retry,
    /// Uncategorized errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Format => write!(f, "format"),
            ErrorCategory::Index => write!(f, "index"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Cache => write!(f, "cache"),
            ErrorCategory::Assignment => write!(f, "assignment"),
            ErrorCategory::Partition => write!(f, "partition"),
            ErrorCategory::UserFunction => write!(f, "user-fn"),
            ErrorCategory::Merge => write!(f, "merge"),
            ErrorCategory::Resume => write!(f, "resume"),
            ErrorCategory::Retry => write!(f, "retry"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for StrataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrataError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            StrataError::Format { chunk, source } => match chunk {
                Some(chunk) => write!(f, "Format error in {}: {}", chunk, source),
                None => write!(f, "Format error: {}", source),
            },
            StrataError::Index(err) => {
                write!(f, "Index error: {}", err)
            }
            StrataError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            StrataError::Store(err) => {
                write!(f, "Store error: {}", err)
            }
            StrataError::CacheFull {
                needed,
                limit,
                pinned,
            } => {
                write!(
                    f,
                    "Cache full: need {} bytes but pinned working set holds the {} byte limit (pinned: {})",
                    needed,
                    limit,
                    pinned.join(", ")
                )
            }
            StrataError::Assignment(msg) => {
                write!(f, "Assignment error: {}", msg)
            }
            StrataError::Partition(msg) => {
                write!(f, "Input partition error: {}", msg)
            }
            StrataError::UserFn {
                item,
                message,
                retries,
            } => {
                write!(
                    f,
                    "User function failed on item {} after {} retries: {}",
                    item, retries, message
                )
            }
            StrataError::MergeTimeout {
                waited_secs,
                present,
                expected,
            } => {
                write!(
                    f,
                    "Index merge timed out after {}s: {} of {} partial indices present",
                    waited_secs, present, expected
                )
            }
            StrataError::Resume(msg) => {
                write!(f, "Resume error: {}", msg)
            }
            StrataError::RetriesExhausted { attempts } => {
                write!(f, "All {} retry attempts exhausted", attempts)
            }
            StrataError::Other(msg) => {
                write!(f, "{}", msg)
            }
        }
    }
}

impl std::error::Error for StrataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StrataError::Io(err) => Some(err),
            StrataError::Store(err) => Some(err),
            StrataError::Format { source, .. } => Some(source),
            StrataError::Index(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StrataError {
    fn from(err: io::Error) -> Self {
        StrataError::Io(err)
    }
}

impl From<StoreError> for StrataError {
    fn from(err: StoreError) -> Self {
        StrataError::Store(err)
    }
}

impl From<strata_core_format::Error> for StrataError {
    fn from(err: strata_core_format::Error) -> Self {
        StrataError::Format {
            chunk: None,
            source: err,
        }
    }
}

impl From<strata_core_index::Error> for StrataError {
    fn from(err: strata_core_index::Error) -> Self {
        StrataError::Index(err)
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::Resume(format!("JSON error: {}", err))
    }
}
