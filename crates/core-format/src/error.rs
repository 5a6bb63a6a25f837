//! Error types for chunk format operations

use std::io;
use thiserror::Error;

/// Result type for chunk format operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding, writing, or parsing chunks
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Chunk file does not start with the expected magic bytes
    #[error("Bad chunk magic: expected {expected:?}, found {found:?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },

    /// Chunk format version is not supported by this reader
    #[error("Unsupported chunk format version: {found} (supported: {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    /// Chunk is shorter than its header claims
    #[error("Truncated chunk: need {expected} bytes, have {found}")]
    Truncated { expected: usize, found: usize },

    /// Offset table violates its invariants
    #[error("Corrupt offset table: {0}")]
    CorruptOffsets(String),

    /// Sample index out of range for this chunk
    #[error("Sample index {index} out of range for chunk with {count} samples")]
    SampleOutOfRange { index: usize, count: usize },

    /// Codec id is not registered
    #[error("Unknown codec id: {0}")]
    UnknownCodec(String),

    /// Attempt to register a codec under a reserved or duplicate id
    #[error("Codec id not registrable: {id} ({reason})")]
    CodecNotRegistrable { id: String, reason: String },

    /// A value could not be encoded by its codec
    #[error("Encode failed for codec '{codec}': {message}")]
    Encode { codec: String, message: String },

    /// A field blob could not be decoded by its codec
    #[error("Decode failed for codec '{codec}': {message}")]
    Decode { codec: String, message: String },

    /// Sample does not match the dataset schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Chunk budget is missing or contradictory
    #[error("Invalid chunk budget: {0}")]
    InvalidBudget(String),

    /// Chunk payload outgrew the 4 GiB offset-table limit
    #[error("Chunk payload limit exceeded: {0}")]
    PayloadOverflow(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Unknown compression id in a chunk header
    #[error("Unknown compression id: {0}")]
    UnknownCompression(u8),
}

impl Error {
    /// Create an encode error for a codec
    pub fn encode<S: Into<String>>(codec: &str, message: S) -> Self {
        Error::Encode {
            codec: codec.to_string(),
            message: message.into(),
        }
    }

    /// Create a decode error for a codec
    pub fn decode<S: Into<String>>(codec: &str, message: S) -> Self {
        Error::Decode {
            codec: codec.to_string(),
            message: message.into(),
        }
    }

    /// Create a corrupt-offset-table error
    pub fn corrupt_offsets<S: Into<String>>(detail: S) -> Self {
        Error::CorruptOffsets(detail.into())
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch<S: Into<String>>(detail: S) -> Self {
        Error::SchemaMismatch(detail.into())
    }

    /// True when this error indicates corrupt or unreadable data
    /// rather than a caller mistake.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::BadMagic { .. }
                | Error::UnsupportedVersion { .. }
                | Error::Truncated { .. }
                | Error::CorruptOffsets(_)
                | Error::Decode { .. }
                | Error::UnknownCompression(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_error() {
        let err = Error::encode("tensor", "shape/data length mismatch");
        assert!(matches!(err, Error::Encode { .. }));
        assert!(err.to_string().contains("tensor"));
    }

    #[test]
    fn test_corruption_classification() {
        assert!(Error::corrupt_offsets("not monotonic").is_corruption());
        assert!(Error::UnknownCompression(9).is_corruption());
        assert!(!Error::UnknownCodec("foo".to_string()).is_corruption());
        assert!(!Error::schema_mismatch("field order").is_corruption());
    }

    #[test]
    fn test_display_contains_detail() {
        let err = Error::Truncated {
            expected: 128,
            found: 16,
        };
        assert_eq!(err.to_string(), "Truncated chunk: need 128 bytes, have 16");
    }
}
