//! On-disk chunk layout: header constants and header parsing
//!
//! A chunk file is, in order: a fixed 28-byte header, an offset table of
//! `sample_count + 1` little-endian u32 entries, and the payload region.
//! All integers are little-endian.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ magic "LTDC"            4 bytes                  │
//! │ format version          2 bytes                  │
//! │ chunk id                8 bytes                  │
//! │ sample count n          4 bytes                  │
//! │ payload length p        8 bytes (on-disk bytes)  │
//! │ compression id          1 byte                   │
//! │ reserved flags          1 byte                   │
//! ├──────────────────────────────────────────────────┤
//! │ offset table            4 * (n + 1) bytes        │
//! ├──────────────────────────────────────────────────┤
//! │ payload                 p bytes                  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Offset-table entries are byte offsets into the *uncompressed* payload;
//! for uncompressed chunks the final entry equals `p` exactly.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Magic bytes identifying a chunk file
pub const CHUNK_MAGIC: [u8; 4] = *b"LTDC";

/// Current chunk format version
pub const FORMAT_VERSION: u16 = 1;

/// Fixed header size in bytes
pub const HEADER_LEN: usize = 28;

/// Payload compression applied to a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression
    None,
    /// Zstd with level (3 by default)
    Zstd { level: i32 },
    /// LZ4 (level 4)
    Lz4,
}

impl Compression {
    /// Wire id stored in the chunk header
    pub fn id(&self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Zstd { .. } => 1,
            Compression::Lz4 => 2,
        }
    }

    /// Parse a wire id from a chunk header
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zstd { level: 3 }),
            2 => Ok(Compression::Lz4),
            other => Err(Error::UnknownCompression(other)),
        }
    }

    /// Name recorded in the index (`None` for uncompressed datasets)
    pub fn index_name(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Zstd { .. } => Some("zstd"),
            Compression::Lz4 => Some("lz4"),
        }
    }

    /// True when the payload is stored verbatim, enabling byte-range
    /// single-sample reads
    pub fn is_none(&self) -> bool {
        matches!(self, Compression::None)
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Zstd { level } => write!(f, "zstd:{}", level),
            Compression::Lz4 => write!(f, "lz4"),
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    /// Parse `none | lz4 | zstd | zstd:<level>`
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd { level: 3 }),
            s if s.starts_with("zstd:") => {
                let level_str = s.strip_prefix("zstd:").unwrap();
                let level = level_str.parse::<i32>().map_err(|_| {
                    Error::Compression(format!("invalid zstd level: {}", level_str))
                })?;
                if !(1..=22).contains(&level) {
                    return Err(Error::Compression(format!(
                        "zstd level must be 1-22, got {}",
                        level
                    )));
                }
                Ok(Compression::Zstd { level })
            }
            other => Err(Error::Compression(format!(
                "unknown compression type: {}",
                other
            ))),
        }
    }
}

/// Parsed chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub version: u16,
    pub chunk_id: u64,
    pub sample_count: u32,
    /// On-disk payload byte count
    pub payload_len: u64,
    pub compression: u8,
    pub flags: u8,
}

impl ChunkHeader {
    /// Serialize into the fixed 28-byte wire form
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&CHUNK_MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.chunk_id.to_le_bytes());
        out.extend_from_slice(&self.sample_count.to_le_bytes());
        out.extend_from_slice(&self.payload_len.to_le_bytes());
        out.push(self.compression);
        out.push(self.flags);
    }

    /// Parse and validate a header from the first [`HEADER_LEN`] bytes
    /// of a chunk.
    ///
    /// # Errors
    ///
    /// `BadMagic` / `UnsupportedVersion` / `Truncated` on malformed input.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Truncated {
                expected: HEADER_LEN,
                found: bytes.len(),
            });
        }
        let magic: [u8; 4] = bytes[0..4].try_into().unwrap();
        if magic != CHUNK_MAGIC {
            return Err(Error::BadMagic {
                expected: CHUNK_MAGIC,
                found: magic,
            });
        }
        let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion {
                found: version,
                supported: FORMAT_VERSION,
            });
        }
        Ok(Self {
            version,
            chunk_id: u64::from_le_bytes(bytes[6..14].try_into().unwrap()),
            sample_count: u32::from_le_bytes(bytes[14..18].try_into().unwrap()),
            payload_len: u64::from_le_bytes(bytes[18..26].try_into().unwrap()),
            compression: bytes[26],
            flags: bytes[27],
        })
    }

    /// Byte length of this chunk's offset table
    pub fn offset_table_len(&self) -> usize {
        4 * (self.sample_count as usize + 1)
    }

    /// Total on-disk chunk size implied by the header
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.offset_table_len() + self.payload_len as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> ChunkHeader {
        ChunkHeader {
            version: FORMAT_VERSION,
            chunk_id: 42,
            sample_count: 3,
            payload_len: 100,
            compression: 0,
            flags: 0,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let h = header();
        let mut buf = Vec::new();
        h.write_to(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(ChunkHeader::parse(&buf).unwrap(), h);
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = Vec::new();
        header().write_to(&mut buf);
        buf[0] = b'X';
        assert!(matches!(
            ChunkHeader::parse(&buf),
            Err(Error::BadMagic { .. })
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut buf = Vec::new();
        header().write_to(&mut buf);
        buf[4] = 0xFF;
        buf[5] = 0xFF;
        assert!(matches!(
            ChunkHeader::parse(&buf),
            Err(Error::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            ChunkHeader::parse(&[0u8; 10]),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn test_total_len() {
        let h = header();
        assert_eq!(h.total_len(), 28 + 16 + 100);
    }

    #[test]
    fn test_compression_parse() {
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert_eq!("lz4".parse::<Compression>().unwrap(), Compression::Lz4);
        assert_eq!(
            "zstd".parse::<Compression>().unwrap(),
            Compression::Zstd { level: 3 }
        );
        assert_eq!(
            "zstd:9".parse::<Compression>().unwrap(),
            Compression::Zstd { level: 9 }
        );
        assert!("zstd:99".parse::<Compression>().is_err());
        assert!("gzip".parse::<Compression>().is_err());
    }

    #[test]
    fn test_compression_ids_stable() {
        assert_eq!(Compression::None.id(), 0);
        assert_eq!(Compression::Zstd { level: 3 }.id(), 1);
        assert_eq!(Compression::Lz4.id(), 2);
        assert!(Compression::from_id(3).is_err());
    }
}
