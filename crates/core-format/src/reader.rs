//! Chunk reader: parses chunk files and materializes samples
//!
//! Two access modes are supported. Full-chunk mode parses an entire chunk
//! once and serves any sample from it. Range mode computes the absolute
//! byte range of a single sample so a caller holding only the header and
//! offset table can fetch that sample with a byte-range `get`; it is
//! available for uncompressed chunks only.

use std::fs;
use std::ops::Range;
use std::path::Path;

use crate::chunk::{ChunkHeader, Compression, HEADER_LEN};
use crate::codec::CodecRegistry;
use crate::compress;
use crate::error::{Error, Result};
use crate::schema::{decode_sample, Sample, Schema};

/// A fully parsed chunk: validated header, offset table, and
/// decompressed payload.
#[derive(Debug, Clone)]
pub struct ParsedChunk {
    pub header: ChunkHeader,
    offsets: Vec<u32>,
    payload: Vec<u8>,
}

impl ParsedChunk {
    /// Parse a complete chunk from its raw on-disk bytes.
    ///
    /// # Errors
    ///
    /// `FormatError`-class errors on bad magic, unsupported version,
    /// truncation, or an offset table violating its invariants.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = ChunkHeader::parse(bytes)?;
        let table_len = header.offset_table_len();
        let expected = header.total_len();
        if bytes.len() < expected {
            return Err(Error::Truncated {
                expected,
                found: bytes.len(),
            });
        }

        let mut offsets = Vec::with_capacity(header.sample_count as usize + 1);
        for i in 0..=header.sample_count as usize {
            let off = HEADER_LEN + i * 4;
            offsets.push(u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()));
        }
        validate_offsets(&offsets)?;

        let compression = Compression::from_id(header.compression)?;
        let raw_payload = &bytes[HEADER_LEN + table_len..expected];
        let uncompressed_len = *offsets.last().unwrap() as usize;
        let payload = if compression.is_none() {
            if raw_payload.len() != uncompressed_len {
                return Err(Error::corrupt_offsets(format!(
                    "final offset {} does not equal payload length {}",
                    uncompressed_len,
                    raw_payload.len()
                )));
            }
            raw_payload.to_vec()
        } else {
            compress::decompress(raw_payload, &compression, Some(uncompressed_len))?
        };

        Ok(Self {
            header,
            offsets,
            payload,
        })
    }

    /// Parse a chunk file from disk
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::parse(&bytes)
    }

    /// Number of samples in this chunk
    pub fn sample_count(&self) -> usize {
        self.header.sample_count as usize
    }

    /// Raw serialized blob of sample `index`
    pub fn sample_blob(&self, index: usize) -> Result<&[u8]> {
        if index >= self.sample_count() {
            return Err(Error::SampleOutOfRange {
                index,
                count: self.sample_count(),
            });
        }
        let start = self.offsets[index] as usize;
        let end = self.offsets[index + 1] as usize;
        Ok(&self.payload[start..end])
    }

    /// Decode sample `index` against the dataset schema
    pub fn sample(&self, index: usize, schema: &Schema, registry: &CodecRegistry) -> Result<Sample> {
        decode_sample(schema, registry, self.sample_blob(index)?)
    }

    /// The decompressed payload region (used by the token-block loader)
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Offset table (entries relative to the uncompressed payload)
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }
}

/// Header plus offset table, parsed from a chunk file prefix.
///
/// Enough to compute byte ranges for single-sample fetches without
/// downloading the payload.
#[derive(Debug, Clone)]
pub struct ChunkPrefix {
    pub header: ChunkHeader,
    offsets: Vec<u32>,
}

impl ChunkPrefix {
    /// Bytes needed to parse the prefix of a chunk with `sample_count`
    /// samples
    pub fn prefix_len(sample_count: u32) -> usize {
        HEADER_LEN + 4 * (sample_count as usize + 1)
    }

    /// Parse the header and offset table from the first bytes of a chunk
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = ChunkHeader::parse(bytes)?;
        let need = Self::prefix_len(header.sample_count);
        if bytes.len() < need {
            return Err(Error::Truncated {
                expected: need,
                found: bytes.len(),
            });
        }
        let mut offsets = Vec::with_capacity(header.sample_count as usize + 1);
        for i in 0..=header.sample_count as usize {
            let off = HEADER_LEN + i * 4;
            offsets.push(u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()));
        }
        validate_offsets(&offsets)?;
        Ok(Self { header, offsets })
    }

    /// Absolute byte range of sample `index` within the chunk file.
    ///
    /// # Errors
    ///
    /// Fails for compressed chunks, where payload offsets do not map to
    /// file offsets.
    pub fn sample_file_range(&self, index: usize) -> Result<Range<u64>> {
        let compression = Compression::from_id(self.header.compression)?;
        if !compression.is_none() {
            return Err(Error::Compression(
                "byte-range sample access requires an uncompressed chunk".to_string(),
            ));
        }
        if index >= self.header.sample_count as usize {
            return Err(Error::SampleOutOfRange {
                index,
                count: self.header.sample_count as usize,
            });
        }
        let base = Self::prefix_len(self.header.sample_count) as u64;
        Ok(base + self.offsets[index] as u64..base + self.offsets[index + 1] as u64)
    }
}

fn validate_offsets(offsets: &[u32]) -> Result<()> {
    if offsets.first() != Some(&0) {
        return Err(Error::corrupt_offsets("first entry must be 0"));
    }
    for pair in offsets.windows(2) {
        if pair[1] < pair[0] {
            return Err(Error::corrupt_offsets(format!(
                "entries decrease: {} then {}",
                pair[0], pair[1]
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecRegistry, Value};
    use crate::writer::{ChunkBudget, ChunkWriter};
    use tempfile::tempdir;

    fn write_chunk(compression: Compression) -> (tempfile::TempDir, std::path::PathBuf, Schema) {
        let dir = tempdir().unwrap();
        let registry = CodecRegistry::builtin();
        let mut writer = ChunkWriter::new(
            dir.path(),
            ChunkBudget::samples(100),
            compression,
            registry.clone(),
        )
        .unwrap();
        for i in 0..10 {
            writer
                .add(
                    &Sample::new()
                        .with("x", Value::Int(i))
                        .with("label", Value::Str(format!("sample-{}", i))),
                )
                .unwrap();
        }
        let schema = writer.schema().unwrap().clone();
        let closed = writer.finish().unwrap().unwrap();
        let path = closed.path.clone();
        (dir, path, schema)
    }

    #[test]
    fn test_full_chunk_read() {
        let (_dir, path, schema) = write_chunk(Compression::None);
        let registry = CodecRegistry::builtin();
        let chunk = ParsedChunk::open(&path).unwrap();

        assert_eq!(chunk.sample_count(), 10);
        let sample = chunk.sample(7, &schema, &registry).unwrap();
        assert_eq!(sample.get("x").unwrap().as_int(), Some(7));
        assert_eq!(sample.get("label").unwrap().as_str(), Some("sample-7"));
    }

    #[test]
    fn test_offset_invariants_hold() {
        let (_dir, path, _schema) = write_chunk(Compression::None);
        let chunk = ParsedChunk::open(&path).unwrap();
        let offsets = chunk.offsets();
        assert_eq!(offsets[0], 0);
        assert!(offsets.windows(2).all(|p| p[0] <= p[1]));
        assert_eq!(*offsets.last().unwrap() as usize, chunk.payload().len());
    }

    #[test]
    fn test_compressed_chunk_read() {
        for compression in [Compression::Zstd { level: 3 }, Compression::Lz4] {
            let (_dir, path, schema) = write_chunk(compression);
            let registry = CodecRegistry::builtin();
            let chunk = ParsedChunk::open(&path).unwrap();
            let sample = chunk.sample(3, &schema, &registry).unwrap();
            assert_eq!(sample.get("x").unwrap().as_int(), Some(3));
        }
    }

    #[test]
    fn test_sample_out_of_range() {
        let (_dir, path, _schema) = write_chunk(Compression::None);
        let chunk = ParsedChunk::open(&path).unwrap();
        assert!(matches!(
            chunk.sample_blob(10),
            Err(Error::SampleOutOfRange { .. })
        ));
    }

    #[test]
    fn test_range_mode_matches_full_read() {
        let (_dir, path, schema) = write_chunk(Compression::None);
        let registry = CodecRegistry::builtin();
        let bytes = fs::read(&path).unwrap();

        let prefix = ChunkPrefix::parse(&bytes).unwrap();
        let range = prefix.sample_file_range(4).unwrap();
        let blob = &bytes[range.start as usize..range.end as usize];
        let via_range = decode_sample(&schema, &registry, blob).unwrap();

        let chunk = ParsedChunk::parse(&bytes).unwrap();
        let via_full = chunk.sample(4, &schema, &registry).unwrap();
        assert_eq!(via_range, via_full);
    }

    #[test]
    fn test_range_mode_rejected_for_compressed() {
        let (_dir, path, _schema) = write_chunk(Compression::Lz4);
        let bytes = fs::read(&path).unwrap();
        let prefix = ChunkPrefix::parse(&bytes).unwrap();
        assert!(prefix.sample_file_range(0).is_err());
    }

    #[test]
    fn test_corrupt_offset_table_detected() {
        let (_dir, path, _schema) = write_chunk(Compression::None);
        let mut bytes = fs::read(&path).unwrap();
        // Make entry 1 decrease below entry 0's successor.
        bytes[HEADER_LEN + 4] = 0xFF;
        bytes[HEADER_LEN + 5] = 0xFF;
        bytes[HEADER_LEN + 6] = 0xFF;
        bytes[HEADER_LEN + 7] = 0xFF;
        assert!(ParsedChunk::parse(&bytes).is_err());
    }

    #[test]
    fn test_truncated_file_detected() {
        let (_dir, path, _schema) = write_chunk(Compression::None);
        let bytes = fs::read(&path).unwrap();
        assert!(matches!(
            ParsedChunk::parse(&bytes[..bytes.len() - 8]),
            Err(Error::Truncated { .. })
        ));
    }
}
