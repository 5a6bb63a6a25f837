//! Chunk writer: accumulates serialized samples and publishes chunk files
//!
//! Chunks are written to a temp path, fsynced, and renamed into place, so
//! a chunk file is never observed half-written. Ids are monotonic per
//! writer; global ids are reconciled later by the index merge.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::chunk::{ChunkHeader, Compression, FORMAT_VERSION};
use crate::codec::CodecRegistry;
use crate::compress;
use crate::error::{Error, Result};
use crate::schema::{encode_sample, Sample, Schema};

/// Chunk roll-over budget: payload bytes, sample count, or both.
///
/// At least one bound must be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBudget {
    /// Maximum uncompressed payload bytes per chunk
    pub max_bytes: Option<u64>,
    /// Maximum samples per chunk
    pub max_samples: Option<u32>,
}

impl ChunkBudget {
    /// Budget bounded by payload bytes
    pub fn bytes(max_bytes: u64) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            max_samples: None,
        }
    }

    /// Budget bounded by sample count
    pub fn samples(max_samples: u32) -> Self {
        Self {
            max_bytes: None,
            max_samples: Some(max_samples),
        }
    }

    /// Validate that at least one bound is configured and none is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes.is_none() && self.max_samples.is_none() {
            return Err(Error::InvalidBudget(
                "chunk budget requires chunk_bytes or chunk_size".to_string(),
            ));
        }
        if self.max_bytes == Some(0) || self.max_samples == Some(0) {
            return Err(Error::InvalidBudget(
                "chunk budget must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    fn would_exceed(&self, payload_len: u64, sample_count: u32, next_blob_len: u64) -> bool {
        if sample_count == 0 {
            // A single oversized sample still gets its own chunk.
            return false;
        }
        if let Some(max) = self.max_bytes {
            if payload_len + next_blob_len > max {
                return true;
            }
        }
        if let Some(max) = self.max_samples {
            if sample_count + 1 > max {
                return true;
            }
        }
        false
    }
}

/// Descriptor for a chunk this writer has published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedChunk {
    /// Writer-local chunk id (reconciled globally at index merge)
    pub local_id: u64,
    pub filename: String,
    pub path: PathBuf,
    /// Total on-disk file size
    pub byte_size: u64,
    pub sample_count: u32,
    /// Flat item count (total tokens) when the schema is a single
    /// `tokens` field; drives the token-block item loader
    pub dim: Option<u64>,
}

/// Streaming writer producing chunk files under one directory
pub struct ChunkWriter {
    dir: PathBuf,
    registry: CodecRegistry,
    schema: Option<Schema>,
    budget: ChunkBudget,
    compression: Compression,
    /// Worker rank embedded in filenames to keep pre-merge names unique
    worker: u32,
    next_local_id: u64,
    payload: Vec<u8>,
    offsets: Vec<u32>,
    sample_count: u32,
    token_count: u64,
}

impl ChunkWriter {
    /// Create a writer for `dir` (created if missing).
    ///
    /// The schema may be given explicitly; otherwise it is inferred from
    /// the first sample and enforced afterwards.
    pub fn new(
        dir: &Path,
        budget: ChunkBudget,
        compression: Compression,
        registry: CodecRegistry,
    ) -> Result<Self> {
        budget.validate()?;
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            registry,
            schema: None,
            budget,
            compression,
            worker: 0,
            next_local_id: 0,
            payload: Vec::new(),
            offsets: vec![0],
            sample_count: 0,
            token_count: 0,
        })
    }

    /// Set the worker rank used in chunk filenames
    pub fn with_worker(mut self, worker: u32) -> Self {
        self.worker = worker;
        self
    }

    /// Fix the schema explicitly instead of inferring it
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// The schema, once known
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Append a sample.
    ///
    /// Returns the descriptor of a chunk that was closed to make room,
    /// if the budget forced a roll-over.
    pub fn add(&mut self, sample: &Sample) -> Result<Option<ClosedChunk>> {
        if self.schema.is_none() {
            self.schema = Some(Schema::infer(sample, &self.registry)?);
        }
        let (blob, single_tokens) = {
            let schema = self.schema.as_ref().unwrap();
            let mut blob = Vec::new();
            encode_sample(schema, &self.registry, sample, &mut blob)?;
            (blob, schema.is_single_tokens())
        };

        let closed = if self
            .budget
            .would_exceed(self.payload.len() as u64, self.sample_count, blob.len() as u64)
        {
            Some(self.close_current()?)
        } else {
            None
        };

        if self.payload.len() + blob.len() > u32::MAX as usize {
            return Err(Error::PayloadOverflow(format!(
                "{} payload bytes plus a {} byte sample",
                self.payload.len(),
                blob.len()
            )));
        }

        if single_tokens {
            if let Some(tokens) = sample.value_at(0).and_then(|v| v.as_tokens()) {
                self.token_count += tokens.len() as u64;
            }
        }

        self.payload.extend_from_slice(&blob);
        self.offsets.push(self.payload.len() as u32);
        self.sample_count += 1;
        Ok(closed)
    }

    /// Flush the current partial chunk, if any, and return its descriptor
    pub fn finish(&mut self) -> Result<Option<ClosedChunk>> {
        if self.sample_count == 0 {
            return Ok(None);
        }
        Ok(Some(self.close_current()?))
    }

    fn close_current(&mut self) -> Result<ClosedChunk> {
        let local_id = self.next_local_id;
        let filename = format!("chunk-{}-{:010}.bin", self.worker, local_id);
        let final_path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!("{}.tmp", filename));

        let packed = compress::compress(&self.payload, &self.compression)?;
        let payload_bytes: &[u8] = packed.as_deref().unwrap_or(&self.payload);

        let header = ChunkHeader {
            version: FORMAT_VERSION,
            chunk_id: local_id,
            sample_count: self.sample_count,
            payload_len: payload_bytes.len() as u64,
            compression: self.compression.id(),
            flags: 0,
        };

        let mut buf = Vec::with_capacity(
            crate::chunk::HEADER_LEN + self.offsets.len() * 4 + payload_bytes.len(),
        );
        header.write_to(&mut buf);
        for offset in &self.offsets {
            buf.extend_from_slice(&offset.to_le_bytes());
        }
        buf.extend_from_slice(payload_bytes);

        // Atomic publish: tmp + fsync + rename. A failure leaves no
        // partial chunk behind.
        let write_result = (|| -> Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&buf)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &final_path)?;
            Ok(())
        })();
        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        debug!(
            chunk = %filename,
            samples = self.sample_count,
            bytes = buf.len(),
            "closed chunk"
        );

        let closed = ClosedChunk {
            local_id,
            filename,
            path: final_path,
            byte_size: buf.len() as u64,
            sample_count: self.sample_count,
            dim: if self.token_count > 0 {
                Some(self.token_count)
            } else {
                None
            },
        };

        self.next_local_id += 1;
        self.payload.clear();
        self.offsets.clear();
        self.offsets.push(0);
        self.sample_count = 0;
        self.token_count = 0;
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Tokens, Value};
    use tempfile::tempdir;

    fn int_sample(i: i64) -> Sample {
        Sample::new().with("x", Value::Int(i))
    }

    #[test]
    fn test_budget_requires_a_bound() {
        assert!(ChunkBudget {
            max_bytes: None,
            max_samples: None
        }
        .validate()
        .is_err());
        assert!(ChunkBudget::bytes(0).validate().is_err());
        assert!(ChunkBudget::bytes(1024).validate().is_ok());
    }

    #[test]
    fn test_single_chunk_small_dataset() {
        let dir = tempdir().unwrap();
        let mut writer = ChunkWriter::new(
            dir.path(),
            ChunkBudget::bytes(1024 * 1024),
            Compression::None,
            CodecRegistry::builtin(),
        )
        .unwrap();

        for i in 0..10 {
            assert!(writer.add(&int_sample(i)).unwrap().is_none());
        }
        let closed = writer.finish().unwrap().unwrap();
        assert_eq!(closed.local_id, 0);
        assert_eq!(closed.sample_count, 10);
        assert_eq!(closed.filename, "chunk-0-0000000000.bin");
        assert!(closed.path.exists());
        // 28-byte header + 11 offsets + 10 * 8-byte ints
        assert_eq!(closed.byte_size, 28 + 44 + 80);
    }

    #[test]
    fn test_rollover_on_sample_budget() {
        let dir = tempdir().unwrap();
        let mut writer = ChunkWriter::new(
            dir.path(),
            ChunkBudget::samples(4),
            Compression::None,
            CodecRegistry::builtin(),
        )
        .unwrap();

        let mut closed = Vec::new();
        for i in 0..10 {
            if let Some(c) = writer.add(&int_sample(i)).unwrap() {
                closed.push(c);
            }
        }
        closed.extend(writer.finish().unwrap());

        assert_eq!(closed.len(), 3);
        assert_eq!(closed[0].sample_count, 4);
        assert_eq!(closed[1].sample_count, 4);
        assert_eq!(closed[2].sample_count, 2);
        assert_eq!(
            closed.iter().map(|c| c.local_id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_rollover_on_byte_budget() {
        let dir = tempdir().unwrap();
        // Each sample blob: u32 prefix + 1024 bytes.
        let mut writer = ChunkWriter::new(
            dir.path(),
            ChunkBudget::bytes(4 * 1100),
            Compression::None,
            CodecRegistry::builtin(),
        )
        .unwrap();

        let mut chunks = 0;
        for _ in 0..9 {
            if writer
                .add(&Sample::new().with("b", Value::Bytes(vec![0u8; 1024])))
                .unwrap()
                .is_some()
            {
                chunks += 1;
            }
        }
        if writer.finish().unwrap().is_some() {
            chunks += 1;
        }
        assert_eq!(chunks, 3);
    }

    #[test]
    fn test_oversized_sample_gets_own_chunk() {
        let dir = tempdir().unwrap();
        let mut writer = ChunkWriter::new(
            dir.path(),
            ChunkBudget::bytes(16),
            Compression::None,
            CodecRegistry::builtin(),
        )
        .unwrap();

        writer
            .add(&Sample::new().with("b", Value::Bytes(vec![1u8; 64])))
            .unwrap();
        let closed = writer.finish().unwrap().unwrap();
        assert_eq!(closed.sample_count, 1);
    }

    #[test]
    fn test_schema_enforced_across_samples() {
        let dir = tempdir().unwrap();
        let mut writer = ChunkWriter::new(
            dir.path(),
            ChunkBudget::samples(100),
            Compression::None,
            CodecRegistry::builtin(),
        )
        .unwrap();

        writer.add(&int_sample(0)).unwrap();
        let other = Sample::new().with("y", Value::Int(1));
        assert!(writer.add(&other).is_err());
    }

    #[test]
    fn test_empty_writer_flushes_nothing() {
        let dir = tempdir().unwrap();
        let mut writer = ChunkWriter::new(
            dir.path(),
            ChunkBudget::samples(4),
            Compression::None,
            CodecRegistry::builtin(),
        )
        .unwrap();
        assert!(writer.finish().unwrap().is_none());
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_no_tmp_files_left_behind() {
        let dir = tempdir().unwrap();
        let mut writer = ChunkWriter::new(
            dir.path(),
            ChunkBudget::samples(2),
            Compression::Zstd { level: 3 },
            CodecRegistry::builtin(),
        )
        .unwrap();
        for i in 0..5 {
            writer.add(&int_sample(i)).unwrap();
        }
        writer.finish().unwrap();

        for entry in fs::read_dir(dir.path()).unwrap() {
            let name = entry.unwrap().file_name();
            assert!(
                !name.to_string_lossy().ends_with(".tmp"),
                "leftover temp file: {:?}",
                name
            );
        }
    }

    #[test]
    fn test_token_dim_recorded() {
        let dir = tempdir().unwrap();
        let mut writer = ChunkWriter::new(
            dir.path(),
            ChunkBudget::samples(10),
            Compression::None,
            CodecRegistry::builtin(),
        )
        .unwrap();

        for _ in 0..3 {
            writer
                .add(&Sample::new().with("tokens", Value::Tokens(Tokens::U16(vec![1, 2, 3, 4]))))
                .unwrap();
        }
        let closed = writer.finish().unwrap().unwrap();
        assert_eq!(closed.dim, Some(12));
    }
}
