//! Dataset index data structures and operations
//!
//! The index is the dataset-level manifest: the shared field schema, the
//! ordered chunk descriptor list, and the total sample count. It is
//! immutable after publication; `optimize` publishes a new index per
//! invocation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{Error, Result};

/// Current index format version
pub const INDEX_VERSION: u32 = 1;

/// Filename of the published dataset index
pub const INDEX_FILENAME: &str = "index.json";

/// Store prefix holding per-worker partial indices during `optimize`
pub const PARTIALS_PREFIX: &str = "_partials";

/// One schema field: name plus serializer id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaField {
    pub name: String,
    pub codec: String,
}

impl SchemaField {
    /// Create a schema field entry
    pub fn new<N: Into<String>, C: Into<String>>(name: N, codec: C) -> Self {
        Self {
            name: name.into(),
            codec: codec.into(),
        }
    }
}

/// Descriptor of one published chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Global chunk id (contiguous from 0 after merge)
    pub id: u64,

    /// Object name under the dataset prefix (authoritative; ids are not
    /// re-derivable from filenames)
    pub filename: String,

    /// Total on-disk chunk size in bytes
    pub bytes: u64,

    /// Number of samples in the chunk
    pub samples: u64,

    /// First global sample id in the chunk
    pub first: u64,

    /// Last global sample id in the chunk (inclusive)
    pub last: u64,

    /// Flat item count for the token-block loader (total tokens), when
    /// the schema is a single `tokens` field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dim: Option<u64>,
}

/// The dataset-level manifest (`index.json`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetIndex {
    /// Index format version
    pub version: u32,

    /// Payload compression applied to every chunk (`null` = none)
    pub compression: Option<String>,

    /// Ordered field schema shared by all chunks
    pub schema: Vec<SchemaField>,

    /// Chunk descriptors in global sample order
    pub chunks: Vec<ChunkDescriptor>,

    /// Total number of samples across all chunks
    pub total_samples: u64,

    /// Hash of the producing configuration (timestamps excluded)
    pub config_hash: String,
}

impl DatasetIndex {
    /// Create an empty index with dataset-level metadata
    pub fn new(
        compression: Option<String>,
        schema: Vec<SchemaField>,
        config_hash: String,
    ) -> Self {
        Self {
            version: INDEX_VERSION,
            compression,
            schema,
            chunks: Vec::new(),
            total_samples: 0,
            config_hash,
        }
    }

    /// Append a chunk of `samples` samples, assigning the next global id
    /// and sample range
    pub fn push_chunk(&mut self, filename: String, bytes: u64, samples: u64, dim: Option<u64>) {
        let first = self.total_samples;
        let last = first + samples.saturating_sub(1);
        self.chunks.push(ChunkDescriptor {
            id: self.chunks.len() as u64,
            filename,
            bytes,
            samples,
            first,
            last,
            dim,
        });
        self.total_samples += samples;
    }

    /// Number of chunks
    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Locate a global sample id: `(chunk position, intra-chunk index)`.
    ///
    /// # Errors
    ///
    /// `SampleOutOfRange` when `sample_id >= total_samples`.
    pub fn locate(&self, sample_id: u64) -> Result<(usize, usize)> {
        if sample_id >= self.total_samples {
            return Err(Error::SampleOutOfRange {
                sample_id,
                total: self.total_samples,
            });
        }
        let pos = self
            .chunks
            .partition_point(|c| c.last < sample_id);
        let chunk = &self.chunks[pos];
        Ok((pos, (sample_id - chunk.first) as usize))
    }

    /// Validate the index invariants.
    ///
    /// Chunk ids must be contiguous from 0, sample ranges must be
    /// contiguous and cover `[0, total_samples)`, and the schema must be
    /// non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.version != INDEX_VERSION {
            return Err(Error::VersionMismatch {
                expected: INDEX_VERSION,
                found: self.version,
            });
        }
        if self.schema.is_empty() {
            return Err(Error::validation("schema has no fields"));
        }
        let mut next_sample = 0u64;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.id != i as u64 {
                return Err(Error::validation(format!(
                    "chunk ids not contiguous: expected {}, found {}",
                    i, chunk.id
                )));
            }
            if chunk.samples == 0 {
                return Err(Error::validation(format!("chunk {} has zero samples", i)));
            }
            if chunk.first != next_sample {
                return Err(Error::validation(format!(
                    "chunk {} starts at sample {}, expected {}",
                    i, chunk.first, next_sample
                )));
            }
            if chunk.last != chunk.first + chunk.samples - 1 {
                return Err(Error::validation(format!(
                    "chunk {} sample range [{}..{}] does not match count {}",
                    i, chunk.first, chunk.last, chunk.samples
                )));
            }
            if chunk.filename.is_empty() {
                return Err(Error::validation(format!("chunk {} missing filename", i)));
            }
            next_sample = chunk.last + 1;
        }
        if next_sample != self.total_samples {
            return Err(Error::validation(format!(
                "chunks cover {} samples, total_samples says {}",
                next_sample, self.total_samples
            )));
        }
        Ok(())
    }

    /// Serialize to the stable `index.json` byte form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse and validate an index from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let index: DatasetIndex = serde_json::from_slice(bytes)?;
        index.validate()?;
        Ok(index)
    }

    /// Save the index to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Load and validate an index from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::index_not_found(path));
        }
        Self::from_bytes(&std::fs::read(path)?)
    }
}

/// Per-worker index fragment written during `optimize` and merged by the
/// leader
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartialIndex {
    pub version: u32,
    pub node: u32,
    pub worker: u32,
    pub compression: Option<String>,
    pub schema: Vec<SchemaField>,
    pub chunks: Vec<PartialChunk>,
    pub config_hash: String,
}

/// One chunk as recorded by its producing worker, before global id
/// assignment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartialChunk {
    pub local_id: u64,
    pub filename: String,
    pub bytes: u64,
    pub samples: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dim: Option<u64>,
}

impl PartialIndex {
    /// Create an empty partial index for `(node, worker)`
    pub fn new(
        node: u32,
        worker: u32,
        compression: Option<String>,
        schema: Vec<SchemaField>,
        config_hash: String,
    ) -> Self {
        Self {
            version: INDEX_VERSION,
            node,
            worker,
            compression,
            schema,
            chunks: Vec::new(),
            config_hash,
        }
    }

    /// Object name under [`PARTIALS_PREFIX`] for `(node, worker)`
    pub fn object_name(node: u32, worker: u32) -> String {
        format!("{}/worker-{}-{}.json", PARTIALS_PREFIX, node, worker)
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Merge per-worker partial indices into the global dataset index.
///
/// Partials are ordered by `(node, worker)` then local chunk id; global
/// chunk ids are reassigned contiguously and sample id ranges accumulated.
/// The merge is deterministic: identical inputs produce identical output.
///
/// # Errors
///
/// `PartialMismatch` when partials disagree on schema, compression, or
/// config hash; `Validation` when no partial produced any chunk metadata.
pub fn merge_partials(mut partials: Vec<PartialIndex>) -> Result<DatasetIndex> {
    if partials.is_empty() {
        return Err(Error::validation("no partial indices to merge"));
    }
    partials.sort_by_key(|p| (p.node, p.worker));

    // Workers that saw no samples leave their schema empty; the first
    // non-empty schema is the dataset schema.
    let template = partials
        .iter()
        .find(|p| !p.schema.is_empty())
        .ok_or_else(|| Error::validation("every partial index has an empty schema"))?
        .clone();

    for partial in &partials {
        if !partial.schema.is_empty() && partial.schema != template.schema {
            return Err(Error::PartialMismatch(format!(
                "worker ({}, {}) schema differs",
                partial.node, partial.worker
            )));
        }
        if partial.compression != template.compression {
            return Err(Error::PartialMismatch(format!(
                "worker ({}, {}) compression differs",
                partial.node, partial.worker
            )));
        }
        if partial.config_hash != template.config_hash {
            return Err(Error::PartialMismatch(format!(
                "worker ({}, {}) config hash differs",
                partial.node, partial.worker
            )));
        }
    }

    let mut index = DatasetIndex::new(
        template.compression.clone(),
        template.schema.clone(),
        template.config_hash.clone(),
    );
    for partial in &partials {
        let mut chunks = partial.chunks.clone();
        chunks.sort_by_key(|c| c.local_id);
        for chunk in chunks {
            index.push_chunk(chunk.filename, chunk.bytes, chunk.samples, chunk.dim);
        }
    }
    index.validate()?;
    Ok(index)
}

/// SHA-256 hash of a canonical configuration document, hex-encoded.
///
/// Callers build `parts` deterministically (sorted, timestamp-free) so
/// identical configurations hash identically across runs.
pub fn config_hash(parts: &[(&str, String)]) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in parts {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn schema() -> Vec<SchemaField> {
        vec![SchemaField::new("x", "int")]
    }

    fn sample_index() -> DatasetIndex {
        let mut index = DatasetIndex::new(None, schema(), "abc".to_string());
        index.push_chunk("chunk-0-0000000000.bin".to_string(), 100, 4, None);
        index.push_chunk("chunk-0-0000000001.bin".to_string(), 100, 4, None);
        index.push_chunk("chunk-0-0000000002.bin".to_string(), 60, 2, None);
        index
    }

    #[test]
    fn test_push_chunk_assigns_ranges() {
        let index = sample_index();
        assert_eq!(index.total_samples, 10);
        assert_eq!(index.chunks[0].first, 0);
        assert_eq!(index.chunks[0].last, 3);
        assert_eq!(index.chunks[2].first, 8);
        assert_eq!(index.chunks[2].last, 9);
        index.validate().unwrap();
    }

    #[test]
    fn test_locate() {
        let index = sample_index();
        assert_eq!(index.locate(0).unwrap(), (0, 0));
        assert_eq!(index.locate(3).unwrap(), (0, 3));
        assert_eq!(index.locate(4).unwrap(), (1, 0));
        assert_eq!(index.locate(9).unwrap(), (2, 1));
        assert!(matches!(
            index.locate(10),
            Err(Error::SampleOutOfRange { .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILENAME);
        let index = sample_index();
        index.save(&path).unwrap();
        let loaded = DatasetIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_load_missing_index() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            DatasetIndex::load(dir.path().join("index.json")),
            Err(Error::IndexNotFound { .. })
        ));
    }

    #[test]
    fn test_stable_key_order() {
        let index = sample_index();
        let json = String::from_utf8(index.to_bytes().unwrap()).unwrap();
        let version_pos = json.find("\"version\"").unwrap();
        let compression_pos = json.find("\"compression\"").unwrap();
        let schema_pos = json.find("\"schema\"").unwrap();
        let chunks_pos = json.find("\"chunks\"").unwrap();
        let total_pos = json.find("\"total_samples\"").unwrap();
        let hash_pos = json.find("\"config_hash\"").unwrap();
        assert!(version_pos < compression_pos);
        assert!(compression_pos < schema_pos);
        assert!(schema_pos < chunks_pos);
        assert!(chunks_pos < total_pos);
        assert!(total_pos < hash_pos);
    }

    #[test]
    fn test_validation_rejects_gap() {
        let mut index = sample_index();
        index.chunks[1].first = 5;
        assert!(index.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_id_gap() {
        let mut index = sample_index();
        index.chunks[2].id = 7;
        assert!(index.validate().is_err());
    }

    fn partial(node: u32, worker: u32, files: &[(&str, u64)]) -> PartialIndex {
        let mut p = PartialIndex::new(node, worker, None, schema(), "abc".to_string());
        for (i, (name, samples)) in files.iter().enumerate() {
            p.chunks.push(PartialChunk {
                local_id: i as u64,
                filename: name.to_string(),
                bytes: 100,
                samples: *samples,
                dim: None,
            });
        }
        p
    }

    #[test]
    fn test_merge_orders_by_worker_then_local_id() {
        // Deliberately pass partials out of order.
        let merged = merge_partials(vec![
            partial(0, 1, &[("chunk-1-0000000000.bin", 3)]),
            partial(1, 0, &[("chunk-2-0000000000.bin", 2)]),
            partial(0, 0, &[("chunk-0-0000000000.bin", 4), ("chunk-0-0000000001.bin", 1)]),
        ])
        .unwrap();

        assert_eq!(merged.total_samples, 10);
        let filenames: Vec<&str> = merged.chunks.iter().map(|c| c.filename.as_str()).collect();
        assert_eq!(
            filenames,
            vec![
                "chunk-0-0000000000.bin",
                "chunk-0-0000000001.bin",
                "chunk-1-0000000000.bin",
                "chunk-2-0000000000.bin",
            ]
        );
        assert_eq!(
            merged.chunks.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        merged.validate().unwrap();
    }

    #[test]
    fn test_merge_is_deterministic() {
        let partials = vec![
            partial(0, 0, &[("chunk-0-0000000000.bin", 4)]),
            partial(0, 1, &[("chunk-1-0000000000.bin", 3)]),
        ];
        let a = merge_partials(partials.clone()).unwrap();
        let b = merge_partials(partials).unwrap();
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn test_merge_rejects_schema_mismatch() {
        let mut other = partial(0, 1, &[("chunk-1-0000000000.bin", 3)]);
        other.schema = vec![SchemaField::new("y", "str")];
        let result = merge_partials(vec![
            partial(0, 0, &[("chunk-0-0000000000.bin", 4)]),
            other,
        ]);
        assert!(matches!(result, Err(Error::PartialMismatch(_))));
    }

    #[test]
    fn test_merge_allows_empty_workers() {
        let mut empty = PartialIndex::new(0, 1, None, Vec::new(), "abc".to_string());
        empty.chunks.clear();
        let merged = merge_partials(vec![
            partial(0, 0, &[("chunk-0-0000000000.bin", 4)]),
            empty,
        ])
        .unwrap();
        assert_eq!(merged.total_samples, 4);
    }

    #[test]
    fn test_config_hash_stable_and_sensitive() {
        let a = config_hash(&[("chunk_bytes", "65536".to_string())]);
        let b = config_hash(&[("chunk_bytes", "65536".to_string())]);
        let c = config_hash(&[("chunk_bytes", "65537".to_string())]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_partial_object_name() {
        assert_eq!(
            PartialIndex::object_name(0, 3),
            "_partials/worker-0-3.json"
        );
    }
}
