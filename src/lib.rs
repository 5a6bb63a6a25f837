/*!
 * Strata - Distributed streaming data engine for ML training
 *
 * Packs heterogeneous training samples into self-describing binary
 * chunks, publishes a dataset index, and streams those chunks from
 * object storage to many concurrent workers with deterministic,
 * non-overlapping, reproducible sample assignments. Features include:
 * - Self-describing chunk format with per-field codecs
 * - Deterministic shuffle/shard assignment across (node, worker, epoch)
 * - Bounded local chunk cache with concurrent-safe admission
 * - Background prefetch with a bounded in-flight window
 * - Pause/resume from an (epoch, cursor) pair
 * - Weighted mixing of multiple streaming datasets
 * - Parallel optimize/map engine with leader-side index merge
 */

pub mod assign;
pub mod cache;
pub mod config;
pub mod error;
pub mod item_loader;
pub mod logging;
pub mod mixer;
pub mod optimize;
pub mod prefetch;
pub mod profile;
pub mod reader;
pub mod stats;
pub mod store;

// Format and index crates (re-exported from workspace crates)
pub use strata_core_format as format;
pub use strata_core_index as index;

// Re-export commonly used types for convenience
pub use assign::{Assignment, World};
pub use cache::ChunkCache;
pub use config::{parse_byte_size, ItemLoaderSpec, OptimizeConfig, StreamConfig};
pub use error::{ErrorCategory, Result, StrataError};
pub use format::{
    ChunkBudget, ChunkWriter, CodecRegistry, Compression, ParsedChunk, Sample, Schema, Value,
};
pub use index::{DatasetIndex, INDEX_FILENAME};
pub use mixer::{CombinedDataset, ExhaustionMode};
pub use optimize::{map, optimize, IntoSamples, MapReport, OptimizeReport};
pub use reader::{StreamIter, StreamState, StreamingDataset};
pub use stats::StreamStats;
pub use store::{LocalStore, MemoryStore, ObjectStore, RetryPolicy, StoreError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
