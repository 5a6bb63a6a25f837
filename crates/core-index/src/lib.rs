//! Dataset index model for Strata datasets
//!
//! The index (`index.json`) is the dataset-level manifest: format
//! version, compression, the shared field schema, and the ordered chunk
//! descriptor list. During `optimize`, each worker writes a
//! [`PartialIndex`]; the leader merges them with [`merge_partials`] into
//! the global [`DatasetIndex`].

pub mod error;
pub mod index;

pub use error::{Error, Result};
pub use index::{
    config_hash, merge_partials, ChunkDescriptor, DatasetIndex, PartialChunk, PartialIndex,
    SchemaField, INDEX_FILENAME, INDEX_VERSION, PARTIALS_PREFIX,
};
