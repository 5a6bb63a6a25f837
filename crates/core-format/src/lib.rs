//! Chunk binary format and field codecs for Strata datasets
//!
//! This crate owns the stable on-disk pieces of the format: the codec
//! registry that turns typed field values into bytes, the self-describing
//! chunk file layout, and the chunk writer/reader pair. Dataset-level
//! metadata (the index) lives in `strata-core-index`.

pub mod chunk;
pub mod codec;
pub mod compress;
pub mod error;
pub mod reader;
pub mod schema;
pub mod writer;

pub use chunk::{ChunkHeader, Compression, CHUNK_MAGIC, FORMAT_VERSION, HEADER_LEN};
pub use codec::{
    CodecId, CodecRegistry, ColorKind, Dtype, FieldCodec, ImageData, Tensor, Tokens, Value,
};
pub use error::{Error, Result};
pub use reader::{ChunkPrefix, ParsedChunk};
pub use schema::{decode_sample, encode_sample, Field, Sample, Schema};
pub use writer::{ChunkBudget, ChunkWriter, ClosedChunk};
