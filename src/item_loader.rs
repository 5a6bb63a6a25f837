/*!
 * Item loaders: how a chunk's contents map to yielded items
 *
 * The default loader yields one item per serialized sample, driven by the
 * chunk offset table. The token-block loader instead treats each chunk as
 * one flat token buffer and yields fixed-size blocks from it, which is
 * how pre-tokenized text corpora are consumed. Block counts come from the
 * per-chunk `dim` field recorded in the index at write time, so the
 * assigner stays a pure function of the index.
 */

use strata_core_format::{CodecRegistry, ParsedChunk, Sample, Schema, Tokens, Value};
use strata_core_index::DatasetIndex;

use crate::config::ItemLoaderSpec;
use crate::error::{Result, StrataError};

/// Chunk-content interpretation selected by the reader config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemLoader {
    /// One item per serialized sample
    Default,
    /// Fixed-size token blocks over the chunk's flat token buffer
    TokenBlocks { block_size: u32 },
}

impl ItemLoader {
    /// Build a loader from its config spec, validating it against the
    /// dataset index.
    pub fn new(spec: ItemLoaderSpec, index: &DatasetIndex) -> Result<Self> {
        match spec {
            ItemLoaderSpec::Default => Ok(ItemLoader::Default),
            ItemLoaderSpec::Tokens { block_size } => {
                let single_tokens =
                    index.schema.len() == 1 && index.schema[0].codec == "tokens";
                if !single_tokens {
                    return Err(StrataError::Config(
                        "tokens item loader requires a single-field 'tokens' schema".to_string(),
                    ));
                }
                if index.chunks.iter().any(|c| c.dim.is_none()) {
                    return Err(StrataError::Config(
                        "tokens item loader requires per-chunk token counts in the index"
                            .to_string(),
                    ));
                }
                Ok(ItemLoader::TokenBlocks { block_size })
            }
        }
    }

    /// The index the assigner should run over: identical for the default
    /// loader, re-counted in block units for the token loader.
    pub fn effective_index(&self, index: &DatasetIndex) -> Result<DatasetIndex> {
        match self {
            ItemLoader::Default => Ok(index.clone()),
            ItemLoader::TokenBlocks { block_size } => {
                let mut blocks_index = DatasetIndex::new(
                    index.compression.clone(),
                    index.schema.clone(),
                    index.config_hash.clone(),
                );
                for chunk in &index.chunks {
                    let tokens = chunk.dim.ok_or_else(|| {
                        StrataError::Config(format!(
                            "chunk {} has no recorded token count",
                            chunk.filename
                        ))
                    })?;
                    let blocks = tokens / *block_size as u64;
                    if blocks == 0 {
                        return Err(StrataError::Config(format!(
                            "chunk {} holds {} tokens, fewer than one block of {}",
                            chunk.filename, tokens, block_size
                        )));
                    }
                    blocks_index.push_chunk(
                        chunk.filename.clone(),
                        chunk.bytes,
                        blocks,
                        chunk.dim,
                    );
                }
                blocks_index.validate()?;
                Ok(blocks_index)
            }
        }
    }

    /// Prepare a downloaded chunk for item access
    pub fn prepare(
        &self,
        chunk: ParsedChunk,
        schema: &Schema,
        registry: &CodecRegistry,
    ) -> Result<PreparedChunk> {
        match self {
            ItemLoader::Default => Ok(PreparedChunk::Samples(chunk)),
            ItemLoader::TokenBlocks { block_size } => {
                let field = schema.fields()[0].name.clone();
                let mut flat: Option<Tokens> = None;
                for i in 0..chunk.sample_count() {
                    let sample = chunk.sample(i, schema, registry)?;
                    let tokens = sample
                        .value_at(0)
                        .and_then(|v| v.as_tokens())
                        .ok_or_else(|| {
                            StrataError::Config(
                                "tokens item loader on a non-tokens sample".to_string(),
                            )
                        })?;
                    flat = Some(match (flat, tokens) {
                        (None, t) => t.clone(),
                        (Some(Tokens::U16(mut acc)), Tokens::U16(t)) => {
                            acc.extend_from_slice(t);
                            Tokens::U16(acc)
                        }
                        (Some(Tokens::U32(mut acc)), Tokens::U32(t)) => {
                            acc.extend_from_slice(t);
                            Tokens::U32(acc)
                        }
                        _ => {
                            return Err(StrataError::Config(
                                "mixed token widths within one chunk".to_string(),
                            ))
                        }
                    });
                }
                Ok(PreparedChunk::TokenBlocks {
                    field,
                    block_size: *block_size,
                    flat: flat.unwrap_or(Tokens::U32(Vec::new())),
                })
            }
        }
    }
}

/// A chunk made ready for repeated item access
pub enum PreparedChunk {
    Samples(ParsedChunk),
    TokenBlocks {
        field: String,
        block_size: u32,
        flat: Tokens,
    },
}

impl PreparedChunk {
    /// Number of items this chunk yields
    pub fn item_count(&self) -> usize {
        match self {
            PreparedChunk::Samples(chunk) => chunk.sample_count(),
            PreparedChunk::TokenBlocks {
                block_size, flat, ..
            } => flat.len() / *block_size as usize,
        }
    }

    /// Materialize item `index`
    pub fn item(
        &self,
        index: usize,
        schema: &Schema,
        registry: &CodecRegistry,
    ) -> Result<Sample> {
        match self {
            PreparedChunk::Samples(chunk) => Ok(chunk.sample(index, schema, registry)?),
            PreparedChunk::TokenBlocks {
                field,
                block_size,
                flat,
            } => {
                let bs = *block_size as usize;
                let start = index * bs;
                if start + bs > flat.len() {
                    return Err(StrataError::Format {
                        chunk: None,
                        source: strata_core_format::Error::SampleOutOfRange {
                            index,
                            count: flat.len() / bs,
                        },
                    });
                }
                let block = match flat {
                    Tokens::U16(v) => Tokens::U16(v[start..start + bs].to_vec()),
                    Tokens::U32(v) => Tokens::U32(v[start..start + bs].to_vec()),
                };
                Ok(Sample::new().with(field.clone(), Value::Tokens(block)))
            }
        }
    }
}
