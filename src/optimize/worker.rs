//! Optimize worker: shard consumption, chunk production, and upload
//!
//! Each worker pulls its shard of inputs, feeds the user function's
//! samples into a chunk writer, and uploads every closed chunk before
//! deleting the local file. Workers never talk to each other; their only
//! output is uploaded chunks plus one partial index object.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use strata_core_format::{ChunkBudget, ChunkWriter, ClosedChunk, CodecRegistry, Compression};
use strata_core_index::{PartialChunk, PartialIndex, SchemaField};

use crate::error::{Result, StrataError};
use crate::store::{with_retry, ObjectStore, RetryPolicy};

use super::IntoSamples;

/// Everything a worker needs, shared by value
pub(crate) struct WorkerContext<'a> {
    pub store: &'a Arc<dyn ObjectStore>,
    pub staging_dir: &'a Path,
    pub budget: ChunkBudget,
    pub compression: Compression,
    pub registry: CodecRegistry,
    pub node: u32,
    pub worker: u32,
    /// Globally unique worker rank embedded in chunk filenames
    pub global_rank: u32,
    pub retry_per_item: u32,
    pub retry: RetryPolicy,
    pub config_hash: String,
}

/// What one worker produced
#[derive(Debug)]
pub(crate) struct WorkerOutcome {
    pub partial: PartialIndex,
    pub items_processed: u64,
    pub samples_written: u64,
}

/// Run one worker over its shard.
///
/// `fn` failures on an item are retried up to `retry_per_item` times;
/// the final failure aborts with `UserFn`, which fails the whole job.
pub(crate) fn run_worker<T, F, O>(
    ctx: &WorkerContext<'_>,
    inputs: &[T],
    positions: &[usize],
    user_fn: &F,
) -> Result<WorkerOutcome>
where
    T: Sync,
    F: Fn(&T) -> std::result::Result<O, String> + Sync,
    O: IntoSamples,
{
    let worker_dir = ctx
        .staging_dir
        .join(format!("worker-{}-{}", ctx.node, ctx.worker));
    let mut writer = ChunkWriter::new(
        &worker_dir,
        ctx.budget,
        ctx.compression,
        ctx.registry.clone(),
    )?
    .with_worker(ctx.global_rank);

    let mut chunks: Vec<PartialChunk> = Vec::new();
    let mut items_processed = 0u64;
    let mut samples_written = 0u64;

    for &position in positions {
        let output = call_with_retries(user_fn, &inputs[position], position, ctx.retry_per_item)?;
        for sample in output.into_samples() {
            if let Some(closed) = writer.add(&sample)? {
                chunks.push(upload_chunk(ctx, closed)?);
            }
            samples_written += 1;
        }
        items_processed += 1;
    }
    if let Some(closed) = writer.finish()? {
        chunks.push(upload_chunk(ctx, closed)?);
    }

    let schema: Vec<SchemaField> = writer
        .schema()
        .map(|s| {
            s.fields()
                .iter()
                .map(|f| SchemaField::new(f.name.clone(), f.codec.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut partial = PartialIndex::new(
        ctx.node,
        ctx.worker,
        ctx.compression.index_name().map(str::to_string),
        schema,
        ctx.config_hash.clone(),
    );
    partial.chunks = chunks;

    let object_name = PartialIndex::object_name(ctx.node, ctx.worker);
    let bytes = partial.to_bytes()?;
    with_retry(&ctx.retry, "put partial index", || {
        ctx.store.put(&object_name, &bytes)
    })?;

    debug!(
        node = ctx.node,
        worker = ctx.worker,
        items = items_processed,
        samples = samples_written,
        chunks = partial.chunks.len(),
        "worker finished shard"
    );

    Ok(WorkerOutcome {
        partial,
        items_processed,
        samples_written,
    })
}

/// Upload a closed chunk, then delete the local file.
///
/// The descriptor is only recorded after a successful upload, and the
/// local file is only deleted after that.
fn upload_chunk(ctx: &WorkerContext<'_>, closed: ClosedChunk) -> Result<PartialChunk> {
    let bytes = std::fs::read(&closed.path)?;
    with_retry(&ctx.retry, "put chunk", || {
        ctx.store.put(&closed.filename, &bytes)
    })?;
    if let Err(e) = std::fs::remove_file(&closed.path) {
        warn!(chunk = %closed.filename, error = %e, "failed to delete staged chunk");
    }
    Ok(PartialChunk {
        local_id: closed.local_id,
        filename: closed.filename,
        bytes: closed.byte_size,
        samples: closed.sample_count as u64,
        dim: closed.dim,
    })
}

/// Invoke the user function with the per-item retry budget
pub(crate) fn call_with_retries<T, F, O>(
    user_fn: &F,
    input: &T,
    position: usize,
    retries: u32,
) -> Result<O>
where
    F: Fn(&T) -> std::result::Result<O, String>,
{
    let mut attempt = 0;
    loop {
        match user_fn(input) {
            Ok(output) => return Ok(output),
            Err(message) if attempt < retries => {
                attempt += 1;
                warn!(
                    item = position,
                    attempt,
                    max_attempts = retries,
                    error = %message,
                    "user function failed, retrying item"
                );
            }
            Err(message) => {
                return Err(StrataError::UserFn {
                    item: position,
                    message,
                    retries: attempt,
                })
            }
        }
    }
}
