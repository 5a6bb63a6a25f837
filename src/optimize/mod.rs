/*!
 * Optimize/map execution engine
 *
 * The producer side of the system: partition inputs deterministically,
 * run per-worker production (user fn → samples → chunk writer → upload),
 * and merge the per-worker partial indices into the published global
 * index. Coordination happens only through the object store — workers
 * never talk to each other.
 *
 * `map` shares the partitioning and worker lifecycle but produces
 * arbitrary user-written files instead of chunks, and publishes no
 * index.
 */

mod merge;
mod partition;
mod worker;

pub use merge::{wait_and_merge, wait_for_index};
pub use partition::{shard_for, shard_positions};

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info};

use strata_core_format::{ChunkBudget, CodecRegistry, Sample};
use strata_core_index::{config_hash, DatasetIndex};

use crate::config::OptimizeConfig;
use crate::error::{Result, StrataError};
use crate::store::{open_store, with_retry, ObjectStore};

/// Output of a user function: one sample or a finite sequence of them
pub trait IntoSamples {
    fn into_samples(self) -> Vec<Sample>;
}

impl IntoSamples for Sample {
    fn into_samples(self) -> Vec<Sample> {
        vec![self]
    }
}

impl IntoSamples for Vec<Sample> {
    fn into_samples(self) -> Vec<Sample> {
        self
    }
}

impl IntoSamples for Option<Sample> {
    fn into_samples(self) -> Vec<Sample> {
        self.into_iter().collect()
    }
}

/// Summary of a completed optimize run
#[derive(Debug, Clone)]
pub struct OptimizeReport {
    /// The published global index (leader) or the one observed after
    /// polling (other nodes)
    pub index: DatasetIndex,
    /// Inputs processed on this node
    pub items_processed: u64,
    /// Samples written on this node
    pub samples_written: u64,
}

/// Summary of a completed map run
#[derive(Debug, Clone)]
pub struct MapReport {
    /// Inputs processed on this node
    pub items_processed: u64,
}

/// Run the optimize engine on this node.
///
/// `user_fn` maps one input to a sample or a sequence of samples; it is
/// retried per item up to `retry_per_item` and the job aborts fail-fast
/// on final failure. The leader node merges all partial indices and
/// publishes `index.json`.
pub fn optimize<T, F, O>(config: &OptimizeConfig, inputs: &[T], user_fn: F) -> Result<OptimizeReport>
where
    T: Sync,
    F: Fn(&T) -> std::result::Result<O, String> + Sync,
    O: IntoSamples,
{
    optimize_with_registry(config, inputs, user_fn, CodecRegistry::builtin())
}

/// [`optimize`] with a custom codec registry
pub fn optimize_with_registry<T, F, O>(
    config: &OptimizeConfig,
    inputs: &[T],
    user_fn: F,
    registry: CodecRegistry,
) -> Result<OptimizeReport>
where
    T: Sync,
    F: Fn(&T) -> std::result::Result<O, String> + Sync,
    O: IntoSamples,
{
    config.validate()?;
    let workers = config.effective_workers();
    let total_shards = config.num_nodes * workers as u32;
    partition::validate_plan(inputs.len(), total_shards)?;

    let (store, _) = open_store(&config.output_dir)?;
    let compression = config.parsed_compression()?;
    let budget = ChunkBudget {
        max_bytes: config.chunk_bytes,
        max_samples: config.chunk_size,
    };
    let hash = job_config_hash(config);
    let staging = tempfile::tempdir()?;

    info!(
        output = %config.output_dir,
        inputs = inputs.len(),
        nodes = config.num_nodes,
        workers,
        "starting optimize"
    );

    let progress = node_progress(config, inputs.len(), total_shards, workers);

    // One thread per worker; each consumes its deterministic shard.
    let outcomes: Vec<Result<worker::WorkerOutcome>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers as u32)
            .map(|w| {
                let ctx = worker::WorkerContext {
                    store: &store,
                    staging_dir: staging.path(),
                    budget,
                    compression,
                    registry: registry.clone(),
                    node: config.node_rank,
                    worker: w,
                    global_rank: config.node_rank * workers as u32 + w,
                    retry_per_item: config.retry_per_item,
                    retry: config.retry,
                    config_hash: hash.clone(),
                };
                let user_fn = &user_fn;
                let progress = progress.clone();
                let shard = shard_positions(
                    inputs.len(),
                    total_shards,
                    config.node_rank * workers as u32 + w,
                );
                scope.spawn(move || {
                    let outcome = worker::run_worker(&ctx, inputs, &shard, user_fn);
                    if let (Some(bar), Ok(outcome)) = (&progress, &outcome) {
                        bar.inc(outcome.items_processed);
                    }
                    outcome
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(StrataError::Other("worker panicked".to_string())))
            })
            .collect()
    });

    let mut items_processed = 0;
    let mut samples_written = 0;
    for outcome in outcomes {
        let outcome = outcome?;
        items_processed += outcome.items_processed;
        samples_written += outcome.samples_written;
    }
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    let timeout = Duration::from_secs(config.merge_timeout_secs);
    let index = if config.node_rank == 0 {
        wait_and_merge(&store, total_shards as usize, timeout, &config.retry)?
    } else {
        wait_for_index(&store, timeout, &config.retry)?
    };

    Ok(OptimizeReport {
        index,
        items_processed,
        samples_written,
    })
}

/// Context handed to `map` user functions for writing output files
pub struct MapContext {
    store: Arc<dyn ObjectStore>,
    retry: crate::store::RetryPolicy,
}

impl MapContext {
    /// Write one output file under the job's output directory
    pub fn write(&self, relative_path: &str, data: &[u8]) -> Result<()> {
        with_retry(&self.retry, "put map output", || {
            self.store.put(relative_path, data)
        })?;
        Ok(())
    }
}

/// Run the map engine on this node: same partitioning and retry
/// lifecycle as [`optimize`], but the user function writes arbitrary
/// files through [`MapContext`] and no index is published.
pub fn map<T, F>(config: &OptimizeConfig, inputs: &[T], user_fn: F) -> Result<MapReport>
where
    T: Sync,
    F: Fn(&T, &MapContext) -> std::result::Result<(), String> + Sync,
{
    config.validate()?;
    let workers = config.effective_workers();
    let total_shards = config.num_nodes * workers as u32;
    partition::validate_plan(inputs.len(), total_shards)?;

    let (store, _) = open_store(&config.output_dir)?;
    let ctx = MapContext {
        store,
        retry: config.retry,
    };

    // This node's share: every shard owned by one of its workers.
    let node_positions: Vec<usize> = (0..workers as u32)
        .flat_map(|w| {
            shard_positions(
                inputs.len(),
                total_shards,
                config.node_rank * workers as u32 + w,
            )
        })
        .collect();

    debug!(
        node = config.node_rank,
        items = node_positions.len(),
        "starting map"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| StrataError::Other(format!("thread pool: {}", e)))?;

    let items = pool.install(|| {
        node_positions
            .par_iter()
            .map(|&position| {
                worker::call_with_retries(
                    &|input: &T| user_fn(input, &ctx),
                    &inputs[position],
                    position,
                    config.retry_per_item,
                )
                .map(|_| 1u64)
            })
            .try_reduce(|| 0u64, |a, b| Ok(a + b))
    })?;

    Ok(MapReport {
        items_processed: items,
    })
}

/// Hash of the producing configuration, recorded in the index.
/// Timestamps and machine identity are deliberately excluded so
/// re-runs with the same plan hash identically.
fn job_config_hash(config: &OptimizeConfig) -> String {
    config_hash(&[
        ("chunk_bytes", format!("{:?}", config.chunk_bytes)),
        ("chunk_size", format!("{:?}", config.chunk_size)),
        ("compression", format!("{:?}", config.compression)),
        ("num_nodes", config.num_nodes.to_string()),
        (
            "num_workers",
            config.effective_workers().to_string(),
        ),
    ])
}

fn node_progress(
    config: &OptimizeConfig,
    total_inputs: usize,
    total_shards: u32,
    workers: usize,
) -> Option<ProgressBar> {
    if !config.show_progress {
        return None;
    }
    let node_items: usize = (0..workers as u32)
        .map(|w| {
            shard_positions(
                total_inputs,
                total_shards,
                config.node_rank * workers as u32 + w,
            )
            .len()
        })
        .sum();
    let bar = ProgressBar::new(node_items as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} items",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    Some(bar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core_format::Value;
    use tempfile::tempdir;

    fn config_for(dir: &std::path::Path, workers: usize) -> OptimizeConfig {
        let mut config = OptimizeConfig::new(dir.to_string_lossy().to_string());
        config.num_workers = workers;
        config.chunk_size = Some(4);
        config
    }

    #[test]
    fn test_optimize_end_to_end_single_worker() {
        let out = tempdir().unwrap();
        let inputs: Vec<i64> = (0..10).collect();
        let report = optimize(&config_for(out.path(), 1), &inputs, |&i: &i64| {
            Ok::<_, String>(Sample::new().with("x", Value::Int(i)))
        })
        .unwrap();

        assert_eq!(report.items_processed, 10);
        assert_eq!(report.samples_written, 10);
        assert_eq!(report.index.total_samples, 10);
        assert!(out.path().join("index.json").exists());
        // Partials are cleaned up after merge.
        assert!(!out.path().join("_partials").join("worker-0-0.json").exists());
    }

    #[test]
    fn test_optimize_multi_worker_covers_all_inputs() {
        let out = tempdir().unwrap();
        let inputs: Vec<i64> = (0..50).collect();
        let report = optimize(&config_for(out.path(), 3), &inputs, |&i: &i64| {
            Ok::<_, String>(Sample::new().with("x", Value::Int(i)))
        })
        .unwrap();

        assert_eq!(report.index.total_samples, 50);
        report.index.validate().unwrap();
    }

    #[test]
    fn test_optimize_fails_fast_on_user_fn() {
        let out = tempdir().unwrap();
        let inputs: Vec<i64> = (0..10).collect();
        let err = optimize(&config_for(out.path(), 2), &inputs, |&i: &i64| {
            if i == 7 {
                Err("item 7 is poison".to_string())
            } else {
                Ok(Sample::new().with("x", Value::Int(i)))
            }
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(!out.path().join("index.json").exists());
    }

    #[test]
    fn test_optimize_rejects_empty_inputs() {
        let out = tempdir().unwrap();
        let inputs: Vec<i64> = Vec::new();
        let err = optimize(&config_for(out.path(), 1), &inputs, |&i: &i64| {
            Ok::<_, String>(Sample::new().with("x", Value::Int(i)))
        })
        .unwrap_err();
        assert!(matches!(err, StrataError::Partition(_)));
    }

    #[test]
    fn test_optimize_is_deterministic() {
        let run = || {
            let out = tempdir().unwrap();
            let inputs: Vec<i64> = (0..30).collect();
            optimize(&config_for(out.path(), 2), &inputs, |&i: &i64| {
                Ok::<_, String>(Sample::new().with("x", Value::Int(i)))
            })
            .unwrap();
            std::fs::read(out.path().join("index.json")).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_map_writes_files_without_index() {
        let out = tempdir().unwrap();
        let inputs: Vec<i64> = (0..8).collect();
        let report = map(&config_for(out.path(), 2), &inputs, |&i: &i64, ctx| {
            ctx.write(&format!("out-{}.txt", i), format!("value {}", i).as_bytes())
                .map_err(|e| e.to_string())
        })
        .unwrap();

        assert_eq!(report.items_processed, 8);
        assert!(out.path().join("out-3.txt").exists());
        assert!(!out.path().join("index.json").exists());
    }
}
