/*!
 * Streaming dataset reader
 *
 * `StreamingDataset` binds the pieces together: it loads the index from
 * the object store, derives this worker's deterministic assignment per
 * epoch, prefetches chunks through the bounded local cache, and yields
 * decoded samples strictly in assignment order. Pause/resume state is
 * just `(epoch, cursor)`: reloading it re-derives the assignment and
 * fast-forwards.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use strata_core_format::{
    ChunkPrefix, CodecRegistry, Field, ParsedChunk, Sample, Schema,
};
use strata_core_index::{DatasetIndex, INDEX_FILENAME};

use crate::assign::{Assignment, WorkerAssignment, World};
use crate::cache::ChunkCache;
use crate::config::StreamConfig;
use crate::error::{Result, StrataError};
use crate::item_loader::{ItemLoader, PreparedChunk};
use crate::prefetch::Prefetcher;
use crate::profile::TraceProfiler;
use crate::stats::StreamStats;
use crate::store::{open_store, with_retry, ObjectStore};

/// Resumable position of one worker: derived assignment plus a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub epoch: u64,
    pub cursor: u64,
}

impl StreamState {
    /// Save to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| StrataError::Resume(format!("cannot read state file: {}", e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// A chunked dataset streamed from an object store
pub struct StreamingDataset {
    config: StreamConfig,
    store: Arc<dyn ObjectStore>,
    cache: Option<Arc<ChunkCache>>,
    registry: CodecRegistry,
    schema: Schema,
    /// Index in item units (token-block datasets are re-counted)
    index: DatasetIndex,
    loader: ItemLoader,
    world: World,
    epoch: u64,
    resume_cursor: Option<u64>,
}

impl StreamingDataset {
    /// Open a dataset with the single-node single-worker world
    pub fn new(config: StreamConfig) -> Result<Self> {
        Self::with_world(config, World::single())
    }

    /// Open a dataset for one worker of a distributed world
    pub fn with_world(config: StreamConfig, world: World) -> Result<Self> {
        Self::with_world_and_registry(config, world, CodecRegistry::builtin())
    }

    /// Open a dataset with a custom codec registry
    pub fn with_world_and_registry(
        config: StreamConfig,
        world: World,
        registry: CodecRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let (store, cache_disabled) = open_store(&config.input_dir)?;
        Self::with_store(config, world, registry, store, cache_disabled)
    }

    /// Open a dataset over an explicit store (used by tests to inject
    /// counting or failing stores).
    pub fn with_store(
        config: StreamConfig,
        world: World,
        registry: CodecRegistry,
        store: Arc<dyn ObjectStore>,
        cache_disabled: bool,
    ) -> Result<Self> {
        config.validate()?;
        world.validate()?;

        let index_bytes = with_retry(&config.retry, "get index", || store.get(INDEX_FILENAME))?;
        let raw_index = DatasetIndex::from_bytes(&index_bytes)?;

        let fields: Vec<Field> = raw_index
            .schema
            .iter()
            .map(|f| Field::new(f.name.clone(), f.codec.clone()))
            .collect();
        let schema = Schema::new(fields, &registry)?;

        let loader = ItemLoader::new(config.item_loader, &raw_index)?;
        let index = loader.effective_index(&raw_index)?;

        let cache = if cache_disabled {
            info!(input = %config.input_dir, "network mount: chunk cache disabled");
            None
        } else {
            let dir = match &config.cache_dir {
                Some(dir) => dir.clone(),
                None => default_cache_dir(&config.input_dir),
            };
            Some(Arc::new(ChunkCache::new(dir, config.max_cache_size)?))
        };

        debug!(
            input = %config.input_dir,
            items = index.total_samples,
            chunks = index.total_chunks(),
            "opened streaming dataset"
        );

        Ok(Self {
            config,
            store,
            cache,
            registry,
            schema,
            index,
            loader,
            world,
            epoch: 0,
            resume_cursor: None,
        })
    }

    /// Total items in the dataset (block count for token datasets)
    pub fn len(&self) -> u64 {
        self.index.total_samples
    }

    /// True when the dataset holds no items
    pub fn is_empty(&self) -> bool {
        self.index.total_samples == 0
    }

    /// The dataset index in item units
    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    /// The dataset schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Select the epoch for the next iteration
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
        self.resume_cursor = None;
    }

    /// Restore a previously saved position; the next [`iter`](Self::iter)
    /// resumes at that cursor.
    pub fn load_state_dict(&mut self, state: StreamState) -> Result<()> {
        let len = self.worker_assignment(state.epoch)?.len();
        if state.cursor > len {
            return Err(StrataError::Resume(format!(
                "cursor {} beyond assignment length {}",
                state.cursor, len
            )));
        }
        self.epoch = state.epoch;
        self.resume_cursor = Some(state.cursor);
        Ok(())
    }

    /// Random access to one item by global id.
    ///
    /// Uses the byte-range fast path (header + single sample) for
    /// uncompressed sample datasets streamed without a cache; otherwise
    /// fetches and parses the whole chunk.
    pub fn get(&self, item: u64) -> Result<Sample> {
        let (chunk_pos, intra) = self.index.locate(item)?;
        let descriptor = &self.index.chunks[chunk_pos];
        let filename = descriptor.filename.clone();

        if self.cache.is_none()
            && self.index.compression.is_none()
            && matches!(self.loader, ItemLoader::Default)
        {
            return self.get_by_range(&filename, descriptor.samples as u32, intra);
        }

        let prepared = self.load_chunk(chunk_pos)?;
        let sample = prepared.item(intra, &self.schema, &self.registry)?;
        if let Some(cache) = &self.cache {
            cache.done_with(&filename)?;
        }
        Ok(sample)
    }

    /// Range-mode single sample read: fetch the chunk prefix, then
    /// exactly the sample's bytes.
    fn get_by_range(&self, filename: &str, sample_count: u32, intra: usize) -> Result<Sample> {
        let prefix_len = ChunkPrefix::prefix_len(sample_count) as u64;
        let prefix_bytes = with_retry(&self.config.retry, "get chunk prefix", || {
            self.store.get_range(filename, 0..prefix_len)
        })?;
        let prefix = ChunkPrefix::parse(&prefix_bytes)
            .map_err(|e| StrataError::format_in_chunk(filename, e))?;
        let range = prefix
            .sample_file_range(intra)
            .map_err(|e| StrataError::format_in_chunk(filename, e))?;
        let blob = with_retry(&self.config.retry, "get sample range", || {
            self.store.get_range(filename, range.clone())
        })?;
        strata_core_format::decode_sample(&self.schema, &self.registry, &blob)
            .map_err(|e| StrataError::format_in_chunk(filename, e))
    }

    /// Iterate the current epoch (respecting restored resume state)
    pub fn iter(&self) -> Result<StreamIter<'_>> {
        let assignment = self.worker_assignment(self.epoch)?;
        StreamIter::new(self, assignment, self.epoch, self.resume_cursor.unwrap_or(0))
    }

    /// Iterate a specific epoch from its start, ignoring resume state.
    /// Used by the combined mixer to wrap exhausted sources.
    pub fn iter_epoch(&self, epoch: u64) -> Result<StreamIter<'_>> {
        let assignment = self.worker_assignment(epoch)?;
        StreamIter::new(self, assignment, epoch, 0)
    }

    /// The full deterministic plan for this worker and `epoch`
    fn worker_assignment(&self, epoch: u64) -> Result<WorkerAssignment> {
        Assignment::for_worker(
            &self.index,
            &self.world,
            epoch,
            self.config.seed,
            self.config.shuffle,
            self.config.drop_last,
        )
    }

    /// Fetch and prepare one chunk; the caller owns the cache pin (when
    /// a cache is active) and must `done_with` the chunk filename.
    fn load_chunk(&self, chunk_pos: usize) -> Result<PreparedChunk> {
        let descriptor = &self.index.chunks[chunk_pos];
        let filename = &descriptor.filename;
        let parsed = match &self.cache {
            Some(cache) => {
                let path = cache.get_or_fetch(filename, || {
                    Ok(with_retry(&self.config.retry, "get chunk", || {
                        self.store.get(filename)
                    })?)
                })?;
                ParsedChunk::open(&path)
                    .map_err(|e| StrataError::format_in_chunk(filename.clone(), e))?
            }
            None => {
                let bytes = with_retry(&self.config.retry, "get chunk", || {
                    self.store.get(filename)
                })?;
                ParsedChunk::parse(&bytes)
                    .map_err(|e| StrataError::format_in_chunk(filename.clone(), e))?
            }
        };
        self.loader.prepare(parsed, &self.schema, &self.registry)
    }
}

/// Deterministic per-dataset cache directory under the system temp dir,
/// shared by same-machine workers reading the same dataset
fn default_cache_dir(input_dir: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(input_dir.as_bytes());
    let digest = hex::encode(hasher.finalize());
    std::env::temp_dir()
        .join("strata-cache")
        .join(&digest[..16])
}

/// Ordered iterator over one epoch of one worker's assignment
pub struct StreamIter<'a> {
    dataset: &'a StreamingDataset,
    assignment: WorkerAssignment,
    prefetcher: Option<Prefetcher>,
    epoch: u64,
    cursor: u64,
    task_idx: usize,
    item_in_task: usize,
    next_to_schedule: usize,
    current: Option<PreparedChunk>,
    stats: StreamStats,
    profiler: Option<TraceProfiler>,
}

impl<'a> StreamIter<'a> {
    fn new(
        dataset: &'a StreamingDataset,
        assignment: WorkerAssignment,
        epoch: u64,
        start_cursor: u64,
    ) -> Result<Self> {
        // Fast-forward: skip whole tasks that precede the cursor so
        // their chunks are never downloaded.
        let mut remaining = start_cursor;
        let mut task_idx = 0;
        for task in &assignment.tasks {
            let len = task.samples.len() as u64;
            if remaining < len {
                break;
            }
            remaining -= len;
            task_idx += 1;
        }

        let prefetcher = dataset.cache.as_ref().map(|cache| {
            Prefetcher::new(
                Arc::clone(&dataset.store),
                Arc::clone(cache),
                dataset.config.retry,
                dataset.config.download_threads,
                dataset.config.max_prefetch_chunks,
            )
        });

        let profiler = (dataset.config.profile_batches > 0)
            .then(|| TraceProfiler::new(dataset.config.profile_batches));

        let mut iter = Self {
            dataset,
            assignment,
            prefetcher,
            epoch,
            cursor: start_cursor,
            task_idx,
            item_in_task: remaining as usize,
            next_to_schedule: task_idx,
            current: None,
            stats: StreamStats::new(),
            profiler,
        };
        iter.fill_window();
        Ok(iter)
    }

    /// The epoch this iterator walks
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Resumable position after the last yielded item
    pub fn state(&self) -> StreamState {
        StreamState {
            epoch: self.epoch,
            cursor: self.cursor,
        }
    }

    /// Counters for this pass
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Keep the prefetch window full
    fn fill_window(&mut self) {
        let Some(prefetcher) = &self.prefetcher else {
            return;
        };
        while self.next_to_schedule < self.assignment.tasks.len() {
            let task = &self.assignment.tasks[self.next_to_schedule];
            let filename = &self.dataset.index.chunks[task.chunk_pos].filename;
            if !prefetcher.try_schedule(self.next_to_schedule, filename) {
                break;
            }
            self.next_to_schedule += 1;
        }
    }

    fn load_current(&mut self) -> Result<()> {
        let task = &self.assignment.tasks[self.task_idx];
        let descriptor = &self.dataset.index.chunks[task.chunk_pos];

        let fetch_start = Instant::now();
        let prepared = match &self.prefetcher {
            Some(prefetcher) => {
                let path = prefetcher.wait_ready(self.task_idx)?;
                let parsed = ParsedChunk::open(&path)
                    .map_err(|e| StrataError::format_in_chunk(&descriptor.filename, e))?;
                self.dataset
                    .loader
                    .prepare(parsed, &self.dataset.schema, &self.dataset.registry)?
            }
            None => self.dataset.load_chunk(task.chunk_pos)?,
        };
        if let Some(profiler) = &mut self.profiler {
            profiler.record(&descriptor.filename, "fetch", fetch_start);
        }

        self.stats.chunks_loaded += 1;
        self.stats.bytes_read += descriptor.bytes;
        self.current = Some(prepared);
        Ok(())
    }

    /// Finish the current chunk: release its pin and trigger
    /// opportunistic eviction.
    fn finish_current(&mut self) -> Result<()> {
        if self.current.take().is_some() {
            let task = &self.assignment.tasks[self.task_idx];
            let filename = &self.dataset.index.chunks[task.chunk_pos].filename;
            if let Some(cache) = &self.dataset.cache {
                cache.done_with(filename)?;
            }
        }
        Ok(())
    }

    fn next_sample(&mut self) -> Result<Option<Sample>> {
        loop {
            if self.task_idx >= self.assignment.tasks.len() {
                return Ok(None);
            }
            let task = &self.assignment.tasks[self.task_idx];
            if self.item_in_task >= task.samples.len() {
                self.finish_current()?;
                self.task_idx += 1;
                self.item_in_task = 0;
                self.fill_window();
                continue;
            }

            if self.current.is_none() {
                self.load_current()?;
            }

            let task = &self.assignment.tasks[self.task_idx];
            let global_id = task.samples[self.item_in_task];
            let chunk = &self.dataset.index.chunks[task.chunk_pos];
            let intra = (global_id - chunk.first) as usize;

            let decode_start = Instant::now();
            let sample = self
                .current
                .as_ref()
                .expect("chunk loaded above")
                .item(intra, &self.dataset.schema, &self.dataset.registry)?;
            if let Some(profiler) = &mut self.profiler {
                profiler.record("decode", "decode", decode_start);
                profiler.batch_done();
            }

            self.item_in_task += 1;
            self.cursor += 1;
            self.stats.samples_yielded += 1;
            return Ok(Some(sample));
        }
    }
}

impl Iterator for StreamIter<'_> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_sample().transpose()
    }
}

impl Drop for StreamIter<'_> {
    fn drop(&mut self) {
        let _ = self.finish_current();
    }
}
