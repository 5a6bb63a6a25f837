/*!
 * Deterministic sample assignment across (node, worker, epoch)
 *
 * The assigner is a pure function of `(index, world, seed, epoch,
 * shuffle, drop_last)`: it owns no bytes and re-running it with the same
 * inputs yields byte-identical assignments, which is what makes
 * pause/resume a matter of storing `(epoch, cursor)` and fast-forwarding.
 *
 * Chunk locality is preserved by assigning whole chunks: the sample space
 * is partitioned along chunk boundaries, chunks are (optionally) permuted
 * and dealt round-robin across workers, and intra-chunk order is
 * (optionally) permuted per chunk. A worker therefore streams whole
 * chunks instead of jumping across them.
 */

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use strata_core_index::DatasetIndex;

use crate::error::{Result, StrataError};

/// The distributed read topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct World {
    pub num_nodes: u32,
    pub node_rank: u32,
    pub workers_per_node: u32,
    pub worker_id: u32,
}

impl World {
    /// Single-node, single-worker world
    pub fn single() -> Self {
        Self {
            num_nodes: 1,
            node_rank: 0,
            workers_per_node: 1,
            worker_id: 0,
        }
    }

    /// Build a world from `STRATA_NUM_NODES`, `STRATA_NODE_RANK`,
    /// `STRATA_NUM_WORKERS`, and `STRATA_WORKER_ID`; absent variables
    /// default to the single world.
    pub fn from_env() -> Result<Self> {
        fn var(name: &str, default: u32) -> Result<u32> {
            match std::env::var(name) {
                Ok(value) => value
                    .parse()
                    .map_err(|_| StrataError::Config(format!("invalid {}: '{}'", name, value))),
                Err(_) => Ok(default),
            }
        }
        let world = Self {
            num_nodes: var("STRATA_NUM_NODES", 1)?,
            node_rank: var("STRATA_NODE_RANK", 0)?,
            workers_per_node: var("STRATA_NUM_WORKERS", 1)?,
            worker_id: var("STRATA_WORKER_ID", 0)?,
        };
        world.validate()?;
        Ok(world)
    }

    /// Total workers across all nodes
    pub fn total_workers(&self) -> u32 {
        self.num_nodes * self.workers_per_node
    }

    /// This worker's global index in `[0, total_workers)`
    pub fn global_worker(&self) -> u32 {
        self.node_rank * self.workers_per_node + self.worker_id
    }

    /// Validate rank bounds
    pub fn validate(&self) -> Result<()> {
        if self.num_nodes == 0 || self.workers_per_node == 0 {
            return Err(StrataError::Assignment(
                "world must have at least one node and one worker".to_string(),
            ));
        }
        if self.node_rank >= self.num_nodes {
            return Err(StrataError::Assignment(format!(
                "node_rank {} out of range for {} nodes",
                self.node_rank, self.num_nodes
            )));
        }
        if self.worker_id >= self.workers_per_node {
            return Err(StrataError::Assignment(format!(
                "worker_id {} out of range for {} workers per node",
                self.worker_id, self.workers_per_node
            )));
        }
        Ok(())
    }
}

/// One chunk's worth of work for a worker: which chunk, and the global
/// sample ids to yield from it, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTask {
    /// Position of the chunk in the index's chunk list
    pub chunk_pos: usize,
    /// Global sample ids in consumption order
    pub samples: Vec<u64>,
}

/// The full-epoch plan for one worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerAssignment {
    pub tasks: Vec<ChunkTask>,
}

impl WorkerAssignment {
    /// Total samples this worker will yield
    pub fn len(&self) -> u64 {
        self.tasks.iter().map(|t| t.samples.len() as u64).sum()
    }

    /// True when this worker has nothing to do this epoch
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Flatten to `(chunk_pos, global sample id)` in consumption order
    pub fn iter_samples(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.tasks
            .iter()
            .flat_map(|t| t.samples.iter().map(move |&s| (t.chunk_pos, s)))
    }

    /// Truncate to the first `limit` samples, dropping emptied tasks
    fn truncate(&mut self, limit: u64) {
        let mut remaining = limit;
        let mut keep = 0;
        for task in self.tasks.iter_mut() {
            if remaining == 0 {
                break;
            }
            let take = (task.samples.len() as u64).min(remaining);
            task.samples.truncate(take as usize);
            remaining -= take;
            keep += 1;
        }
        self.tasks.truncate(keep);
    }

    /// Pad to `target` samples by wrapping around this worker's own
    /// assignment. Workers with no samples stay empty.
    fn pad_to(&mut self, target: u64) {
        let own = self.len();
        if own == 0 || own >= target {
            return;
        }
        let flat: Vec<(usize, u64)> = self.iter_samples().collect();
        let mut cursor = 0usize;
        let mut extra = target - own;
        while extra > 0 {
            let (chunk_pos, sample) = flat[cursor % flat.len()];
            // Extend the trailing task when it is the same chunk,
            // otherwise open a new task for it.
            match self.tasks.last_mut() {
                Some(task) if task.chunk_pos == chunk_pos => task.samples.push(sample),
                _ => self.tasks.push(ChunkTask {
                    chunk_pos,
                    samples: vec![sample],
                }),
            }
            cursor += 1;
            extra -= 1;
        }
    }
}

/// The epoch plan for every worker in the world
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    per_worker: Vec<WorkerAssignment>,
}

impl Assignment {
    /// Build the deterministic plan for one epoch.
    ///
    /// # Errors
    ///
    /// `Assignment` errors when the world is invalid.
    pub fn build(
        index: &DatasetIndex,
        total_workers: u32,
        epoch: u64,
        seed: u64,
        shuffle: bool,
        drop_last: bool,
    ) -> Result<Self> {
        if total_workers == 0 {
            return Err(StrataError::Assignment(
                "world has zero workers".to_string(),
            ));
        }

        // Chunk order for this epoch: ascending ids, permuted when
        // shuffling. Ties cannot arise; ids are unique and ascending.
        let mut chunk_order: Vec<usize> = (0..index.total_chunks()).collect();
        if shuffle {
            let mut rng = StdRng::seed_from_u64(mix(&[seed, epoch]));
            chunk_order.shuffle(&mut rng);
        }

        // Round-robin whole chunks across workers.
        let mut per_worker = vec![WorkerAssignment::default(); total_workers as usize];
        for (slot, &chunk_pos) in chunk_order.iter().enumerate() {
            let chunk = &index.chunks[chunk_pos];
            let mut samples: Vec<u64> = (chunk.first..=chunk.last).collect();
            if shuffle {
                let mut rng = StdRng::seed_from_u64(mix(&[seed, epoch, chunk.id]));
                samples.shuffle(&mut rng);
            }
            per_worker[slot % total_workers as usize]
                .tasks
                .push(ChunkTask { chunk_pos, samples });
        }

        if drop_last {
            let min_len = per_worker.iter().map(|w| w.len()).min().unwrap_or(0);
            for worker in &mut per_worker {
                worker.truncate(min_len);
            }
        } else {
            let max_len = per_worker.iter().map(|w| w.len()).max().unwrap_or(0);
            for worker in &mut per_worker {
                worker.pad_to(max_len);
            }
        }

        Ok(Self { per_worker })
    }

    /// Build the plan and return one worker's slice of it
    pub fn for_worker(
        index: &DatasetIndex,
        world: &World,
        epoch: u64,
        seed: u64,
        shuffle: bool,
        drop_last: bool,
    ) -> Result<WorkerAssignment> {
        world.validate()?;
        let assignment = Self::build(
            index,
            world.total_workers(),
            epoch,
            seed,
            shuffle,
            drop_last,
        )?;
        Ok(assignment.per_worker[world.global_worker() as usize].clone())
    }

    /// Number of workers in the plan
    pub fn workers(&self) -> usize {
        self.per_worker.len()
    }

    /// One worker's plan
    pub fn worker(&self, w: u32) -> &WorkerAssignment {
        &self.per_worker[w as usize]
    }
}

/// Combine integers into one 64-bit seed (splitmix64 finalizer over a
/// running accumulator). Deterministic across platforms and runs.
pub fn mix(parts: &[u64]) -> u64 {
    let mut acc = 0x9E37_79B9_7F4A_7C15u64;
    for &part in parts {
        acc = acc.wrapping_add(part).wrapping_add(0x9E37_79B9_7F4A_7C15);
        acc = splitmix(acc);
    }
    acc
}

fn splitmix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
