//! Leader-side index merge coordination
//!
//! Workers coordinate only through the store: each writes one partial
//! index under `_partials/`, and the leader (node 0) polls until all
//! `W` partials exist, merges them, publishes `index.json`, and removes
//! the partials. Other nodes poll for the published index.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use strata_core_index::{merge_partials, DatasetIndex, PartialIndex, INDEX_FILENAME, PARTIALS_PREFIX};

use crate::error::{Result, StrataError};
use crate::store::{with_retry, ObjectStore, RetryPolicy};

/// Poll interval while waiting on partials or the published index
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Wait for all `expected` partial indices, merge them, publish the
/// global index, and clean up the partials.
///
/// # Errors
///
/// `MergeTimeout` when partials are still missing after `timeout`.
pub fn wait_and_merge(
    store: &Arc<dyn ObjectStore>,
    expected: usize,
    timeout: Duration,
    retry: &RetryPolicy,
) -> Result<DatasetIndex> {
    let started = Instant::now();
    let partial_names = loop {
        let names = with_retry(retry, "list partials", || store.list(PARTIALS_PREFIX))?;
        if names.len() >= expected {
            break names;
        }
        if started.elapsed() >= timeout {
            return Err(StrataError::MergeTimeout {
                waited_secs: started.elapsed().as_secs(),
                present: names.len(),
                expected,
            });
        }
        debug!(
            present = names.len(),
            expected,
            "waiting for partial indices"
        );
        std::thread::sleep(POLL_INTERVAL);
    };

    let mut partials = Vec::with_capacity(partial_names.len());
    for name in &partial_names {
        let bytes = with_retry(retry, "get partial index", || store.get(name))?;
        partials.push(PartialIndex::from_bytes(&bytes)?);
    }

    let index = merge_partials(partials)?;
    let index_bytes = index.to_bytes()?;
    with_retry(retry, "put index", || {
        store.put(INDEX_FILENAME, &index_bytes)
    })?;

    for name in &partial_names {
        with_retry(retry, "delete partial index", || store.delete(name))?;
    }

    info!(
        chunks = index.total_chunks(),
        samples = index.total_samples,
        "published dataset index"
    );
    Ok(index)
}

/// Non-leader path: poll until the leader has published `index.json`.
pub fn wait_for_index(
    store: &Arc<dyn ObjectStore>,
    timeout: Duration,
    retry: &RetryPolicy,
) -> Result<DatasetIndex> {
    let started = Instant::now();
    loop {
        if with_retry(retry, "head index", || store.exists(INDEX_FILENAME))? {
            let bytes = with_retry(retry, "get index", || store.get(INDEX_FILENAME))?;
            return Ok(DatasetIndex::from_bytes(&bytes)?);
        }
        if started.elapsed() >= timeout {
            return Err(StrataError::MergeTimeout {
                waited_secs: started.elapsed().as_secs(),
                present: 0,
                expected: 1,
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use strata_core_index::{PartialChunk, SchemaField};

    fn partial(node: u32, worker: u32, chunks: usize) -> PartialIndex {
        let mut partial = PartialIndex::new(
            node,
            worker,
            None,
            vec![SchemaField::new("x", "int")],
            "h".to_string(),
        );
        for i in 0..chunks {
            partial.chunks.push(PartialChunk {
                local_id: i as u64,
                filename: format!("chunk-{}-{:010}.bin", node * 10 + worker, i),
                bytes: 64,
                samples: 2,
                dim: None,
            });
        }
        partial
    }

    fn put_partial(store: &Arc<dyn ObjectStore>, partial: &PartialIndex) {
        store
            .put(
                &PartialIndex::object_name(partial.node, partial.worker),
                &partial.to_bytes().unwrap(),
            )
            .unwrap();
    }

    #[test]
    fn test_merge_publishes_and_cleans_partials() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        put_partial(&store, &partial(0, 0, 2));
        put_partial(&store, &partial(0, 1, 1));

        let index = wait_and_merge(
            &store,
            2,
            Duration::from_secs(5),
            &RetryPolicy::none(),
        )
        .unwrap();

        assert_eq!(index.total_chunks(), 3);
        assert_eq!(index.total_samples, 6);
        assert!(store.exists(INDEX_FILENAME).unwrap());
        assert!(store.list(PARTIALS_PREFIX).unwrap().is_empty());
    }

    #[test]
    fn test_merge_timeout() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        put_partial(&store, &partial(0, 0, 1));

        let err = wait_and_merge(
            &store,
            2,
            Duration::from_millis(50),
            &RetryPolicy::none(),
        )
        .unwrap_err();
        match err {
            StrataError::MergeTimeout {
                present, expected, ..
            } => {
                assert_eq!(present, 1);
                assert_eq!(expected, 2);
            }
            other => panic!("expected MergeTimeout, got {}", other),
        }
    }

    #[test]
    fn test_wait_for_index_sees_published() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        put_partial(&store, &partial(0, 0, 1));
        wait_and_merge(&store, 1, Duration::from_secs(5), &RetryPolicy::none()).unwrap();

        let index =
            wait_for_index(&store, Duration::from_secs(1), &RetryPolicy::none()).unwrap();
        assert_eq!(index.total_chunks(), 1);
    }

    #[test]
    fn test_wait_for_index_times_out() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        assert!(wait_for_index(
            &store,
            Duration::from_millis(50),
            &RetryPolicy::none()
        )
        .is_err());
    }
}
