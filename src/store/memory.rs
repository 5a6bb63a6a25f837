//! In-memory store used as an injectable test double
//!
//! Counts every operation so tests can assert cache idempotence (a second
//! read of the same sample must not trigger a second fetch) and supports
//! scripted transient failures for retry-path coverage.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{ObjectMeta, ObjectStore, StoreError, StoreResult};

/// Operation counters captured by [`MemoryStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCounters {
    pub heads: u64,
    pub gets: u64,
    pub range_gets: u64,
    pub puts: u64,
    pub lists: u64,
    pub deletes: u64,
}

/// Thread-safe in-memory object store
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    heads: AtomicU64,
    gets: AtomicU64,
    range_gets: AtomicU64,
    puts: AtomicU64,
    lists: AtomicU64,
    deletes: AtomicU64,
    /// Remaining scripted failures; each failing fetch decrements it
    inject_failures: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `n` `get`/`get_range` calls to fail with a
    /// retriable network error
    pub fn inject_failures(&self, n: u64) {
        self.inject_failures.store(n, Ordering::SeqCst);
    }

    /// Snapshot of the operation counters
    pub fn counters(&self) -> StoreCounters {
        StoreCounters {
            heads: self.heads.load(Ordering::SeqCst),
            gets: self.gets.load(Ordering::SeqCst),
            range_gets: self.range_gets.load(Ordering::SeqCst),
            puts: self.puts.load(Ordering::SeqCst),
            lists: self.lists.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    /// Total fetch operations (whole-object plus ranged)
    pub fn fetches(&self) -> u64 {
        self.gets.load(Ordering::SeqCst) + self.range_gets.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self) -> StoreResult<()> {
        let remaining = self.inject_failures.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .inject_failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(StoreError::Network {
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn head(&self, path: &str) -> StoreResult<ObjectMeta> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.lock().unwrap();
        objects
            .get(path)
            .map(|data| ObjectMeta {
                size: data.len() as u64,
                etag: None,
            })
            .ok_or_else(|| StoreError::not_found(path, "memory"))
    }

    fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        let objects = self.objects.lock().unwrap();
        objects
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::not_found(path, "memory"))
    }

    fn get_range(&self, path: &str, range: Range<u64>) -> StoreResult<Vec<u8>> {
        self.range_gets.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(path)
            .ok_or_else(|| StoreError::not_found(path, "memory"))?;
        if range.end > data.len() as u64 || range.start > range.end {
            return Err(StoreError::RangeUnsatisfiable {
                path: path.to_string(),
                start: range.start,
                end: range.end,
                size: data.len() as u64,
            });
        }
        Ok(data[range.start as usize..range.end as usize].to_vec())
    }

    fn put(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .keys()
            .filter(|k| {
                k.starts_with(prefix)
                    && (k.len() == prefix.len()
                        || prefix.is_empty()
                        || k.as_bytes()[prefix.len()] == b'/')
            })
            .cloned()
            .collect())
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }

    fn store_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_operations() {
        let store = MemoryStore::new();
        store.put("a.bin", b"data").unwrap();
        store.get("a.bin").unwrap();
        store.get("a.bin").unwrap();
        store.get_range("a.bin", 0..2).unwrap();

        let counters = store.counters();
        assert_eq!(counters.puts, 1);
        assert_eq!(counters.gets, 2);
        assert_eq!(counters.range_gets, 1);
        assert_eq!(store.fetches(), 3);
    }

    #[test]
    fn test_injected_failures_are_transient() {
        let store = MemoryStore::new();
        store.put("a.bin", b"data").unwrap();
        store.inject_failures(2);

        let first = store.get("a.bin");
        assert!(first.as_ref().is_err_and(|e| e.is_retriable()));
        assert!(store.get("a.bin").is_err());
        assert_eq!(store.get("a.bin").unwrap(), b"data");
    }

    #[test]
    fn test_list_respects_key_boundaries() {
        let store = MemoryStore::new();
        store.put("_partials/worker-0-0.json", b"x").unwrap();
        store.put("_partials_backup/old.json", b"x").unwrap();

        assert_eq!(
            store.list("_partials").unwrap(),
            vec!["_partials/worker-0-0.json".to_string()]
        );
    }
}
