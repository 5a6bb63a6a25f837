/*!
 * Bounded local chunk cache shared by same-machine workers
 *
 * Downloaded chunks land in one cache directory, bounded by
 * `max_cache_size` bytes. Admission is atomic (temp file, fsync,
 * rename). Concurrent downloaders of the same chunk coordinate through
 * per-chunk advisory lock files so exactly one download runs; the others
 * wait for the data file to appear. Pinned chunks (currently being read,
 * marked by per-process pin files) are never evicted; everything else is
 * evicted least-recently-used by file modification time, which is bumped
 * on every cache hit.
 */

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use tracing::{debug, warn};

use crate::error::{Result, StrataError};

/// How long a lock file may sit without its data file appearing before
/// another process may break it
const STALE_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll interval while waiting on another process's download
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Cache statistics for observability and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded on-disk chunk cache
pub struct ChunkCache {
    dir: PathBuf,
    limit: u64,
    /// In-process pin refcounts; the pin marker files make pins visible
    /// to sibling processes sharing the directory
    pins: Mutex<HashMap<String, u32>>,
    stats: Mutex<CacheStats>,
}

impl ChunkCache {
    /// Open (and create) a cache directory bounded by `limit` bytes
    pub fn new<P: AsRef<Path>>(dir: P, limit: u64) -> Result<Self> {
        if limit == 0 {
            return Err(StrataError::Config(
                "cache limit must be nonzero".to_string(),
            ));
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            limit,
            pins: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        })
    }

    /// The cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot of hit/miss/eviction counters
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().unwrap()
    }

    /// Path a cached chunk would occupy
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// True when `name` is present in the cache
    pub fn contains(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Get a chunk, downloading it via `fetch` on miss.
    ///
    /// The returned path is pinned; call [`done_with`](Self::done_with)
    /// when the chunk is no longer needed so it becomes evictable.
    pub fn get_or_fetch<F>(&self, name: &str, fetch: F) -> Result<PathBuf>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let data_path = self.path_for(name);
        let lock_path = self.dir.join(format!("{}.lock", name));

        loop {
            if data_path.is_file() {
                // Pin first, then re-check: a concurrent eviction may
                // have removed the file before the pin landed.
                self.pin(name)?;
                if !data_path.is_file() {
                    self.done_with(name)?;
                    continue;
                }
                self.touch(&data_path);
                self.stats.lock().unwrap().hits += 1;
                return Ok(data_path);
            }

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => {
                    let guard = LockGuard { path: &lock_path };
                    // Re-check: the previous holder may have finished
                    // between our existence test and lock acquisition.
                    if data_path.is_file() {
                        drop(guard);
                        continue;
                    }
                    let result = self.download_locked(name, &data_path, fetch);
                    drop(guard);
                    return result;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    self.wait_on_lock(&lock_path, &data_path)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn download_locked<F>(&self, name: &str, data_path: &Path, fetch: F) -> Result<PathBuf>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        self.stats.lock().unwrap().misses += 1;
        let bytes = fetch()?;
        self.ensure_capacity(bytes.len() as u64)?;

        // Pin before publishing so eviction never races the new chunk.
        self.pin(name)?;
        let tmp_path = self
            .dir
            .join(format!("{}.tmp-{}", name, std::process::id()));
        let write_result = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, data_path)?;
            Ok(())
        })();
        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            let _ = self.done_with(name);
            return Err(e.into());
        }
        debug!(chunk = name, bytes = bytes.len(), "admitted chunk to cache");
        Ok(data_path.to_path_buf())
    }

    fn wait_on_lock(&self, lock_path: &Path, data_path: &Path) -> Result<()> {
        loop {
            std::thread::sleep(LOCK_POLL_INTERVAL);
            if data_path.is_file() || !lock_path.exists() {
                return Ok(());
            }
            if let Ok(meta) = fs::metadata(lock_path) {
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| SystemTime::now().duration_since(m).ok())
                    .unwrap_or(Duration::ZERO);
                if age > STALE_LOCK_TIMEOUT {
                    warn!(lock = %lock_path.display(), "breaking stale cache lock");
                    let _ = fs::remove_file(lock_path);
                    return Ok(());
                }
            }
        }
    }

    /// Pin a cached chunk so eviction skips it
    pub fn pin(&self, name: &str) -> Result<()> {
        let mut pins = self.pins.lock().unwrap();
        let count = pins.entry(name.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            File::create(self.pin_path(name))?;
        }
        Ok(())
    }

    /// Declare a chunk consumed: drop one pin and, when the cache is
    /// over budget, evict immediately.
    ///
    /// After the last pin is released the chunk may be deleted at any
    /// moment, which is what lets disk-constrained streaming proceed.
    pub fn done_with(&self, name: &str) -> Result<()> {
        {
            let mut pins = self.pins.lock().unwrap();
            match pins.get_mut(name) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    return Ok(());
                }
                Some(_) => {
                    pins.remove(name);
                    let _ = fs::remove_file(self.pin_path(name));
                }
                None => return Ok(()),
            }
        }
        // Opportunistic eviction once the working set shrank.
        if self.total_bytes()? > self.limit {
            self.evict_until(self.limit)?;
        }
        Ok(())
    }

    fn pin_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.pin-{}", name, std::process::id()))
    }

    fn is_pinned(&self, name: &str) -> bool {
        // Any process's pin file counts.
        let prefix = format!("{}.pin-", name);
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries.flatten().any(|e| {
                    e.file_name()
                        .to_string_lossy()
                        .starts_with(prefix.as_str())
                })
            })
            .unwrap_or(false)
    }

    fn touch(&self, path: &Path) {
        let _ = filetime::set_file_mtime(path, FileTime::now());
    }

    /// Data files currently in the cache (no locks, pins, or temp files)
    fn data_files(&self) -> Result<Vec<(PathBuf, u64, SystemTime)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".lock") || name.contains(".pin-") || name.contains(".tmp-") {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((entry.path(), meta.len(), mtime));
        }
        Ok(files)
    }

    fn total_bytes(&self) -> Result<u64> {
        Ok(self.data_files()?.iter().map(|(_, size, _)| size).sum())
    }

    /// Make room for `incoming` bytes, evicting LRU unpinned chunks.
    ///
    /// # Errors
    ///
    /// `CacheFull` when the pinned working set alone exceeds the limit.
    fn ensure_capacity(&self, incoming: u64) -> Result<()> {
        let budget = self.limit.saturating_sub(incoming.min(self.limit));
        self.evict_until(budget)?;

        let total = self.total_bytes()?;
        if total + incoming > self.limit {
            let pinned: Vec<String> = self
                .data_files()?
                .iter()
                .filter_map(|(path, _, _)| {
                    let name = path.file_name()?.to_string_lossy().to_string();
                    self.is_pinned(&name).then_some(name)
                })
                .collect();
            return Err(StrataError::CacheFull {
                needed: incoming,
                limit: self.limit,
                pinned,
            });
        }
        Ok(())
    }

    /// Evict least-recently-used unpinned chunks until total bytes fit
    /// within `budget`
    fn evict_until(&self, budget: u64) -> Result<()> {
        let mut files = self.data_files()?;
        let mut total: u64 = files.iter().map(|(_, size, _)| size).sum();
        if total <= budget {
            return Ok(());
        }
        files.sort_by_key(|(_, _, mtime)| *mtime);

        for (path, size, _) in files {
            if total <= budget {
                break;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if self.is_pinned(&name) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    total = total.saturating_sub(size);
                    self.stats.lock().unwrap().evictions += 1;
                    debug!(chunk = %name, bytes = size, "evicted chunk");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    total = total.saturating_sub(size);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// RAII removal of a cache lock file
struct LockGuard<'a> {
    path: &'a Path,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(lock = %self.path.display(), error = %e, "failed to remove cache lock");
            }
        }
    }
}
