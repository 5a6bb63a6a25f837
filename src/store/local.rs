//! Local filesystem store
//!
//! Backs both plain directories and network mounts (the `local:` URI
//! prefix). Writes are atomic via temp-file-and-rename, matching the
//! put semantics the rest of the engine relies on.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{ObjectMeta, ObjectStore, StoreError, StoreResult};

/// Object store over a local directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root` (created lazily on first `put`)
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        if path.split('/').any(|seg| seg == "..") {
            return Err(StoreError::InvalidConfig {
                store: "local".to_string(),
                message: format!("path escapes store root: {}", path),
            });
        }
        Ok(self.root.join(path))
    }

    fn map_not_found(&self, err: std::io::Error, path: &str) -> StoreError {
        if err.kind() == std::io::ErrorKind::NotFound {
            StoreError::not_found(path, "local")
        } else {
            StoreError::Io(err)
        }
    }
}

impl ObjectStore for LocalStore {
    fn head(&self, path: &str) -> StoreResult<ObjectMeta> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full).map_err(|e| self.map_not_found(e, path))?;
        if !meta.is_file() {
            return Err(StoreError::not_found(path, "local"));
        }
        Ok(ObjectMeta {
            size: meta.len(),
            etag: None,
        })
    }

    fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).map_err(|e| self.map_not_found(e, path))
    }

    fn get_range(&self, path: &str, range: Range<u64>) -> StoreResult<Vec<u8>> {
        let full = self.resolve(path)?;
        let mut file = File::open(&full).map_err(|e| self.map_not_found(e, path))?;
        let size = file.metadata().map_err(StoreError::Io)?.len();
        if range.end > size || range.start > range.end {
            return Err(StoreError::RangeUnsatisfiable {
                path: path.to_string(),
                start: range.start,
                end: range.end,
                size,
            });
        }
        file.seek(SeekFrom::Start(range.start))
            .map_err(StoreError::Io)?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buf).map_err(StoreError::Io)?;
        Ok(buf)
    }

    fn put(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(StoreError::Io)?;
        }
        // Atomic publish: write a sibling temp file, fsync, rename.
        let tmp = full.with_extension("put-tmp");
        let result = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp, &full)?;
            Ok(())
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io(e));
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let base = self.resolve(prefix)?;
        if !base.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in WalkDir::new(&base).follow_links(false) {
            let entry = entry.map_err(|e| StoreError::Other {
                store: "local".to_string(),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            keys.push(rel.to_string_lossy().replace('\\', "/"));
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn store_name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_is_atomic_no_temp_left() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("data/chunk.bin", &[1, 2, 3]).unwrap();

        let names: Vec<String> = WalkDir::new(dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["chunk.bin".to_string()]);
    }

    #[test]
    fn test_put_overwrites() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("x.bin", b"old").unwrap();
        store.put("x.bin", b"new!").unwrap();
        assert_eq!(store.get("x.bin").unwrap(), b"new!");
    }

    #[test]
    fn test_parent_escape_rejected() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        assert!(store.get("../outside.bin").is_err());
    }

    #[test]
    fn test_list_is_sorted_and_recursive() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("z.bin", b"1").unwrap();
        store.put("_partials/worker-0-1.json", b"1").unwrap();
        store.put("_partials/worker-0-0.json", b"1").unwrap();

        assert_eq!(
            store.list("_partials").unwrap(),
            vec![
                "_partials/worker-0-0.json".to_string(),
                "_partials/worker-0-1.json".to_string(),
            ]
        );
    }

    #[test]
    fn test_list_missing_prefix_is_empty() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        assert!(store.list("nope").unwrap().is_empty());
    }
}
