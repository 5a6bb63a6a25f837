//! Unified object store abstraction
//!
//! One capability set — `head`, `get` (with mandatory byte-range support),
//! `put`, `list`, `delete`, `presign` — over the places a dataset can
//! live: the local filesystem, a network mount (`local:` prefix, treated
//! as a filesystem but with caching disabled downstream), and cloud
//! object stores (s3/gcs/azure) behind the `cloud` feature.
//!
//! Paths are `/`-separated keys relative to the store root; a store is
//! always constructed rooted at one dataset directory. Chunks are written
//! once under id-derived names and never mutated, so concurrent safety
//! reduces to atomic `put` semantics, which every variant provides.

pub mod error;
pub mod retry;
pub mod uri;

mod local;
mod memory;

#[cfg(feature = "cloud")]
mod remote;

pub use error::{StoreError, StoreResult};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use retry::{with_retry, RetryPolicy};
pub use uri::{open_store, StoreLocation};

#[cfg(feature = "cloud")]
pub use remote::RemoteStore;

use std::ops::Range;

/// Metadata returned by `head`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object size in bytes
    pub size: u64,
    /// Backend entity tag, when the store provides one
    pub etag: Option<String>,
}

/// Uniform interface over dataset storage backends.
///
/// All operations are blocking; download parallelism is provided by the
/// prefetch pipeline's thread pool, not by the store. Implementors must
/// be `Send + Sync`.
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Get object metadata.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object doesn't exist.
    fn head(&self, path: &str) -> StoreResult<ObjectMeta>;

    /// Fetch a whole object.
    fn get(&self, path: &str) -> StoreResult<Vec<u8>>;

    /// Fetch exactly the bytes `[range.start, range.end)`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::RangeUnsatisfiable` when the range extends
    /// past the object; never returns a short read.
    fn get_range(&self, path: &str, range: Range<u64>) -> StoreResult<Vec<u8>>;

    /// Write an object atomically: a concurrent reader observes either
    /// the previous object or the complete new one.
    fn put(&self, path: &str, data: &[u8]) -> StoreResult<()>;

    /// List object keys under a prefix, sorted ascending.
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Delete an object. Deleting a missing object is not an error.
    fn delete(&self, path: &str) -> StoreResult<()>;

    /// Produce a presigned URL for an object.
    ///
    /// Optional capability; the default returns `Unsupported`.
    fn presign(&self, path: &str) -> StoreResult<String> {
        let _ = path;
        Err(StoreError::unsupported(self.store_name(), "presign"))
    }

    /// Check if an object exists.
    fn exists(&self, path: &str) -> StoreResult<bool> {
        match self.head(path) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// String identifier for this store (e.g. "local", "memory", "s3")
    fn store_name(&self) -> &str;
}
