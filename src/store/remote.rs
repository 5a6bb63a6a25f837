//! Cloud object store backends via the `object_store` crate
//!
//! One implementation covers s3, gcs, and azure: the URL scheme selects
//! the builder, and everything after the bucket becomes the store prefix.
//! Credentials come from the standard environment variables of each
//! provider (`AWS_*`, `GOOGLE_*`, `AZURE_*`).
//!
//! The `object_store` API is async; this store owns a small private tokio
//! runtime and exposes the blocking [`ObjectStore`] interface the rest of
//! the engine uses.

use std::ops::Range;
use std::sync::Arc;

use futures::TryStreamExt;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use tokio::runtime::Runtime;

use super::{ObjectMeta, ObjectStore, StoreError, StoreResult};

/// Object store over s3/gcs/azure, rooted at a bucket prefix
pub struct RemoteStore {
    store: Arc<dyn object_store::ObjectStore>,
    prefix: Option<String>,
    scheme: &'static str,
    runtime: Runtime,
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("prefix", &self.prefix)
            .field("scheme", &self.scheme)
            .finish()
    }
}

impl RemoteStore {
    /// Build a store from an `s3://bucket/prefix`, `gs://bucket/prefix`,
    /// or `az://container/prefix` URL.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on malformed URLs or missing credentials.
    pub fn from_url(url: &str) -> StoreResult<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid_config("remote", format!("missing scheme in '{}'", url)))?;
        let (bucket, prefix) = split_bucket(rest);
        if bucket.is_empty() {
            return Err(invalid_config("remote", format!("missing bucket in '{}'", url)));
        }

        let (store, scheme): (Arc<dyn object_store::ObjectStore>, &'static str) = match scheme {
            "s3" => (
                Arc::new(
                    AmazonS3Builder::from_env()
                        .with_bucket_name(bucket)
                        .build()
                        .map_err(|e| invalid_config("s3", e.to_string()))?,
                ),
                "s3",
            ),
            "gs" => (
                Arc::new(
                    GoogleCloudStorageBuilder::from_env()
                        .with_bucket_name(bucket)
                        .build()
                        .map_err(|e| invalid_config("gcs", e.to_string()))?,
                ),
                "gcs",
            ),
            "az" => (
                Arc::new(
                    MicrosoftAzureBuilder::from_env()
                        .with_container_name(bucket)
                        .build()
                        .map_err(|e| invalid_config("azure", e.to_string()))?,
                ),
                "azure",
            ),
            other => {
                return Err(invalid_config(
                    "remote",
                    format!("unsupported scheme '{}'", other),
                ))
            }
        };

        let runtime = Runtime::new().map_err(StoreError::Io)?;
        Ok(Self {
            store,
            prefix,
            scheme,
            runtime,
        })
    }

    fn object_path(&self, path: &str) -> ObjectPath {
        match &self.prefix {
            Some(prefix) => ObjectPath::from(format!("{}/{}", prefix, path)),
            None => ObjectPath::from(path),
        }
    }

    fn strip_prefix(&self, location: &ObjectPath) -> String {
        let full = location.to_string();
        match &self.prefix {
            Some(prefix) => full
                .strip_prefix(&format!("{}/", prefix))
                .unwrap_or(&full)
                .to_string(),
            None => full,
        }
    }

    fn map_err(&self, path: &str, err: object_store::Error) -> StoreError {
        match err {
            object_store::Error::NotFound { .. } => StoreError::not_found(path, self.scheme),
            other => StoreError::Network {
                message: other.to_string(),
            },
        }
    }
}

impl ObjectStore for RemoteStore {
    fn head(&self, path: &str) -> StoreResult<ObjectMeta> {
        let location = self.object_path(path);
        let meta = self
            .runtime
            .block_on(self.store.head(&location))
            .map_err(|e| self.map_err(path, e))?;
        Ok(ObjectMeta {
            size: meta.size as u64,
            etag: meta.e_tag,
        })
    }

    fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        let location = self.object_path(path);
        let bytes = self
            .runtime
            .block_on(async {
                let result = self.store.get(&location).await?;
                result.bytes().await
            })
            .map_err(|e| self.map_err(path, e))?;
        Ok(bytes.to_vec())
    }

    fn get_range(&self, path: &str, range: Range<u64>) -> StoreResult<Vec<u8>> {
        let size = self.head(path)?.size;
        if range.end > size || range.start > range.end {
            return Err(StoreError::RangeUnsatisfiable {
                path: path.to_string(),
                start: range.start,
                end: range.end,
                size,
            });
        }
        let location = self.object_path(path);
        let bytes = self
            .runtime
            .block_on(
                self.store
                    .get_range(&location, range.start as usize..range.end as usize),
            )
            .map_err(|e| self.map_err(path, e))?;
        Ok(bytes.to_vec())
    }

    fn put(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let location = self.object_path(path);
        let payload = data.to_vec();
        self.runtime
            .block_on(self.store.put(&location, payload.into()))
            .map_err(|e| self.map_err(path, e))?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let location = self.object_path(prefix);
        let metas: Vec<object_store::ObjectMeta> = self
            .runtime
            .block_on(self.store.list(Some(&location)).try_collect())
            .map_err(|e| self.map_err(prefix, e))?;
        let mut keys: Vec<String> = metas
            .iter()
            .map(|m| self.strip_prefix(&m.location))
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        let location = self.object_path(path);
        match self.runtime.block_on(self.store.delete(&location)) {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(self.map_err(path, e)),
        }
    }

    fn store_name(&self) -> &str {
        self.scheme
    }
}

fn invalid_config<S: Into<String>>(store: &str, message: S) -> StoreError {
    StoreError::InvalidConfig {
        store: store.to_string(),
        message: message.into(),
    }
}

fn split_bucket(rest: &str) -> (&str, Option<String>) {
    match rest.split_once('/') {
        Some((bucket, prefix)) if !prefix.is_empty() => {
            (bucket, Some(prefix.trim_end_matches('/').to_string()))
        }
        Some((bucket, _)) => (bucket, None),
        None => (rest, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_bucket() {
        assert_eq!(split_bucket("bucket/a/b"), ("bucket", Some("a/b".to_string())));
        assert_eq!(split_bucket("bucket/"), ("bucket", None));
        assert_eq!(split_bucket("bucket"), ("bucket", None));
    }

    #[test]
    fn test_bad_urls_rejected() {
        assert!(RemoteStore::from_url("no-scheme").is_err());
        assert!(RemoteStore::from_url("ftp://bucket/x").is_err());
        assert!(RemoteStore::from_url("s3:///x").is_err());
    }
}
