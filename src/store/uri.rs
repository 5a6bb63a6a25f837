//! URI dispatch: map a dataset location string to a store implementation
//!
//! Supported forms:
//!
//! - `/path/to/dataset` or `file:///path` — local filesystem
//! - `local:/mnt/share/dataset` — network mount: local filesystem access
//!   with the chunk cache disabled (the mount already is the slow tier)
//! - `s3://bucket/prefix`, `gs://bucket/prefix`, `az://container/prefix`
//!   — cloud object stores (requires the `cloud` feature)

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Result, StrataError};

use super::{LocalStore, ObjectStore};

/// Parsed dataset location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Local directory; `no_cache` marks `local:` network mounts
    Local { root: PathBuf, no_cache: bool },
    /// Cloud object store URL (`s3://`, `gs://`, `az://`)
    Remote { url: String },
}

impl StoreLocation {
    /// Parse a location string
    pub fn parse(uri: &str) -> Result<Self> {
        if uri.is_empty() {
            return Err(StrataError::Config("empty dataset location".to_string()));
        }
        if let Some(rest) = uri.strip_prefix("local:") {
            return Ok(StoreLocation::Local {
                root: PathBuf::from(rest),
                no_cache: true,
            });
        }
        if let Some(rest) = uri.strip_prefix("file://") {
            return Ok(StoreLocation::Local {
                root: PathBuf::from(rest),
                no_cache: false,
            });
        }
        for scheme in ["s3://", "gs://", "az://"] {
            if uri.starts_with(scheme) {
                return Ok(StoreLocation::Remote {
                    url: uri.to_string(),
                });
            }
        }
        if uri.contains("://") {
            return Err(StrataError::Config(format!(
                "unsupported store scheme in '{}'",
                uri
            )));
        }
        Ok(StoreLocation::Local {
            root: PathBuf::from(uri),
            no_cache: false,
        })
    }

    /// True when the reader should bypass the local chunk cache
    pub fn cache_disabled(&self) -> bool {
        matches!(self, StoreLocation::Local { no_cache: true, .. })
    }
}

/// Open the store for a dataset location.
///
/// Returns the store plus the cache-disabled flag derived from the
/// location form.
pub fn open_store(uri: &str) -> Result<(Arc<dyn ObjectStore>, bool)> {
    let location = StoreLocation::parse(uri)?;
    let cache_disabled = location.cache_disabled();
    let store: Arc<dyn ObjectStore> = match location {
        StoreLocation::Local { root, .. } => Arc::new(LocalStore::new(root)),
        StoreLocation::Remote { url } => {
            #[cfg(feature = "cloud")]
            {
                Arc::new(super::RemoteStore::from_url(&url)?)
            }
            #[cfg(not(feature = "cloud"))]
            {
                return Err(StrataError::Config(format!(
                    "'{}' requires a cloud store; rebuild with the 'cloud' feature",
                    url
                )));
            }
        }
    };
    Ok((store, cache_disabled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_is_local() {
        let loc = StoreLocation::parse("/data/imagenet").unwrap();
        assert_eq!(
            loc,
            StoreLocation::Local {
                root: PathBuf::from("/data/imagenet"),
                no_cache: false,
            }
        );
        assert!(!loc.cache_disabled());
    }

    #[test]
    fn test_local_prefix_disables_cache() {
        let loc = StoreLocation::parse("local:/mnt/nfs/imagenet").unwrap();
        assert!(loc.cache_disabled());
        assert_eq!(
            loc,
            StoreLocation::Local {
                root: PathBuf::from("/mnt/nfs/imagenet"),
                no_cache: true,
            }
        );
    }

    #[test]
    fn test_file_url() {
        let loc = StoreLocation::parse("file:///data/ds").unwrap();
        assert!(matches!(loc, StoreLocation::Local { no_cache: false, .. }));
    }

    #[test]
    fn test_cloud_schemes_parse_as_remote() {
        for uri in ["s3://bucket/ds", "gs://bucket/ds", "az://container/ds"] {
            assert!(matches!(
                StoreLocation::parse(uri).unwrap(),
                StoreLocation::Remote { .. }
            ));
        }
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        assert!(StoreLocation::parse("ftp://host/ds").is_err());
        assert!(StoreLocation::parse("").is_err());
    }

    #[cfg(not(feature = "cloud"))]
    #[test]
    fn test_cloud_without_feature_is_config_error() {
        let err = open_store("s3://bucket/ds").unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
    }
}
