/*!
 * Configuration structures and defaults for Strata
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use strata_core_format::Compression;

use crate::error::{Result, StrataError};
use crate::store::RetryPolicy;

/// Default PRNG seed for shuffling and mixing
pub const DEFAULT_SEED: u64 = 42;

/// Default local cache bound (100 GB)
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 100 * 1024 * 1024 * 1024;

/// Parse a byte count with optional `KB`/`MB`/`GB` suffix (decimal
/// digits, binary multipliers). Plain digits are raw bytes.
pub fn parse_byte_size(s: &str) -> Result<u64> {
    let trimmed = s.trim();
    let upper = trimmed.to_uppercase();
    let (digits, multiplier) = if let Some(d) = upper.strip_suffix("KB") {
        (d, 1024u64)
    } else if let Some(d) = upper.strip_suffix("MB") {
        (d, 1024 * 1024)
    } else if let Some(d) = upper.strip_suffix("GB") {
        (d, 1024 * 1024 * 1024)
    } else {
        (upper.as_str(), 1)
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| StrataError::Config(format!("invalid byte size: '{}'", s)))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| StrataError::Config(format!("byte size overflows u64: '{}'", s)))
}

/// Which item loader interprets chunk contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemLoaderSpec {
    /// One item per serialized sample (offset-table driven)
    Default,
    /// Treat each chunk as a flat token buffer of fixed-size blocks
    Tokens { block_size: u32 },
}

impl Default for ItemLoaderSpec {
    fn default() -> Self {
        Self::Default
    }
}

impl ItemLoaderSpec {
    /// Parse `default` or `tokens(<block_size>)`
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("default") {
            return Ok(Self::Default);
        }
        if let Some(rest) = trimmed.strip_prefix("tokens(") {
            if let Some(inner) = rest.strip_suffix(')') {
                let block_size: u32 = inner.trim().parse().map_err(|_| {
                    StrataError::Config(format!("invalid tokens block size: '{}'", inner))
                })?;
                if block_size == 0 {
                    return Err(StrataError::Config(
                        "tokens block size must be nonzero".to_string(),
                    ));
                }
                return Ok(Self::Tokens { block_size });
            }
        }
        Err(StrataError::Config(format!(
            "unknown item loader: '{}' (expected 'default' or 'tokens(<n>)')",
            s
        )))
    }
}

/// Configuration for the streaming reader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Dataset location: path, `local:<path>`, or cloud URL
    pub input_dir: String,

    /// Shuffle chunk and intra-chunk order per epoch
    pub shuffle: bool,

    /// Seed for all derived permutations
    pub seed: u64,

    /// Truncate every worker to the same sample count so lockstep
    /// training steps see exactly one sample per worker
    pub drop_last: bool,

    /// Local chunk cache bound in bytes
    pub max_cache_size: u64,

    /// Cache directory override (default: per-dataset dir under the
    /// system temp dir)
    pub cache_dir: Option<PathBuf>,

    /// Item loader selection
    pub item_loader: ItemLoaderSpec,

    /// When nonzero, profile the first N batches into a Chrome Trace
    /// Event file (`result.json`)
    pub profile_batches: u32,

    /// Bounded in-flight download window per worker
    pub max_prefetch_chunks: usize,

    /// Download pool size per worker
    pub download_threads: usize,

    /// Retry policy for store operations
    #[serde(skip)]
    pub retry: RetryPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            input_dir: String::new(),
            shuffle: false,
            seed: DEFAULT_SEED,
            drop_last: false,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            cache_dir: None,
            item_loader: ItemLoaderSpec::Default,
            profile_batches: 0,
            max_prefetch_chunks: 2,
            download_threads: 2,
            retry: RetryPolicy::default(),
        }
    }
}

impl StreamConfig {
    /// Config for a dataset location with defaults everywhere else
    pub fn new<S: Into<String>>(input_dir: S) -> Self {
        Self {
            input_dir: input_dir.into(),
            ..Default::default()
        }
    }

    /// Validate option consistency before any I/O
    pub fn validate(&self) -> Result<()> {
        if self.input_dir.is_empty() {
            return Err(StrataError::Config("input_dir is required".to_string()));
        }
        if self.max_cache_size == 0 {
            return Err(StrataError::Config(
                "max_cache_size must be nonzero".to_string(),
            ));
        }
        if self.max_prefetch_chunks == 0 {
            return Err(StrataError::Config(
                "max_prefetch_chunks must be nonzero".to_string(),
            ));
        }
        if self.download_threads == 0 {
            return Err(StrataError::Config(
                "download_threads must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the optimize/map engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeConfig {
    /// Output dataset location: path or cloud URL
    pub output_dir: String,

    /// Worker processes per node (0 = number of CPUs)
    pub num_workers: usize,

    /// Total nodes participating in the job
    pub num_nodes: u32,

    /// This node's rank in `[0, num_nodes)`
    pub node_rank: u32,

    /// Maximum uncompressed payload bytes per chunk
    pub chunk_bytes: Option<u64>,

    /// Maximum samples per chunk
    pub chunk_size: Option<u32>,

    /// Payload compression
    pub compression: Option<String>,

    /// Per-item retry budget for the user function
    pub retry_per_item: u32,

    /// How long the leader waits for all partial indices
    pub merge_timeout_secs: u64,

    /// Opaque machine descriptor passed through to the orchestration
    /// layer; not interpreted here
    pub machine: Option<String>,

    /// Show a progress bar for this node's items
    pub show_progress: bool,

    /// Retry policy for uploads
    #[serde(skip)]
    pub retry: RetryPolicy,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            output_dir: String::new(),
            num_workers: 0,
            num_nodes: 1,
            node_rank: 0,
            chunk_bytes: None,
            chunk_size: None,
            compression: None,
            retry_per_item: 2,
            merge_timeout_secs: 300,
            machine: None,
            show_progress: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl OptimizeConfig {
    /// Config for an output location with defaults everywhere else
    pub fn new<S: Into<String>>(output_dir: S) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    /// Resolved worker count (CPU count when unset)
    pub fn effective_workers(&self) -> usize {
        if self.num_workers > 0 {
            self.num_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Parsed compression setting
    pub fn parsed_compression(&self) -> Result<Compression> {
        match &self.compression {
            None => Ok(Compression::None),
            Some(s) => s
                .parse::<Compression>()
                .map_err(|e| StrataError::Config(e.to_string())),
        }
    }

    /// Validate option consistency before any I/O.
    ///
    /// Exactly one chunk budget must be configured; setting both is a
    /// contradiction.
    pub fn validate(&self) -> Result<()> {
        if self.output_dir.is_empty() {
            return Err(StrataError::Config("output_dir is required".to_string()));
        }
        match (self.chunk_bytes, self.chunk_size) {
            (None, None) => {
                return Err(StrataError::Config(
                    "one of chunk_bytes or chunk_size is required".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(StrataError::Config(
                    "chunk_bytes and chunk_size are contradictory; set exactly one".to_string(),
                ))
            }
            (Some(0), _) | (_, Some(0)) => {
                return Err(StrataError::Config("chunk budget must be nonzero".to_string()))
            }
            _ => {}
        }
        if self.num_nodes == 0 {
            return Err(StrataError::Config("num_nodes must be nonzero".to_string()));
        }
        if self.node_rank >= self.num_nodes {
            return Err(StrataError::Config(format!(
                "node_rank {} out of range for {} nodes",
                self.node_rank, self.num_nodes
            )));
        }
        self.parsed_compression()?;
        Ok(())
    }
}

/// Configuration file structure (loaded from TOML)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub defaults: ConfigDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigDefaults {
    pub seed: Option<u64>,
    pub max_cache_size: Option<String>,
    pub max_prefetch_chunks: Option<usize>,
    pub download_threads: Option<usize>,
    pub retry_attempts: Option<u32>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StrataError::Config(format!("Failed to read config file: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| StrataError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Load configuration with fallback priority:
    /// 1. ./strata.toml (project-specific)
    /// 2. ~/.strata/strata.toml (user defaults)
    /// 3. Built-in defaults
    pub fn load_with_fallback() -> Self {
        if let Ok(config) = Self::load(Path::new("strata.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".strata").join("strata.toml");
            if let Ok(config) = Self::load(&user_config) {
                return config;
            }
        }

        Self::default()
    }

    /// Apply this config file to a StreamConfig
    pub fn apply_to(&self, config: &mut StreamConfig) -> Result<()> {
        if let Some(seed) = self.defaults.seed {
            config.seed = seed;
        }
        if let Some(ref size) = self.defaults.max_cache_size {
            config.max_cache_size = parse_byte_size(size)?;
        }
        if let Some(prefetch) = self.defaults.max_prefetch_chunks {
            config.max_prefetch_chunks = prefetch;
        }
        if let Some(threads) = self.defaults.download_threads {
            config.download_threads = threads;
        }
        if let Some(attempts) = self.defaults.retry_attempts {
            config.retry.attempts = attempts;
        }
        Ok(())
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}
