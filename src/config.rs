//! Configuration module for the video search engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.vidsearch/settings.toml`, discovered upward from the cwd)
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `VS_` and use double underscores
//! to separate nested levels:
//! - `VS_INDEX__NPROBE=16` sets `index.nprobe`
//! - `VS_MANAGER__DELTA_CAPACITY=4096` sets `manager.delta_capacity`
//! - `VS_QUERY__MAX_K=50` sets `query.max_k`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::vector::{DEFAULT_VECTOR_DIMENSION, IvfParams, Metric, Quantization};

/// Name of the per-workspace configuration directory.
pub const CONFIG_DIR_NAME: &str = ".vidsearch";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding the record log
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Corpus and IVF index settings
    #[serde(default)]
    pub index: IndexConfig,

    /// Delta buffer and rebuild policy
    #[serde(default)]
    pub manager: ManagerConfig,

    /// Query limits and ranking
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Embedding dimension shared by every vector in the corpus
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Similarity metric: "cosine" or "l2"
    #[serde(default)]
    pub metric: Metric,

    /// Number of IVF lists
    #[serde(default = "default_nlist")]
    pub nlist: usize,

    /// Lists probed per query
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,

    /// Maximum vectors used to train centroids
    #[serde(default = "default_train_sample_size")]
    pub train_sample_size: usize,

    /// Iteration cap for k-means
    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,

    /// Seed for reproducible builds
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Inverted list encoding: "none" or "sq8"
    #[serde(default)]
    pub quantization: Quantization,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Delta buffer size that triggers a rebuild
    #[serde(default = "default_delta_capacity")]
    pub delta_capacity: usize,

    /// Tombstones per segment record that trigger a rebuild
    #[serde(default = "default_tombstone_ratio")]
    pub tombstone_ratio: f32,

    /// Minimum tombstones before the ratio is considered
    #[serde(default = "default_min_tombstones")]
    pub min_tombstones_for_compaction: usize,

    /// Pause for automatic rebuilds after a failure (milliseconds)
    #[serde(default = "default_rebuild_retry_backoff_ms")]
    pub rebuild_retry_backoff_ms: u64,

    /// Rewrite the record log after every successful rebuild
    #[serde(default = "default_true")]
    pub compact_store_on_rebuild: bool,

    /// Worker threads used to train and assign a new segment
    #[serde(default = "default_build_threads")]
    pub build_threads: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QueryConfig {
    /// Largest k a caller may request
    #[serde(default = "default_max_k")]
    pub max_k: usize,

    /// Deadline applied when the caller passes none (milliseconds)
    #[serde(default = "default_deadline_ms")]
    pub default_deadline_ms: u64,

    /// Candidate multiplier for exact re-ranking of quantized hits
    #[serde(default = "default_rerank_factor")]
    pub rerank_factor: usize,

    /// Hits scoring below this are dropped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".vidsearch/index")
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_dimension() -> usize {
    DEFAULT_VECTOR_DIMENSION
}
fn default_nlist() -> usize {
    64
}
fn default_nprobe() -> usize {
    8
}
fn default_train_sample_size() -> usize {
    16_384
}
fn default_kmeans_iterations() -> usize {
    25
}
fn default_seed() -> u64 {
    42
}
fn default_delta_capacity() -> usize {
    1024
}
fn default_tombstone_ratio() -> f32 {
    0.2
}
fn default_min_tombstones() -> usize {
    16
}
fn default_rebuild_retry_backoff_ms() -> u64 {
    30_000
}
fn default_build_threads() -> usize {
    num_cpus::get()
}
fn default_max_k() -> usize {
    100
}
fn default_deadline_ms() -> u64 {
    250
}
fn default_rerank_factor() -> usize {
    4
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            debug: false,
            index: IndexConfig::default(),
            manager: ManagerConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            metric: Metric::default(),
            nlist: default_nlist(),
            nprobe: default_nprobe(),
            train_sample_size: default_train_sample_size(),
            kmeans_iterations: default_kmeans_iterations(),
            seed: default_seed(),
            quantization: Quantization::default(),
        }
    }
}

impl IndexConfig {
    /// Build parameters for IVF segments.
    #[must_use]
    pub fn ivf_params(&self) -> IvfParams {
        IvfParams {
            nlist: self.nlist,
            nprobe: self.nprobe,
            train_sample_size: self.train_sample_size,
            kmeans_iterations: self.kmeans_iterations,
            seed: self.seed,
            quantization: self.quantization,
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            delta_capacity: default_delta_capacity(),
            tombstone_ratio: default_tombstone_ratio(),
            min_tombstones_for_compaction: default_min_tombstones(),
            rebuild_retry_backoff_ms: default_rebuild_retry_backoff_ms(),
            compact_store_on_rebuild: true,
            build_threads: default_build_threads(),
        }
    }
}

impl ManagerConfig {
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.rebuild_retry_backoff_ms)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_k: default_max_k(),
            default_deadline_ms: default_deadline_ms(),
            rerank_factor: default_rerank_factor(),
            min_score: None,
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .vidsearch directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR_NAME).join("settings.toml"));

        Self::figment(config_path).extract().map_err(Box::new)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels, single underscore stays
            .merge(Env::prefixed("VS_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the settings file by looking for a .vidsearch directory
    /// from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR_NAME);
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Check that the values describe a usable index.
    pub fn validate(&self) -> Result<(), String> {
        if self.index.dimension == 0 {
            return Err("index.dimension must be greater than zero".to_string());
        }
        if self.index.nlist == 0 || self.index.nprobe == 0 {
            return Err("index.nlist and index.nprobe must be greater than zero".to_string());
        }
        if self.manager.delta_capacity == 0 {
            return Err("manager.delta_capacity must be greater than zero".to_string());
        }
        if self.manager.build_threads == 0 {
            return Err("manager.build_threads must be greater than zero".to_string());
        }
        if self.manager.tombstone_ratio.is_nan() || self.manager.tombstone_ratio <= 0.0 {
            return Err("manager.tombstone_ratio must be positive".to_string());
        }
        if self.query.max_k == 0 || self.query.rerank_factor == 0 {
            return Err("query.max_k and query.rerank_factor must be greater than zero".to_string());
        }
        if self.query.min_score.is_some_and(|s| !s.is_finite()) {
            return Err("query.min_score must be a finite number".to_string());
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR_NAME).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&config_path, SETTINGS_TEMPLATE)?;
        Ok(config_path)
    }
}

const SETTINGS_TEMPLATE: &str = r#"# vidsearch configuration file

# Version of the configuration schema
version = 1

# Directory holding the record log (relative to the working directory)
index_path = ".vidsearch/index"

# Global debug mode
debug = false

[index]
# Embedding dimension; 512 matches CLIP ViT-B-32 image and text embeddings
dimension = 512

# "cosine" (vectors normalized on write) or "l2"
metric = "cosine"

# Number of IVF lists; capped at the corpus size
nlist = 64

# Lists probed per query; nprobe = nlist is exact search
nprobe = 8

# Vectors sampled to train centroids
train_sample_size = 16384

kmeans_iterations = 25
seed = 42

# "none" keeps full f32 vectors, "sq8" stores one byte per dimension
quantization = "none"

[manager]
# Writes buffered before a background rebuild
delta_capacity = 1024

# Rebuild once deletes reach this share of the segment
tombstone_ratio = 0.2
min_tombstones_for_compaction = 16

# Pause automatic rebuilds after a failure
rebuild_retry_backoff_ms = 30000

# Rewrite the record log without dead entries after each rebuild
compact_store_on_rebuild = true

# Threads for k-means training and list assignment (defaults to CPU count)
# build_threads = 8

[query]
max_k = 100
default_deadline_ms = 250

# Quantized candidates fetched per requested hit before exact re-ranking
rerank_factor = 4

# Drop hits scoring below this value
# min_score = 0.2
"#;
