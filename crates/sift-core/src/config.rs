//! Configuration loaded from a TOML file with `SIFT_*` env overrides.
//!
//! Invalid configuration is a startup failure: [`Config::load`] validates
//! everything (glob syntax, weights, window sizes) before any component is
//! constructed.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub chunk: ChunkConfig,
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: u64,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: f64,
    #[serde(default = "default_allow_extensions")]
    pub allow_extensions: Vec<String>,
    #[serde(default = "default_ignore_globs")]
    pub ignore_globs: Vec<String>,
}

fn default_debounce_seconds() -> u64 {
    5
}

fn default_max_file_size_mb() -> f64 {
    5.0
}

fn default_allow_extensions() -> Vec<String> {
    [
        "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "c", "h", "cpp", "hpp", "rb", "cs",
        "md", "txt", "toml", "yaml", "yml", "json",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

fn default_ignore_globs() -> Vec<String> {
    [
        "**/.git/**",
        "**/target/**",
        "**/node_modules/**",
        "**/__pycache__/**",
        "**/.venv/**",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            debounce_seconds: default_debounce_seconds(),
            max_file_size_mb: default_max_file_size_mb(),
            allow_extensions: default_allow_extensions(),
            ignore_globs: default_ignore_globs(),
        }
    }
}

impl WatchConfig {
    /// Size ceiling in bytes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn max_file_size_bytes(&self) -> u64 {
        (self.max_file_size_mb * 1024.0 * 1024.0) as u64
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkConfig {
    #[serde(default = "default_code_tokens")]
    pub code_tokens: usize,
    #[serde(default = "default_text_tokens")]
    pub text_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

fn default_code_tokens() -> usize {
    400
}

fn default_text_tokens() -> usize {
    300
}

fn default_overlap_tokens() -> usize {
    40
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            code_tokens: default_code_tokens(),
            text_tokens: default_text_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HybridConfig {
    #[serde(default = "default_k_vector")]
    pub k_vector: usize,
    #[serde(default = "default_k_bm25")]
    pub k_bm25: usize,
    #[serde(default = "default_k_final")]
    pub k_final: usize,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f32,
}

fn default_k_vector() -> usize {
    20
}

fn default_k_bm25() -> usize {
    20
}

fn default_k_final() -> usize {
    10
}

fn default_vector_weight() -> f32 {
    0.6
}

fn default_bm25_weight() -> f32 {
    0.4
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            k_vector: default_k_vector(),
            k_bm25: default_k_bm25(),
            k_final: default_k_final(),
            vector_weight: default_vector_weight(),
            bm25_weight: default_bm25_weight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_relevance_weight")]
    pub relevance_weight: f32,
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f32,
    #[serde(default = "default_preserve_top_n")]
    pub preserve_top_n: usize,
    #[serde(default = "default_min_chunk_tokens")]
    pub min_chunk_tokens: usize,
}

fn default_relevance_weight() -> f32 {
    0.7
}

fn default_importance_weight() -> f32 {
    0.3
}

fn default_preserve_top_n() -> usize {
    3
}

fn default_min_chunk_tokens() -> usize {
    50
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            relevance_weight: default_relevance_weight(),
            importance_weight: default_importance_weight(),
            preserve_top_n: default_preserve_top_n(),
            min_chunk_tokens: default_min_chunk_tokens(),
        }
    }
}

/// Result cache backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Memory,
    Remote,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackendKind,
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Database URL for the `remote` backend, e.g. `sqlite:///var/cache/sift-cache.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
}

fn default_cache_backend() -> CacheBackendKind {
    CacheBackendKind::Memory
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            ttl_seconds: default_cache_ttl_seconds(),
            remote_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Qdrant endpoint; `None` selects the in-memory vector store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qdrant_url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_collection() -> String {
    "sift_chunks".into()
}

fn default_database_url() -> String {
    "sqlite://sift.db?mode=rwc".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            qdrant_url: None,
            collection: default_collection(),
            database_url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible endpoint base; `None` selects the local hash embedder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embed_batch_size() -> usize {
    32
}

fn default_embedding_dim() -> usize {
    384
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: default_embedding_model(),
            batch_size: default_embed_batch_size(),
            dim: default_embedding_dim(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JobsConfig {
    /// Broker endpoint for out-of-process job execution; `None` runs all
    /// jobs in-process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_url: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed,
    /// or if any value fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SIFT_QDRANT_URL") {
            self.store.qdrant_url = Some(v);
        }
        if let Ok(v) = std::env::var("SIFT_DATABASE_URL") {
            self.store.database_url = v;
        }
        if let Ok(v) = std::env::var("SIFT_EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("SIFT_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("SIFT_BROKER_URL") {
            self.jobs.broker_url = Some(v);
        }
        if let Ok(v) = std::env::var("SIFT_CACHE_BACKEND") {
            match v.as_str() {
                "memory" => self.cache.backend = CacheBackendKind::Memory,
                "remote" => self.cache.backend = CacheBackendKind::Remote,
                other => tracing::warn!("ignoring invalid SIFT_CACHE_BACKEND value: {other}"),
            }
        }
        if let Ok(v) = std::env::var("SIFT_CACHE_TTL_SECONDS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.cache.ttl_seconds = secs;
        }
        if let Ok(v) = std::env::var("SIFT_DEBOUNCE_SECONDS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.watch.debounce_seconds = secs;
        }
    }

    /// Validate cross-field constraints. Called by [`Config::load`]; exposed
    /// for configs built in code.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for pattern in &self.watch.ignore_globs {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigError::Invalid(format!("watch.ignore_globs `{pattern}`: {e}"))
            })?;
        }
        if self.watch.debounce_seconds == 0 {
            return Err(ConfigError::Invalid(
                "watch.debounce_seconds must be positive".into(),
            ));
        }
        if self.watch.max_file_size_mb <= 0.0 {
            return Err(ConfigError::Invalid(
                "watch.max_file_size_mb must be positive".into(),
            ));
        }
        if self.chunk.code_tokens == 0 || self.chunk.text_tokens == 0 {
            return Err(ConfigError::Invalid(
                "chunk token limits must be positive".into(),
            ));
        }
        if self.chunk.overlap_tokens >= self.chunk.code_tokens.min(self.chunk.text_tokens) {
            return Err(ConfigError::Invalid(
                "chunk.overlap_tokens must be smaller than both token limits".into(),
            ));
        }
        if self.hybrid.k_final == 0 {
            return Err(ConfigError::Invalid("hybrid.k_final must be positive".into()));
        }
        if self.hybrid.vector_weight < 0.0
            || self.hybrid.bm25_weight < 0.0
            || self.hybrid.vector_weight + self.hybrid.bm25_weight <= 0.0
        {
            return Err(ConfigError::Invalid(
                "hybrid weights must be non-negative and sum above zero".into(),
            ));
        }
        if self.optimizer.relevance_weight < 0.0 || self.optimizer.importance_weight < 0.0 {
            return Err(ConfigError::Invalid(
                "optimizer weights must be non-negative".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding.batch_size must be positive".into(),
            ));
        }
        if self.cache.backend == CacheBackendKind::Remote && self.cache.remote_url.is_none() {
            return Err(ConfigError::Invalid(
                "cache.remote_url is required when cache.backend = \"remote\"".into(),
            ));
        }
        Ok(())
    }
}
