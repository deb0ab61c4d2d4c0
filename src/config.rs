//! TOML configuration.
//!
//! Every section has defaults, so an empty file (or no file at all, see
//! [`load_or_default`]) yields a working configuration: Qdrant on
//! `localhost:6333`, collection `ojt_knowledge`, Gemini
//! `text-embedding-004` embeddings.
//!
//! The loaded [`Config`] is never mutated; components receive the pieces
//! they need at construction time.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    /// Root of the knowledge tree (`raw/` and `approved/` live under it).
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Which files under the build source count as partitions.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    /// Index lines that match no record shape as raw JSON text.
    #[serde(default = "default_true")]
    pub index_unrecognized: bool,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            include_globs: default_include_globs(),
            index_unrecognized: true,
        }
    }
}

impl KnowledgeConfig {
    /// Where `kb add` appends new records.
    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    /// Default source directory for `kb build`.
    pub fn approved_dir(&self) -> PathBuf {
        self.root.join("approved")
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("ai_knowledge")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.jsonl".to_string()]
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Name of the environment variable holding the Qdrant API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            collection: default_collection(),
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
            upsert_batch_size: default_upsert_batch_size(),
        }
    }
}

fn default_store_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "ojt_knowledge".to_string()
}
fn default_upsert_batch_size() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for self-hosted backends (Ollama).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

const PROVIDERS: &[&str] = &["gemini", "openai", "ollama", "local", "hash", "disabled"];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to built-in defaults.
///
/// Only used for the default config location; an explicitly passed path
/// that does not exist is an error.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        let config = Config::default();
        validate(&config)?;
        Ok(config)
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Store
    if config.store.collection.trim().is_empty() {
        bail!("store.collection must not be empty");
    }
    if !(config.store.url.starts_with("http://") || config.store.url.starts_with("https://")) {
        bail!(
            "store.url must start with http:// or https:// (got '{}')",
            config.store.url
        );
    }
    if config.store.upsert_batch_size == 0 {
        bail!("store.upsert_batch_size must be >= 1");
    }

    // Retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    // Embedding
    if !PROVIDERS.contains(&config.embedding.provider.as_str()) {
        bail!(
            "Unknown embedding provider: '{}'. Must be one of: {}.",
            config.embedding.provider,
            PROVIDERS.join(", ")
        );
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }

    // Knowledge
    if config.knowledge.include_globs.is_empty() {
        bail!("knowledge.include_globs must not be empty");
    }

    Ok(())
}
