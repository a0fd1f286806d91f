//! TOML configuration parsing and validation.
//!
//! Every section is optional; missing keys fall back to the defaults below,
//! so `Config::default()` is a working configuration without a file.
//!
//! ```toml
//! [storage]
//! dir = "./storage"
//! backend = "sqlite"
//!
//! [crawl]
//! default_max_depth = 3
//! default_max_pages = 100
//! politeness_delay_ms = 500
//!
//! [chunking]
//! chunk_size = 1000
//! overlap = 200
//!
//! [retrieval]
//! top_k = 4
//!
//! [model]
//! provider = "openai"
//! embedding_model = "text-embedding-3-small"
//! dims = 1536
//! chat_model = "gpt-3.5-turbo"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory holding one sub-directory per session.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    /// `"sqlite"` (per-session database file) or `"memory"`.
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            backend: default_backend(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./storage")
}
fn default_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    #[serde(default = "default_max_depth")]
    pub default_max_depth: u32,
    #[serde(default = "default_max_pages")]
    pub default_max_pages: usize,
    /// Upper bound on the `max_pages` a single request may ask for.
    #[serde(default = "default_limit_max_pages")]
    pub limit_max_pages: usize,
    #[serde(default = "default_politeness_delay_ms")]
    pub politeness_delay_ms: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub respect_robots: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            default_max_depth: default_max_depth(),
            default_max_pages: default_max_pages(),
            limit_max_pages: default_limit_max_pages(),
            politeness_delay_ms: default_politeness_delay_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            respect_robots: true,
            user_agent: default_user_agent(),
        }
    }
}

fn default_max_depth() -> u32 {
    3
}
fn default_max_pages() -> usize {
    100
}
fn default_limit_max_pages() -> usize {
    500
}
fn default_politeness_delay_ms() -> u64 {
    500
}
fn default_fetch_timeout_secs() -> u64 {
    15
}
fn default_true() -> bool {
    true
}
fn default_user_agent() -> String {
    format!("sitechat/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive windows.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    /// Most recent turns forwarded to the generator.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Rewrite follow-up questions into standalone ones before retrieval.
    #[serde(default = "default_true")]
    pub condense_question: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
            history_turns: default_history_turns(),
            condense_question: true,
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_max_context_chars() -> usize {
    6000
}
fn default_history_turns() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_model_url")]
    pub url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            embedding_model: default_embedding_model(),
            dims: default_dims(),
            chat_model: default_chat_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            url: default_model_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_chat_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    500
}
fn default_model_url() -> String {
    "https://api.openai.com/v1".to_string()
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

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionConfig {
    /// Delete sessions idle for longer than this. `0` disables expiry.
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.crawl.default_max_pages < 1 {
        anyhow::bail!("crawl.default_max_pages must be >= 1");
    }
    if config.crawl.default_max_pages > config.crawl.limit_max_pages {
        anyhow::bail!("crawl.default_max_pages must not exceed crawl.limit_max_pages");
    }

    match config.storage.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!(
            "Unknown storage backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    match config.model.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.model.is_enabled() {
        if config.model.dims == 0 {
            anyhow::bail!(
                "model.dims must be > 0 when provider is '{}'",
                config.model.provider
            );
        }
        if config.model.batch_size == 0 {
            anyhow::bail!("model.batch_size must be > 0");
        }
    }

    Ok(())
}
