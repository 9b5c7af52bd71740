//! TOML configuration parsing and validation.
//!
//! Every section except `[paths]` is optional and falls back to defaults
//! tuned for a Korean legal corpus. Directories under `[paths]` default to
//! the conventional layout below `root`:
//!
//! ```text
//! root/
//! ├── data/raw/<category>/…        original documents
//! ├── data/cleaned/<category>/…    normalised text
//! ├── data/chunks/<category>/…     fixed-size chunks (embedding units)
//! ├── vectorstore/dev/current/     index.vec + metadatas.json
//! └── sessions/                    chat_<ts>.jsonl conversation logs
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name of the vector index inside `vector_dir`.
pub const INDEX_FILE: &str = "index.vec";
/// File name of the metadata list inside `vector_dir`.
pub const METADATA_FILE: &str = "metadatas.json";

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Configured base URL without a trailing slash, or the provider default.
fn provider_base_url(configured: &Option<String>, provider: &str) -> String {
    match configured.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
        _ if provider == "ollama" => OLLAMA_URL.to_string(),
        _ => OPENAI_URL.to_string(),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub raw_dir: Option<PathBuf>,
    #[serde(default)]
    pub cleaned_dir: Option<PathBuf>,
    #[serde(default)]
    pub chunks_dir: Option<PathBuf>,
    #[serde(default)]
    pub vector_dir: Option<PathBuf>,
    #[serde(default)]
    pub sessions_dir: Option<PathBuf>,
    /// Where chunks lived before the `data/` layout; consulted when
    /// resolving old metadata records.
    #[serde(default)]
    pub legacy_chunks_dir: Option<PathBuf>,
}

impl PathsConfig {
    fn under_root(&self, configured: &Option<PathBuf>, default: &[&str]) -> PathBuf {
        match configured {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.root.join(p),
            None => default.iter().fold(self.root.clone(), |acc, part| acc.join(part)),
        }
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.under_root(&self.raw_dir, &["data", "raw"])
    }

    pub fn cleaned_dir(&self) -> PathBuf {
        self.under_root(&self.cleaned_dir, &["data", "cleaned"])
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.under_root(&self.chunks_dir, &["data", "chunks"])
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.under_root(&self.vector_dir, &["vectorstore", "dev", "current"])
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.under_root(&self.sessions_dir, &["sessions"])
    }

    pub fn legacy_chunks_dir(&self) -> PathBuf {
        self.under_root(&self.legacy_chunks_dir, &["output", "chunks"])
    }

    pub fn index_path(&self) -> PathBuf {
        self.vector_dir().join(INDEX_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.vector_dir().join(METADATA_FILE)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of the `openai` or `ollama` endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Attempts per batch, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
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
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn base_url(&self) -> String {
        provider_base_url(&self.url, &self.provider)
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_attempts() -> u32 {
    5
}
fn default_retry_backoff_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            url: None,
            temperature: default_temperature(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

impl ChatConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn base_url(&self) -> String {
        provider_base_url(&self.url, &self.provider)
    }
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_chat_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Width of the initial nearest-neighbour search.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Maximum number of ranked documents handed to the prompt.
    #[serde(default = "default_max_docs")]
    pub max_docs: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    /// Weight of vector similarity: `hyb = α·sim + (1-α)·kw`.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_keyword_bonus")]
    pub keyword_bonus: f64,
    #[serde(default = "default_min_keyword_len")]
    pub min_keyword_len: usize,
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
    /// Refuse to answer when no retrieved chunk contains a query keyword.
    #[serde(default = "default_safe_mode")]
    pub safe_mode: bool,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Characters of the previous turn appended to the query embedding.
    #[serde(default = "default_hint_chars")]
    pub hint_chars: usize,
    #[serde(default)]
    pub allow_general_knowledge: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: default_candidate_k(),
            max_docs: default_max_docs(),
            snippet_chars: default_snippet_chars(),
            hybrid_alpha: default_hybrid_alpha(),
            keyword_bonus: default_keyword_bonus(),
            min_keyword_len: default_min_keyword_len(),
            max_keywords: default_max_keywords(),
            safe_mode: default_safe_mode(),
            history_window: default_history_window(),
            hint_chars: default_hint_chars(),
            allow_general_knowledge: false,
        }
    }
}

fn default_candidate_k() -> usize {
    40
}
fn default_max_docs() -> usize {
    12
}
fn default_snippet_chars() -> usize {
    1600
}
fn default_hybrid_alpha() -> f64 {
    0.65
}
fn default_keyword_bonus() -> f64 {
    0.05
}
fn default_min_keyword_len() -> usize {
    2
}
fn default_max_keywords() -> usize {
    8
}
fn default_safe_mode() -> bool {
    true
}
fn default_history_window() -> usize {
    6
}
fn default_hint_chars() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// `"*"` or a comma-separated list of origins.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}
fn default_allowed_origins() -> String {
    "*".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// All-defaults configuration rooted at `root`.
    pub fn minimal(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                root: root.into(),
                raw_dir: None,
                cleaned_dir: None,
                chunks_dir: None,
                vector_dir: None,
                sessions_dir: None,
                legacy_chunks_dir: None,
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            chat: ChatConfig::default(),
            retrieval: RetrievalConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    let r = &config.retrieval;
    if r.max_docs == 0 {
        anyhow::bail!("retrieval.max_docs must be >= 1");
    }
    if r.candidate_k < r.max_docs {
        anyhow::bail!(
            "retrieval.candidate_k ({}) must be >= retrieval.max_docs ({})",
            r.candidate_k,
            r.max_docs
        );
    }
    if !(0.0..=1.0).contains(&r.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if r.keyword_bonus < 0.0 {
        anyhow::bail!("retrieval.keyword_bonus must be >= 0.0");
    }
    if r.max_keywords == 0 {
        anyhow::bail!("retrieval.max_keywords must be >= 1");
    }

    let e = &config.embedding;
    if e.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if e.max_attempts == 0 {
        anyhow::bail!("embedding.max_attempts must be >= 1");
    }
    match e.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if e.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    match config.chat.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown chat provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}
