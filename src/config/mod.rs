#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Environment variable holding the API key for the OpenAI-compatible
/// endpoints. Never stored in the config file.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub openai: OpenAiConfig,
    pub index: IndexConfig,
    pub ranking: RankingConfig,
    pub reply: ReplyConfig,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub catalog: CatalogConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimension: u32,
    pub batch_size: u32,
    pub request_timeout_secs: u64,
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Namespace isolating environments (staging vs production) inside the
    /// same vector database directory. Maps to one table per namespace.
    pub namespace: String,
    pub top_k: usize,
}

/// Selection-policy thresholds. These are deliberately configuration, not
/// constants: the defaults are empirical starting points, not load-bearing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankingConfig {
    /// Similarity above which a lone top match may be recommended by itself.
    pub high_confidence: f32,
    /// Similarity below which retrieval is considered low-confidence.
    pub min_score: f32,
    /// Required separation between first and second match for a
    /// single-product recommendation.
    pub score_gap: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplyConfig {
    /// Upper bound on reply length, in words.
    pub word_budget: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Allowed cross-origin callers; `*` permits any origin.
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    pub snapshot_file: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: 1536,
            batch_size: 64,
            request_timeout_secs: 30,
            retry_attempts: 3,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            namespace: "prod".to_string(),
            top_k: 5,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            high_confidence: 0.62,
            min_score: 0.35,
            score_gap: 0.08,
        }
    }
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self { word_budget: 120 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 1800,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ortahaus.com".to_string(),
            snapshot_file: "products.json".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai: OpenAiConfig::default(),
            index: IndexConfig::default(),
            ranking: RankingConfig::default(),
            reply: ReplyConfig::default(),
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            catalog: CatalogConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be non-zero)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid request timeout: {0} (must be between 1 and 300 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid threshold {name}: {value} (must be between 0 and 1)")]
    InvalidThreshold { name: &'static str, value: f32 },
    #[error("min_score ({0}) must not exceed high_confidence ({1})")]
    ThresholdOrder(f32, f32),
    #[error("Invalid word budget: {0} (must be between 40 and 400)")]
    InvalidWordBudget(usize),
    #[error("Invalid top_k: {0} (must be between 1 and 50)")]
    InvalidTopK(usize),
    #[error("Invalid namespace: {0:?} (alphanumeric, dash and underscore only)")]
    InvalidNamespace(String),
    #[error("Invalid session TTL: {0} (must be at least 60 seconds)")]
    InvalidSessionTtl(u64),
    #[error("allowed_origins must not be empty")]
    EmptyAllowedOrigins,
    #[error("Missing API key: set the {API_KEY_ENV} environment variable")]
    MissingApiKey,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Default data directory (`config.toml`, catalog snapshot, vector store).
#[inline]
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("product-guide"))
        .ok_or(ConfigError::DirectoryError)
}

impl Config {
    /// Load configuration from `config.toml` under `data_dir`, falling back
    /// to defaults when the file does not exist yet.
    #[inline]
    pub fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: data_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = data_dir.as_ref().to_path_buf();

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.base_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.openai.validate()?;
        self.index.validate()?;
        self.ranking.validate()?;
        self.catalog.validate()?;

        if !(40..=400).contains(&self.reply.word_budget) {
            return Err(ConfigError::InvalidWordBudget(self.reply.word_budget));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }
        if self.server.allowed_origins.is_empty() {
            return Err(ConfigError::EmptyAllowedOrigins);
        }

        if self.session.ttl_secs < 60 {
            return Err(ConfigError::InvalidSessionTtl(self.session.ttl_secs));
        }

        Ok(())
    }

    /// API key for the OpenAI-compatible endpoints, from the environment.
    #[inline]
    pub fn api_key(&self) -> Result<String, ConfigError> {
        match env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(ConfigError::MissingApiKey),
        }
    }

    #[inline]
    pub fn snapshot_path(&self) -> PathBuf {
        self.base_dir.join(&self.catalog.snapshot_file)
    }

    /// Directory holding the LanceDB tables.
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.base_dir.join("vectors")
    }

    /// Sidecar recording what the index was built with (embedding model,
    /// dimension). Checked at query time against the live configuration.
    #[inline]
    pub fn manifest_path(&self) -> PathBuf {
        self.base_dir
            .join(format!("index-{}.manifest.json", self.index.namespace))
    }
}

impl OpenAiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.api_base).map_err(|_| ConfigError::InvalidUrl(self.api_base.clone()))?;

        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.chat_model.clone()));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }
        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }
        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }
        if !(1..=300).contains(&self.request_timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.request_timeout_secs));
        }
        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.api_base).map_err(|_| ConfigError::InvalidUrl(self.api_base.clone()))
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty()
            || !self
                .namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidNamespace(self.namespace.clone()));
        }
        if !(1..=50).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }
        Ok(())
    }
}

impl RankingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("high_confidence", self.high_confidence),
            ("min_score", self.min_score),
            ("score_gap", self.score_gap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        if self.min_score > self.high_confidence {
            return Err(ConfigError::ThresholdOrder(
                self.min_score,
                self.high_confidence,
            ));
        }
        Ok(())
    }
}

impl CatalogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url =
            Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }
        Ok(())
    }
}
