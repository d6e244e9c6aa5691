// src/config/mod.rs
//! Service configuration loaded from TOML (`config/router.toml` by default).
//!
//! Lookup order:
//! 1) `$ROUTER_CONFIG_PATH` (must exist)
//! 2) `config/router.toml`
//! 3) built-in defaults
//!
//! `FIN_API_URL` overrides `[data].api_url` after the file is read.

pub mod llm;

pub use llm::LlmConfig;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::dataset::{default_sources, DatasetSource};

pub const DEFAULT_CONFIG_PATH: &str = "config/router.toml";
pub const ENV_CONFIG_PATH: &str = "ROUTER_CONFIG_PATH";
pub const ENV_API_URL: &str = "FIN_API_URL";

fn default_api_url() -> Option<String> {
    Some("http://127.0.0.1:8002".to_string())
}
fn default_data_timeout_ms() -> u64 {
    5_000
}
fn default_data_connect_timeout_ms() -> u64 {
    2_000
}
fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_dimension() -> usize {
    256
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn yes() -> bool {
    true
}

/// Remote data API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Base URL of the data API; `None` or empty disables the remote tier.
    #[serde(default = "default_api_url")]
    pub api_url: Option<String>,
    #[serde(default = "default_data_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_data_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_ms: default_data_timeout_ms(),
            connect_timeout_ms: default_data_connect_timeout_ms(),
        }
    }
}

impl DataConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "hashing" (local, deterministic) | "openai" (remote `/embeddings`)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Vector size for the hashing embedder.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Defaults to `[llm].base_url` when absent.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            dimension: default_dimension(),
            model: default_embedding_model(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Fall back to deterministic keyword matching when the LLM selector fails.
    #[serde(default = "yes")]
    pub keyword_fallback: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            keyword_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default = "default_sources")]
    pub datasets: Vec<DatasetSource>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            selector: SelectorConfig::default(),
            datasets: default_sources(),
        }
    }
}

impl AppConfig {
    /// Load using env var + fallbacks (see module docs).
    pub fn load() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from(default_path);
        }
        info!("no config file found, using built-in defaults");
        let mut cfg = Self::default();
        cfg.finish()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg = Self::from_toml_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!(path = %path.display(), datasets = cfg.datasets.len(), "config loaded");
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s)?;
        cfg.finish()?;
        Ok(cfg)
    }

    fn finish(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            self.data.api_url = Some(url);
        }
        self.data.api_url = self
            .data
            .api_url
            .take()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        if self.embedding.dimension == 0 {
            self.embedding.dimension = default_dimension();
        }
        self.embedding.provider = self.embedding.provider.trim().to_lowercase();
        self.llm.normalize()?;

        let mut seen = std::collections::BTreeSet::new();
        for ds in &self.datasets {
            if !seen.insert(ds.id.as_str()) {
                anyhow::bail!("duplicate dataset id '{}'", ds.id);
            }
        }
        Ok(())
    }
}
