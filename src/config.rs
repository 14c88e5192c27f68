use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::adapters::openrouter;
use crate::retry::RetryPolicy;
use crate::sources::{hkex, hkma, sec, sfc};

pub const DEFAULT_CONFIG_PATH: &str = ".compliance-news/config.yml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ingest: IngestConfig,
    pub summarizer: SummarizerConfig,
    pub storage: StorageConfig,
    pub sources: SourcesConfig,
}

/// Ingestion run defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Summarizer calls in flight per ingestion call
    pub max_concurrency: usize,
    pub default_actor: String,
    pub llm_enabled: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            default_actor: "system".to_string(),
            llm_enabled: true,
        }
    }
}

/// Summarizer endpoint and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub base_url: String,
    pub model: String,
    pub max_summary_chars: Option<usize>,
    pub max_input_chars: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub system_prompt: Option<String>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            base_url: openrouter::DEFAULT_BASE_URL.to_string(),
            model: openrouter::DEFAULT_MODEL.to_string(),
            max_summary_chars: None,
            max_input_chars: 12_000,
            timeout_secs: 60,
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Json,
    Postgres,
}

/// Where records are kept
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the JSON backend
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            path: PathBuf::from(".compliance-news/store"),
            max_connections: 5,
        }
    }
}

/// Publisher endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub sfc: SfcConfig,
    pub hkma: HkmaConfig,
    pub hkex: HkexConfig,
    pub sec: SecConfig,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            sfc: SfcConfig::default(),
            hkma: HkmaConfig::default(),
            hkex: HkexConfig::default(),
            sec: SecConfig::default(),
            user_agent: concat!("compliance-news/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfcConfig {
    pub base_url: String,
    pub lang: String,
    pub page_size: u32,
}

impl Default for SfcConfig {
    fn default() -> Self {
        Self {
            base_url: sfc::DEFAULT_BASE_URL.to_string(),
            lang: "TC".to_string(),
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HkmaConfig {
    pub base_url: String,
    pub lang: String,
}

impl Default for HkmaConfig {
    fn default() -> Self {
        Self {
            base_url: hkma::DEFAULT_BASE_URL.to_string(),
            lang: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HkexConfig {
    pub listing_url: String,
}

impl Default for HkexConfig {
    fn default() -> Self {
        Self {
            listing_url: hkex::DEFAULT_LISTING_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecConfig {
    pub feed_url: String,
}

impl Default for SecConfig {
    fn default() -> Self {
        Self {
            feed_url: sec::DEFAULT_FEED_URL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!(path = %path.display(), "Loaded configuration");

        Ok(config)
    }

    /// Load configuration from the default location (.compliance-news/config.yml)
    pub fn load_default() -> Result<Self> {
        Self::load(DEFAULT_CONFIG_PATH)
    }

    /// Retry policy for summarizer calls
    pub fn retry_policy(&self) -> RetryPolicy {
        let s = &self.summarizer;
        RetryPolicy {
            max_retries: s.max_retries,
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms.max(s.base_delay_ms)),
            timeout: Duration::from_secs(s.timeout_secs.max(1)),
            ..RetryPolicy::default()
        }
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.sources.timeout_secs.max(1))
    }
}
