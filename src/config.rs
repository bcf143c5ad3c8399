use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub events: EventConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_relevance_query")]
    pub relevance_query: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            relevance_query: default_relevance_query(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default = "default_classify_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_classify_batch_size(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_fast_batch_size")]
    pub fast_lane_batch_size: usize,
    #[serde(default = "default_heavy_workers")]
    pub heavy_lane_workers: usize,
    #[serde(default = "default_body_truncation")]
    pub body_truncation_chars: usize,
    #[serde(default = "default_max_inline_links")]
    pub max_inline_links: usize,
    #[serde(default = "default_document_extensions")]
    pub document_extensions: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            fast_lane_batch_size: default_fast_batch_size(),
            heavy_lane_workers: default_heavy_workers(),
            body_truncation_chars: default_body_truncation(),
            max_inline_links: default_max_inline_links(),
            document_extensions: default_document_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub directory: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            directory: default_checkpoint_dir(),
        }
    }
}

fn default_relevance_query() -> String {
    "invoice OR receipt OR bill OR statement OR \"payment due\"".to_string()
}

fn default_classify_batch_size() -> usize {
    25
}

fn default_confidence_threshold() -> f32 {
    0.3
}

fn default_fast_batch_size() -> usize {
    10
}

fn default_heavy_workers() -> usize {
    5
}

fn default_body_truncation() -> usize {
    4000
}

fn default_max_inline_links() -> usize {
    2
}

fn default_document_extensions() -> Vec<String> {
    vec![".pdf".to_string()]
}

fn default_keepalive_secs() -> u64 {
    15
}

fn default_checkpoint_dir() -> String {
    ".invoice-ingest/checkpoints".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| IngestError::ConfigError(format!("Invalid config: {}", e)))?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }
}
