//! Configuration types for mnemo.
//!
//! `MemoryConfig` represents the top-level `config.toml` in the data
//! directory. Every field has a default so an empty or partial file is valid.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Top-level configuration for the memory engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_index: VectorIndexConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// HTTP embedding endpoint settings.
///
/// An empty `api_key` or `model` disables embeddings entirely; retrieval then
/// runs in degraded (unranked) mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_path")]
    pub path: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_base_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_embedding_path() -> String {
    "/v1/embeddings".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_embedding_timeout_secs() -> u64 {
    15
}

impl EmbeddingConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.model.trim().is_empty()
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            path: default_embedding_path(),
            api_key: String::new(),
            model: String::new(),
            dimensions: default_embedding_dimensions(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

/// Similarity metric used by the vector index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    L2,
    #[serde(rename = "ip")]
    InnerProduct,
    #[default]
    Cosine,
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::L2 => write!(f, "l2"),
            DistanceMetric::InnerProduct => write!(f, "ip"),
            DistanceMetric::Cosine => write!(f, "cosine"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "l2" => Ok(DistanceMetric::L2),
            "ip" => Ok(DistanceMetric::InnerProduct),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(format!("invalid distance metric: '{other}'")),
        }
    }
}

// Unknown metric names fall back to cosine rather than rejecting the file.
impl<'de> Deserialize<'de> for DistanceMetric {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Index directory. Relative paths resolve against the data directory.
    #[serde(default = "default_vector_path")]
    pub path: String,
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
    /// Vector length. 0 means infer from the first vector written.
    #[serde(default)]
    pub dimension: usize,
    #[serde(default)]
    pub metric: DistanceMetric,
}

fn default_true() -> bool {
    true
}

fn default_vector_path() -> String {
    "vectors".to_string()
}

fn default_collection_name() -> String {
    "memories".to_string()
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_vector_path(),
            collection_name: default_collection_name(),
            dimension: 0,
            metric: DistanceMetric::default(),
        }
    }
}

/// Pending-turn buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Rounds that trigger an extraction handoff.
    #[serde(default = "default_extract_threshold")]
    pub extract_threshold: u32,
    /// Sliding expiry of an untouched batch.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_extract_threshold() -> u32 {
    10
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_key_prefix() -> String {
    "chat:pending:".to_string()
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            extract_threshold: default_extract_threshold(),
            retention_secs: default_retention_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Extraction model and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_llm_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

impl ExtractionConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.model.trim().is_empty()
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            model: String::new(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

/// Retrieval defaults and per-step timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
}

fn default_top_k() -> usize {
    5
}

fn default_embed_timeout_secs() -> u64 {
    15
}

fn default_search_timeout_secs() -> u64 {
    10
}

fn default_scan_timeout_secs() -> u64 {
    30
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            embed_timeout_secs: default_embed_timeout_secs(),
            search_timeout_secs: default_search_timeout_secs(),
            scan_timeout_secs: default_scan_timeout_secs(),
        }
    }
}

/// Periodic index reconciliation. An interval of 0 disables the task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub interval_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config_default_values() {
        let config = MemoryConfig::default();
        assert_eq!(config.embedding.base_url, "https://api.deepseek.com");
        assert_eq!(config.embedding.path, "/v1/embeddings");
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.embedding.timeout_secs, 15);
        assert!(!config.embedding.is_configured());
        assert_eq!(config.buffer.extract_threshold, 10);
        assert_eq!(config.buffer.retention_secs, 86_400);
        assert_eq!(config.buffer.key_prefix, "chat:pending:");
        assert_eq!(config.vector_index.collection_name, "memories");
        assert_eq!(config.vector_index.metric, DistanceMetric::Cosine);
        assert_eq!(config.retrieval.default_top_k, 5);
        assert_eq!(config.extraction.max_tokens, 2048);
        assert_eq!(config.reconcile.interval_secs, 0);
    }

    #[test]
    fn test_memory_config_deserialize_with_defaults() {
        let config: MemoryConfig = toml::from_str("").unwrap();
        assert_eq!(config.buffer.extract_threshold, 10);
        assert_eq!(config.extraction.workers, 4);
        assert!(config.vector_index.enabled);
    }

    #[test]
    fn test_memory_config_deserialize_with_values() {
        let toml_str = r#"
[embedding]
api_key = "sk-test"
model = "text-embedding-3-small"
dimensions = 768

[vector_index]
metric = "L2"
dimension = 768

[buffer]
extract_threshold = 4
"#;
        let config: MemoryConfig = toml::from_str(toml_str).unwrap();
        assert!(config.embedding.is_configured());
        assert_eq!(config.embedding.dimensions, 768);
        assert_eq!(config.embedding.timeout_secs, 15);
        assert_eq!(config.vector_index.metric, DistanceMetric::L2);
        assert_eq!(config.buffer.extract_threshold, 4);
        assert_eq!(config.buffer.retention_secs, 86_400);
    }

    #[test]
    fn test_unknown_metric_falls_back_to_cosine() {
        let config: MemoryConfig = toml::from_str("[vector_index]\nmetric = \"hamming\"\n").unwrap();
        assert_eq!(config.vector_index.metric, DistanceMetric::Cosine);
        let ip: DistanceMetric = "IP".parse().unwrap();
        assert_eq!(ip, DistanceMetric::InnerProduct);
    }
}
