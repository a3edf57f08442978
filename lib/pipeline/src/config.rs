//! Run configuration
//!
//! Loaded from JSON and/or built by the CLI, then validated once before a
//! run starts.

use colmatch_core::{AssignmentStrategy, ColumnSelection, Error, NormalizeOptions, Result};
use colmatch_embed::{
    EmbeddingProvider, HashingEmbedder, OpenAiConfig, OpenAiEmbedder, RetryPolicy, DEFAULT_BASE_URL,
    DEFAULT_BATCH_SIZE, DEFAULT_HASH_DIMENSION, DEFAULT_MAX_CONCURRENT, DEFAULT_MODEL,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Which embedding backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Hash,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => f.write_str("openai"),
            ProviderKind::Hash => f.write_str("hash"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "hash" | "hashing" => Ok(ProviderKind::Hash),
            other => Err(Error::InvalidConfig(format!("unknown embedding provider '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: String,
    /// Requested vector dimension; the hashing provider defaults to 256
    pub dimensions: Option<usize>,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
    /// Never read from or written to config files
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            dimensions: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT,
            timeout_secs: 30,
            retry: RetryPolicy::default(),
            api_key: None,
        }
    }
}

impl EmbeddingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Construct the configured provider
    pub fn build_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        match self.provider {
            ProviderKind::Hash => Ok(Arc::new(HashingEmbedder::new(
                self.dimensions.unwrap_or(DEFAULT_HASH_DIMENSION),
            ))),
            ProviderKind::OpenAi => {
                let api_key = self
                    .api_key
                    .clone()
                    .ok_or_else(|| Error::InvalidConfig("OPENAI_API_KEY is not set".to_string()))?;
                let embedder = OpenAiEmbedder::new(OpenAiConfig {
                    api_key,
                    base_url: self.base_url.clone(),
                    model: self.model.clone(),
                    dimensions: self.dimensions,
                    timeout: self.timeout(),
                })?;
                Ok(Arc::new(embedder))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be at least 1".to_string()));
        }
        if self.max_concurrent_batches == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_batches must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::InvalidConfig("timeout_secs must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidConfig("retry.max_attempts must be at least 1".to_string()));
        }
        if self.dimensions == Some(0) {
            return Err(Error::InvalidConfig("dimensions must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Everything a run needs besides the input bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Minimum cosine similarity for a fuzzy match, inclusive
    pub threshold: f32,
    #[serde(default)]
    pub strategy: AssignmentStrategy,
    #[serde(default)]
    pub columns: ColumnSelection,
    #[serde(default)]
    pub normalize: NormalizeOptions,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    /// Matrix rows per scoring block
    #[serde(default = "default_block_rows")]
    pub score_block_rows: usize,
}

fn default_block_rows() -> usize {
    colmatch_core::score::DEFAULT_BLOCK_ROWS
}

impl MatchConfig {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            strategy: AssignmentStrategy::default(),
            columns: ColumnSelection::default(),
            normalize: NormalizeOptions::default(),
            embedding: EmbeddingSettings::default(),
            score_block_rows: default_block_rows(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfig(format!("config: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || !(-1.0..=1.0).contains(&self.threshold) {
            return Err(Error::InvalidConfig(format!(
                "threshold must be within [-1, 1], got {}",
                self.threshold
            )));
        }
        if self.score_block_rows == 0 {
            return Err(Error::InvalidConfig("score_block_rows must be at least 1".to_string()));
        }
        self.embedding.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_required() {
        assert!(MatchConfig::from_json("{}").is_err());
        let cfg = MatchConfig::from_json(r#"{"threshold": 0.8}"#).unwrap();
        assert_eq!(cfg.threshold, 0.8);
        assert_eq!(cfg.strategy, AssignmentStrategy::Greedy);
        assert_eq!(cfg.embedding.batch_size, DEFAULT_BATCH_SIZE);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_threshold_range() {
        assert!(MatchConfig::new(1.5).validate().is_err());
        assert!(MatchConfig::new(f32::NAN).validate().is_err());
        assert!(MatchConfig::new(-1.0).validate().is_ok());
        assert!(MatchConfig::new(1.0).validate().is_ok());
    }

    #[test]
    fn test_nested_sections() {
        let cfg = MatchConfig::from_json(
            r#"{
                "threshold": 0.75,
                "strategy": "optimal",
                "columns": {"column_a": "Vendor", "swap_columns_by_count": true},
                "normalize": {"strip_common_suffixes": true},
                "embedding": {"provider": "hash", "dimensions": 64, "retry": {"max_attempts": 2}}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.strategy, AssignmentStrategy::Optimal);
        assert_eq!(cfg.columns.column_a.as_deref(), Some("Vendor"));
        assert!(cfg.columns.swap_columns_by_count);
        assert!(cfg.normalize.strip_common_suffixes);
        assert!(cfg.normalize.case_fold);
        assert_eq!(cfg.embedding.provider, ProviderKind::Hash);
        assert_eq!(cfg.embedding.retry.max_attempts, 2);
        assert_eq!(cfg.embedding.retry.base_delay_ms, 500);
    }

    #[test]
    fn test_api_key_never_serialized() {
        let mut cfg = MatchConfig::new(0.5);
        cfg.embedding.api_key = Some("sk-secret".to_string());
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut cfg = MatchConfig::new(0.5);
        cfg.embedding.batch_size = 0;
        assert!(matches!(cfg.validate().unwrap_err(), Error::InvalidConfig(_)));
    }

    #[test]
    fn test_openai_requires_key() {
        let settings = EmbeddingSettings::default();
        assert!(matches!(settings.build_provider().err().unwrap(), Error::InvalidConfig(_)));

        let hash = EmbeddingSettings {
            provider: ProviderKind::Hash,
            dimensions: Some(32),
            ..EmbeddingSettings::default()
        };
        assert_eq!(hash.build_provider().unwrap().dimension(), Some(32));
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("hash".parse::<ProviderKind>().unwrap(), ProviderKind::Hash);
        assert!("bert".parse::<ProviderKind>().is_err());
    }
}
