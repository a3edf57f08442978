//! OpenAI-compatible embeddings client.

use crate::provider::{EmbeddingProvider, ProviderError};
use async_trait::async_trait;
use colmatch_core::{EmbeddingVector, Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";
/// The embeddings endpoint rejects larger `input` arrays
pub const MAX_INPUTS_PER_REQUEST: usize = 2048;

/// Connection settings for [`OpenAiEmbedder`]
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Requested output dimension (text-embedding-3 models only)
    pub dimensions: Option<usize>,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dimensions: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Async client for `POST {base_url}/embeddings`
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::InvalidConfig("missing OpenAI API key".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(Error::InvalidConfig("missing embedding model name".to_string()));
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim()))
            .map_err(|_| Error::InvalidConfig("API key contains invalid header characters".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model,
            dimensions: config.dimensions,
            timeout: config.timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify_status(status: StatusCode, body: String) -> ProviderError {
        let code = status.as_u16();
        match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth { status: code, body },
            StatusCode::REQUEST_TIMEOUT => ProviderError::Server { status: code, body },
            s if s.is_server_error() => ProviderError::Server { status: code, body },
            _ => ProviderError::Rejected { status: code, body },
        }
    }

    fn classify_transport(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn max_batch_size(&self) -> Option<usize> {
        Some(MAX_INPUTS_PER_REQUEST)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimensions
    }

    async fn embed(&self, batch: &[String]) -> std::result::Result<Vec<EmbeddingVector>, ProviderError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: batch,
            dimensions: self.dimensions,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify_transport(e))?;
        if !status.is_success() {
            return Err(Self::classify_status(status, body));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::MalformedResponse(format!("unparseable body: {}", e)))?;
        parsed.into_ordered(batch.len())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl EmbeddingResponse {
    /// Reorder by `index`; every index in 0..expected must appear once
    fn into_ordered(self, expected: usize) -> std::result::Result<Vec<EmbeddingVector>, ProviderError> {
        if self.data.len() != expected {
            return Err(ProviderError::MalformedResponse(format!(
                "{} embeddings for {} inputs",
                self.data.len(),
                expected
            )));
        }
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
        for entry in self.data {
            let slot = slots.get_mut(entry.index).ok_or_else(|| {
                ProviderError::MalformedResponse(format!("index {} out of range", entry.index))
            })?;
            if slot.replace(entry.embedding).is_some() {
                return Err(ProviderError::MalformedResponse(format!(
                    "index {} returned twice",
                    entry.index
                )));
            }
        }
        Ok(slots
            .into_iter()
            .map(|s| EmbeddingVector::new(s.unwrap_or_default()))
            .collect())
    }
}
