//! Provider boundary
//!
//! Everything that crosses from a provider into the engine is validated
//! here: one finite vector per input, all of the same dimension.

use async_trait::async_trait;
use colmatch_core::EmbeddingVector;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a single provider call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited (HTTP 429): {0}")]
    RateLimited(String),

    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("authentication failed (HTTP {status}): {body}")]
    Auth { status: u16, body: String },

    #[error("request rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Worth another attempt after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_)
                | ProviderError::Timeout(_)
                | ProviderError::RateLimited(_)
                | ProviderError::Server { .. }
        )
    }
}

/// External embedding capability.
///
/// `embed` returns one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Largest batch the provider accepts per call
    fn max_batch_size(&self) -> Option<usize> {
        None
    }

    /// Output dimension, when known before the first call
    fn dimension(&self) -> Option<usize> {
        None
    }

    async fn embed(&self, batch: &[String]) -> Result<Vec<EmbeddingVector>, ProviderError>;
}

/// Check a provider response against its request.
///
/// Returns the common dimension.
pub fn validate_batch(
    inputs: usize,
    vectors: &[EmbeddingVector],
    expected_dim: Option<usize>,
) -> Result<usize, ProviderError> {
    if vectors.len() != inputs {
        return Err(ProviderError::MalformedResponse(format!(
            "{} embeddings for {} inputs",
            vectors.len(),
            inputs
        )));
    }
    let dim = match (vectors.first(), expected_dim) {
        (Some(v), _) => v.dim(),
        (None, Some(d)) => d,
        (None, None) => 0,
    };
    if vectors.first().is_some() && dim == 0 {
        return Err(ProviderError::MalformedResponse("empty embedding vector".to_string()));
    }
    if let Some(expected) = expected_dim {
        if dim != expected {
            return Err(ProviderError::MalformedResponse(format!(
                "dimension {} does not match configured {}",
                dim, expected
            )));
        }
    }
    for (i, v) in vectors.iter().enumerate() {
        if v.dim() != dim {
            return Err(ProviderError::MalformedResponse(format!(
                "embedding {} has dimension {}, expected {}",
                i,
                v.dim(),
                dim
            )));
        }
        if !v.is_finite() {
            return Err(ProviderError::MalformedResponse(format!(
                "embedding {} contains non-finite values",
                i
            )));
        }
    }
    Ok(dim)
}
