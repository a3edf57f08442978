//! # colmatch Embed
//!
//! Embedding providers and the batching layer that drives them.
//!
//! - [`EmbeddingProvider`] - the provider seam; one vector per input, in order
//! - [`OpenAiEmbedder`] - OpenAI-compatible `/embeddings` HTTP client
//! - [`HashingEmbedder`] - deterministic offline embedder
//! - [`EmbeddingBatcher`] - batching, bounded concurrency, retry, cancellation

pub mod provider;
pub mod retry;
pub mod batcher;
pub mod openai;
pub mod hashing;

pub use provider::{validate_batch, EmbeddingProvider, ProviderError};
pub use retry::RetryPolicy;
pub use batcher::{EmbedRun, EmbeddingBatcher, DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT, DEFAULT_REQUEST_TIMEOUT};
pub use openai::{OpenAiConfig, OpenAiEmbedder, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use hashing::{HashingEmbedder, DEFAULT_HASH_DIMENSION};

pub use tokio_util::sync::CancellationToken;
