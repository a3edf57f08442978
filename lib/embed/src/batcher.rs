//! Batched, bounded-concurrency embedding with retry and cancellation.
//!
//! Texts are split into batches, at most `max_concurrent` batches are in
//! flight, and results are reassembled in input order no matter which
//! batch finishes first.

use crate::provider::{validate_batch, EmbeddingProvider, ProviderError};
use crate::retry::RetryPolicy;
use colmatch_core::{EmbeddingVector, Error, Result, Stage};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Vectors for every input text, plus call accounting
#[derive(Debug, Clone)]
pub struct EmbedRun {
    pub vectors: Vec<EmbeddingVector>,
    /// Provider calls made, retries included
    pub calls: usize,
    pub dimension: usize,
}

struct BatchOutcome {
    vectors: Vec<EmbeddingVector>,
    attempts: usize,
}

#[derive(Clone)]
pub struct EmbeddingBatcher {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_concurrent: usize,
    timeout: Duration,
    retry: RetryPolicy,
    dimension: Option<usize>,
}

impl EmbeddingBatcher {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let dimension = provider.dimension();
        Self {
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            dimension,
        }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Require every vector to have this dimension
    pub fn dimension(mut self, dim: Option<usize>) -> Self {
        if dim.is_some() {
            self.dimension = dim;
        }
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Batch size after applying the provider's own limit
    pub fn effective_batch_size(&self) -> usize {
        match self.provider.max_batch_size() {
            Some(limit) => self.batch_size.min(limit.max(1)),
            None => self.batch_size,
        }
    }

    /// Embed `texts`, returning one vector per text in input order.
    ///
    /// Blank texts are not sent; they get zero vectors. `on_progress`
    /// receives `(embedded, to_embed)` after each batch.
    pub async fn embed_all<F>(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<EmbedRun>
    where
        F: FnMut(usize, usize),
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(Stage::Embedding));
        }

        let pending: Vec<usize> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, _)| i)
            .collect();
        let to_embed = pending.len();

        let batch_size = self.effective_batch_size();
        let batches: Vec<Vec<String>> = pending
            .chunks(batch_size)
            .map(|chunk| chunk.iter().map(|&i| texts[i].clone()).collect())
            .collect();

        debug!(
            provider = self.provider.name(),
            texts = to_embed,
            batches = batches.len(),
            batch_size,
            max_concurrent = self.max_concurrent,
            "embedding"
        );

        let mut results = stream::iter(
            batches
                .iter()
                .enumerate()
                .map(|(n, batch)| self.embed_batch(n, batch, cancel)),
        )
        .buffered(self.max_concurrent);

        let mut embedded: Vec<EmbeddingVector> = Vec::with_capacity(to_embed);
        let mut calls = 0usize;
        let mut dimension = self.dimension;
        on_progress(0, to_embed);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled(Stage::Embedding)),
                next = results.next() => next,
            };
            let Some(outcome) = next else { break };
            let outcome = outcome?;
            calls += outcome.attempts;

            if let Some(first) = outcome.vectors.first() {
                match dimension {
                    Some(d) if d != first.dim() => {
                        return Err(Error::MalformedEmbeddingResponse(format!(
                            "dimension changed between batches: {} then {}",
                            d,
                            first.dim()
                        )));
                    }
                    _ => dimension = Some(first.dim()),
                }
            }
            embedded.extend(outcome.vectors);
            on_progress(embedded.len(), to_embed);
        }

        if embedded.len() != to_embed {
            return Err(Error::InternalInvariant(format!(
                "embedded {} of {} texts",
                embedded.len(),
                to_embed
            )));
        }

        let dimension = dimension.unwrap_or(0);
        let mut vectors = vec![EmbeddingVector::zeros(dimension); texts.len()];
        for (slot, vector) in pending.into_iter().zip(embedded) {
            vectors[slot] = vector;
        }

        Ok(EmbedRun {
            vectors,
            calls,
            dimension,
        })
    }

    async fn embed_batch(
        &self,
        batch_no: usize,
        inputs: &[String],
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, self.provider.embed(inputs)).await {
                Ok(res) => res,
                Err(_) => Err(ProviderError::Timeout(self.timeout)),
            };
            let err = match outcome
                .and_then(|vectors| validate_batch(inputs.len(), &vectors, self.dimension).map(|_| vectors))
            {
                Ok(vectors) => {
                    return Ok(BatchOutcome {
                        vectors,
                        attempts: attempt,
                    })
                }
                Err(e) => e,
            };

            if let ProviderError::MalformedResponse(msg) = &err {
                return Err(Error::MalformedEmbeddingResponse(format!("batch {}: {}", batch_no, msg)));
            }
            if !err.is_transient() || attempt >= max_attempts {
                return Err(Error::EmbeddingService {
                    message: err.to_string(),
                    attempts: attempt,
                });
            }

            let delay = self.retry.backoff(attempt);
            warn!(
                provider = self.provider.name(),
                batch = batch_no,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "embedding batch failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled(Stage::Embedding)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Embeds "n" as [n, 1]; texts starting with "slow" take longer
    #[derive(Default)]
    struct StubProvider {
        calls: AtomicUsize,
        batches: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn embed(&self, batch: &[String]) -> std::result::Result<Vec<EmbeddingVector>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push(batch.to_vec());
            if batch.iter().any(|t| t.starts_with("slow")) {
                tokio::time::sleep(Duration::from_millis(80)).await;
            }
            Ok(batch
                .iter()
                .map(|t| {
                    let n: f32 = t.trim_start_matches("slow").parse().unwrap_or(-1.0);
                    EmbeddingVector::new(vec![n, 1.0])
                })
                .collect())
        }
    }

    /// Fails the first `failures` calls with `error`
    struct FlakyProvider {
        calls: AtomicUsize,
        failures: usize,
        error: ProviderError,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn embed(&self, batch: &[String]) -> std::result::Result<Vec<EmbeddingVector>, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(self.error.clone());
            }
            Ok(batch.iter().map(|_| EmbeddingVector::new(vec![1.0, 0.0])).collect())
        }
    }

    struct ShortProvider;

    #[async_trait]
    impl EmbeddingProvider for ShortProvider {
        fn name(&self) -> &str {
            "short"
        }

        async fn embed(&self, batch: &[String]) -> std::result::Result<Vec<EmbeddingVector>, ProviderError> {
            Ok(batch.iter().skip(1).map(|_| EmbeddingVector::new(vec![1.0])).collect())
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl EmbeddingProvider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn embed(&self, _batch: &[String]) -> std::result::Result<Vec<EmbeddingVector>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn fast_retry(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_order_preserved_across_out_of_order_batches() {
        let provider = Arc::new(StubProvider::default());
        let batcher = EmbeddingBatcher::new(provider.clone()).batch_size(2).max_concurrent(3);
        let input = texts(&["slow0", "slow1", "2", "3", "4"]);

        let run = batcher
            .embed_all(&input, &CancellationToken::new(), |_, _| {})
            .await
            .unwrap();

        let firsts: Vec<f32> = run.vectors.iter().map(|v| v.as_slice()[0]).collect();
        assert_eq!(firsts, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(run.calls, 3);
        assert_eq!(run.dimension, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_blank_texts_not_sent() {
        let provider = Arc::new(StubProvider::default());
        let batcher = EmbeddingBatcher::new(provider.clone());
        let input = texts(&["1", "  ", "3"]);

        let run = batcher
            .embed_all(&input, &CancellationToken::new(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(run.vectors.len(), 3);
        assert_eq!(run.vectors[1].as_slice(), &[0.0, 0.0]);
        assert_eq!(provider.batches.lock().unwrap()[0], texts(&["1", "3"]));
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let provider = Arc::new(StubProvider::default());
        let batcher = EmbeddingBatcher::new(provider.clone());
        let run = batcher
            .embed_all(&[], &CancellationToken::new(), |_, _| {})
            .await
            .unwrap();
        assert!(run.vectors.is_empty());
        assert_eq!(run.calls, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_progress_reports() {
        let batcher = EmbeddingBatcher::new(Arc::new(StubProvider::default())).batch_size(2);
        let mut seen = Vec::new();
        batcher
            .embed_all(&texts(&["1", "2", "3"]), &CancellationToken::new(), |done, total| {
                seen.push((done, total))
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![(0, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            failures: 2,
            error: ProviderError::RateLimited("busy".into()),
        });
        let batcher = EmbeddingBatcher::new(provider.clone()).retry(fast_retry(3));

        let run = batcher
            .embed_all(&texts(&["a"]), &CancellationToken::new(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(run.calls, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            failures: usize::MAX,
            error: ProviderError::Server { status: 503, body: "down".into() },
        });
        let batcher = EmbeddingBatcher::new(provider).retry(fast_retry(2));

        let err = batcher
            .embed_all(&texts(&["a"]), &CancellationToken::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingService { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            failures: usize::MAX,
            error: ProviderError::Auth { status: 401, body: "bad key".into() },
        });
        let batcher = EmbeddingBatcher::new(provider.clone()).retry(fast_retry(5));

        let err = batcher
            .embed_all(&texts(&["a"]), &CancellationToken::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingService { attempts: 1, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_vector_count_is_malformed() {
        let batcher = EmbeddingBatcher::new(Arc::new(ShortProvider)).retry(fast_retry(3));
        let err = batcher
            .embed_all(&texts(&["a", "b"]), &CancellationToken::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedEmbeddingResponse(_)));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let batcher = EmbeddingBatcher::new(Arc::new(HangingProvider))
            .timeout(Duration::from_millis(20))
            .retry(fast_retry(2));
        let err = batcher
            .embed_all(&texts(&["a"]), &CancellationToken::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingService { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_in_flight_calls() {
        let batcher = EmbeddingBatcher::new(Arc::new(HangingProvider));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = batcher
            .embed_all(&texts(&["a", "b"]), &token, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(Stage::Embedding)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_provider_batch_limit_respected() {
        struct Limited(StubProvider);

        #[async_trait]
        impl EmbeddingProvider for Limited {
            fn name(&self) -> &str {
                "limited"
            }
            fn max_batch_size(&self) -> Option<usize> {
                Some(1)
            }
            async fn embed(&self, batch: &[String]) -> std::result::Result<Vec<EmbeddingVector>, ProviderError> {
                assert_eq!(batch.len(), 1);
                self.0.embed(batch).await
            }
        }

        let batcher = EmbeddingBatcher::new(Arc::new(Limited(StubProvider::default()))).batch_size(50);
        assert_eq!(batcher.effective_batch_size(), 1);
        let run = batcher
            .embed_all(&texts(&["1", "2"]), &CancellationToken::new(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(run.calls, 2);
    }
}
