//! Pipeline orchestration
//!
//! Loader -> exact matcher -> embedding -> scorer -> resolver -> writer, with
//! cancellation checked at every stage boundary and progress reported
//! through a caller-supplied sink.

use crate::config::MatchConfig;
use colmatch_core::{
    exact_match, load_table, merge_records, verify_coverage, write_csv, Assignment, AssignmentResolver, EmbeddingVector,
    Error, MatchRecord, MatchType, MonotonicProgress, ProgressEvent, ProgressSink, Result, Row, RowId,
    SimilarityMatrix, SimilarityScorer, Stage,
};
use colmatch_embed::{EmbeddingBatcher, EmbeddingProvider};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A failed run: the error plus the stage it was raised in
#[derive(Error, Debug)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }

    pub fn into_inner(self) -> Error {
        self.source
    }
}

/// Record counts for a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    pub exact: usize,
    pub fuzzy: usize,
    pub unmatched_a: usize,
    pub unmatched_b: usize,
    /// Non-blank strings sent to the provider
    pub embedded: usize,
    /// Provider calls, retries included
    pub provider_calls: usize,
    pub columns_swapped: bool,
}

impl MatchSummary {
    fn tally(records: &[MatchRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            match record.match_type {
                MatchType::Exact => summary.exact += 1,
                MatchType::Fuzzy => summary.fuzzy += 1,
                MatchType::Unmatched if record.a.is_some() => summary.unmatched_a += 1,
                MatchType::Unmatched => summary.unmatched_b += 1,
            }
        }
        summary
    }
}

/// Everything a successful run produces
#[derive(Debug, Clone)]
pub struct MatchOutput {
    pub records: Vec<MatchRecord>,
    /// Serialized result table
    pub csv: Vec<u8>,
    pub header_a: String,
    pub header_b: String,
    pub summary: MatchSummary,
}

/// Progress sink backed by an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

pub struct MatchPipeline {
    config: MatchConfig,
    batcher: EmbeddingBatcher,
}

impl MatchPipeline {
    /// Validate `config` and pair it with an explicit provider
    pub fn new(config: MatchConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate()?;
        let settings = &config.embedding;
        let batcher = EmbeddingBatcher::new(provider)
            .batch_size(settings.batch_size)
            .max_concurrent(settings.max_concurrent_batches)
            .timeout(settings.timeout())
            .retry(settings.retry)
            .dimension(settings.dimensions);
        Ok(Self { config, batcher })
    }

    /// Validate `config` and build the provider it names
    pub fn from_config(config: MatchConfig) -> Result<Self> {
        config.validate()?;
        let provider = config.embedding.build_provider()?;
        Self::new(config, provider)
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &str {
        self.batcher.provider_name()
    }

    /// Match the two columns of `input`.
    ///
    /// On failure an `error` event is emitted before returning; no partial
    /// output is ever produced.
    pub async fn run(
        &self,
        input: &[u8],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> std::result::Result<MatchOutput, PipelineError> {
        let progress = MonotonicProgress::new(progress);
        let mut stage = Stage::Parsing;

        match self.execute(input, &progress, cancel, &mut stage).await {
            Ok(output) => Ok(output),
            Err(source) => {
                if source.is_cancelled() {
                    info!(stage = %stage, "run cancelled");
                } else {
                    error!(stage = %stage, kind = source.kind(), error = %source, "run failed");
                }
                progress.report(Stage::Error, format!("{} failed: {}", stage, source), None);
                Err(PipelineError { stage, source })
            }
        }
    }

    async fn execute(
        &self,
        input: &[u8],
        progress: &MonotonicProgress<'_>,
        cancel: &CancellationToken,
        stage: &mut Stage,
    ) -> Result<MatchOutput> {
        let config = &self.config;

        enter(stage, Stage::Parsing, cancel)?;
        progress.report(Stage::Parsing, "reading input table", Some(0));
        let table = load_table(input, &config.columns, &config.normalize)?;
        info!(
            rows = table.data_rows,
            a = table.a.len(),
            b = table.b.len(),
            swapped = table.columns_swapped,
            "parsed input"
        );
        let expected: Vec<RowId> = table.a.iter().chain(table.b.iter()).map(Row::id).collect();
        let header_a = table.header_a;
        let header_b = table.header_b;
        let columns_swapped = table.columns_swapped;

        enter(stage, Stage::ExactMatching, cancel)?;
        progress.report(Stage::ExactMatching, "matching identical values", Some(10));
        let exact = exact_match(table.a, table.b, &config.normalize);
        info!(
            exact = exact.matches.len(),
            remaining_a = exact.remainder_a.len(),
            remaining_b = exact.remainder_b.len(),
            "exact matching done"
        );

        enter(stage, Stage::Embedding, cancel)?;
        let m = exact.remainder_a.len();
        let n = exact.remainder_b.len();
        let mut embedded = 0;
        let mut provider_calls = 0;

        let matrix = if m == 0 || n == 0 {
            progress.report(Stage::Embedding, "nothing left to embed", Some(20));
            SimilarityMatrix::from_vec(m, n, Vec::new())?
        } else {
            let texts: Vec<String> = exact
                .remainder_a
                .iter()
                .chain(exact.remainder_b.iter())
                .map(|row| row.value.clone())
                .collect();
            progress.report(
                Stage::Embedding,
                format!("embedding {} values with {}", texts.len(), self.batcher.provider_name()),
                Some(20),
            );
            let run = self
                .batcher
                .embed_all(&texts, cancel, |done, total| {
                    let pct = 20 + done * 40 / total.max(1);
                    progress.report(
                        Stage::Embedding,
                        format!("embedded {}/{}", done, total),
                        Some(pct as u8),
                    );
                })
                .await?;
            embedded = texts.iter().filter(|t| !t.trim().is_empty()).count();
            provider_calls = run.calls;
            info!(embedded, calls = run.calls, dimension = run.dimension, "embedding done");

            let mut vectors_a = run.vectors;
            let vectors_b = vectors_a.split_off(m);

            enter(stage, Stage::Scoring, cancel)?;
            progress.report(Stage::Scoring, format!("scoring {}x{} pairs", m, n), Some(60));
            self.score(vectors_a, vectors_b, progress, cancel).await?
        };

        enter(stage, Stage::Assigning, cancel)?;
        progress.report(
            Stage::Assigning,
            format!("assigning with {} strategy", config.strategy),
            Some(80),
        );
        let ordinals_a: Vec<usize> = exact.remainder_a.iter().map(|r| r.ordinal).collect();
        let ordinals_b: Vec<usize> = exact.remainder_b.iter().map(|r| r.ordinal).collect();
        let assignment = self.assign(matrix, ordinals_a, ordinals_b, cancel).await?;
        debug!(fuzzy = assignment.pairs.len(), "assignment resolved");

        enter(stage, Stage::WritingOutput, cancel)?;
        progress.report(Stage::WritingOutput, "writing result table", Some(90));
        let records = merge_records(exact.matches, exact.remainder_a, exact.remainder_b, &assignment)?;
        verify_coverage(&records, expected)?;
        let csv = write_csv(&records, &header_a, &header_b)?;

        let summary = MatchSummary {
            embedded,
            provider_calls,
            columns_swapped,
            ..MatchSummary::tally(&records)
        };
        *stage = Stage::Done;
        progress.report(
            Stage::Done,
            format!(
                "{} exact, {} fuzzy, {} unmatched",
                summary.exact,
                summary.fuzzy,
                summary.unmatched_a + summary.unmatched_b
            ),
            Some(100),
        );

        Ok(MatchOutput {
            records,
            csv,
            header_a,
            header_b,
            summary,
        })
    }

    /// Run the scorer on the blocking pool, forwarding block progress
    async fn score(
        &self,
        a: Vec<EmbeddingVector>,
        b: Vec<EmbeddingVector>,
        progress: &MonotonicProgress<'_>,
        cancel: &CancellationToken,
    ) -> Result<SimilarityMatrix> {
        let scorer = SimilarityScorer::new().block_rows(self.config.score_block_rows);
        let token = cancel.clone();
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, usize)>();

        let mut task = tokio::task::spawn_blocking(move || {
            scorer.score_with(
                &a,
                &b,
                || token.is_cancelled(),
                |done, total| {
                    let _ = tx.send((done, total));
                },
            )
        });

        loop {
            tokio::select! {
                joined = &mut task => {
                    let matrix = joined
                        .map_err(|e| Error::InternalInvariant(format!("scoring task failed: {}", e)))??;
                    return Ok(matrix);
                }
                Some((done, total)) = rx.recv() => {
                    let pct = 60 + done * 20 / total.max(1);
                    progress.report(Stage::Scoring, format!("scored {}/{} rows", done, total), Some(pct as u8));
                }
            }
        }
    }

    /// Run the resolver on the blocking pool; the token is its stop check
    async fn assign(
        &self,
        matrix: SimilarityMatrix,
        ordinals_a: Vec<usize>,
        ordinals_b: Vec<usize>,
        cancel: &CancellationToken,
    ) -> Result<Assignment> {
        let resolver = AssignmentResolver::new(self.config.threshold).strategy(self.config.strategy);
        let token = cancel.clone();

        tokio::task::spawn_blocking(move || {
            resolver.resolve_with(&matrix, &ordinals_a, &ordinals_b, || token.is_cancelled())
        })
        .await
        .map_err(|e| Error::InternalInvariant(format!("assignment task failed: {}", e)))?
    }
}

fn enter(stage: &mut Stage, next: Stage, cancel: &CancellationToken) -> Result<()> {
    *stage = next;
    if cancel.is_cancelled() {
        return Err(Error::Cancelled(next));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use async_trait::async_trait;
    use colmatch_core::NoopProgress;
    use colmatch_embed::{ProviderError, RetryPolicy};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns a fixed vector per known text, zeros otherwise
    struct LookupProvider {
        vectors: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl LookupProvider {
        fn new(entries: &[(&str, [f32; 2])]) -> Arc<Self> {
            Arc::new(Self {
                vectors: entries.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LookupProvider {
        fn name(&self) -> &str {
            "lookup"
        }

        async fn embed(&self, batch: &[String]) -> std::result::Result<Vec<EmbeddingVector>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(batch
                .iter()
                .map(|t| EmbeddingVector::new(self.vectors.get(t).cloned().unwrap_or_else(|| vec![0.0, 0.0])))
                .collect())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn embed(&self, _batch: &[String]) -> std::result::Result<Vec<EmbeddingVector>, ProviderError> {
            Err(ProviderError::Server { status: 503, body: "unavailable".into() })
        }
    }

    fn config(threshold: f32) -> MatchConfig {
        let mut cfg = MatchConfig::new(threshold);
        cfg.embedding.retry = RetryPolicy { max_attempts: 2, base_delay_ms: 1, max_delay_ms: 1 };
        cfg
    }

    fn recorder() -> (Arc<Mutex<Vec<ProgressEvent>>>, impl Fn(ProgressEvent) + Send + Sync) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let events = events.clone();
            move |e: ProgressEvent| events.lock().unwrap().push(e)
        };
        (events, sink)
    }

    #[tokio::test]
    async fn test_exact_and_unmatched_scenario() {
        let provider = LookupProvider::new(&[("Beta LLC", [1.0, 0.0]), ("Gamma Co", [0.0, 1.0])]);
        let pipeline = MatchPipeline::new(config(0.9), provider.clone()).unwrap();
        let input = b"vendor,ledger\nAcme Inc,acme inc\nBeta LLC,Gamma Co\n";

        let (events, sink) = recorder();
        let output = pipeline.run(input, &sink, &CancellationToken::new()).await.unwrap();

        let csv = String::from_utf8(output.csv).unwrap();
        assert_eq!(
            csv,
            "vendor,ledger,match_type,score\n\
             Acme Inc,acme inc,exact,\n\
             Beta LLC,,unmatched,\n\
             ,Gamma Co,unmatched,\n"
        );
        assert_eq!(output.summary.exact, 1);
        assert_eq!(output.summary.unmatched_a, 1);
        assert_eq!(output.summary.unmatched_b, 1);
        assert_eq!(output.summary.embedded, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let events = events.lock().unwrap();
        assert!(events.windows(2).all(|w| w[0].stage <= w[1].stage));
        assert_eq!(events.last().unwrap().stage, Stage::Done);
    }

    #[tokio::test]
    async fn test_fuzzy_match_above_threshold() {
        let provider = LookupProvider::new(&[("Beta LLC", [1.0, 0.0]), ("Beta Limited", [0.96, 0.28])]);
        let pipeline = MatchPipeline::new(config(0.9), provider).unwrap();
        let input = b"a,b\nBeta LLC,Beta Limited\n";

        let output = pipeline.run(input, &NoopProgress, &CancellationToken::new()).await.unwrap();
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].match_type, MatchType::Fuzzy);
        assert!(output.records[0].score.unwrap() > 0.9);
        assert_eq!(output.summary.fuzzy, 1);
    }

    #[tokio::test]
    async fn test_identical_columns_make_no_provider_calls() {
        let provider = LookupProvider::new(&[]);
        let pipeline = MatchPipeline::new(config(0.5), provider.clone()).unwrap();
        let input = b"a,b\nOne,one\nTwo,TWO\nThree, three \n";

        let output = pipeline.run(input, &NoopProgress, &CancellationToken::new()).await.unwrap();
        assert_eq!(output.summary.exact, 3);
        assert_eq!(output.summary.provider_calls, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_run() {
        let pipeline = MatchPipeline::new(config(0.5), Arc::new(FailingProvider)).unwrap();
        let input = b"a,b\nAlpha,Omega\n";

        let (events, sink) = recorder();
        let err = pipeline.run(input, &sink, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.stage, Stage::Embedding);
        assert!(matches!(err.source, Error::EmbeddingService { attempts: 2, .. }));
        assert_eq!(events.lock().unwrap().last().unwrap().stage, Stage::Error);
    }

    #[tokio::test]
    async fn test_malformed_input_fails_before_embedding() {
        let provider = LookupProvider::new(&[]);
        let pipeline = MatchPipeline::new(config(0.5), provider.clone()).unwrap();

        let err = pipeline
            .run(b"only\nx\n", &NoopProgress, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Parsing);
        assert!(matches!(err.source, Error::MalformedInput(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let pipeline = MatchPipeline::new(config(0.5), LookupProvider::new(&[])).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let (events, sink) = recorder();
        let err = pipeline.run(b"a,b\nx,y\n", &sink, &token).await.unwrap_err();
        assert!(err.is_cancelled());
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, Stage::Error);
    }

    #[tokio::test]
    async fn test_deterministic_output() {
        let mut cfg = config(0.3);
        cfg.embedding.provider = ProviderKind::Hash;
        cfg.embedding.dimensions = Some(64);
        let pipeline = MatchPipeline::from_config(cfg).unwrap();
        let input = b"a,b\nAcme Holdings,Acme Hldgs\nNorthwind Traders,Contoso Ltd\nFabrikam,Northwind Trading\n";

        let first = pipeline.run(input, &NoopProgress, &CancellationToken::new()).await.unwrap();
        let second = pipeline.run(input, &NoopProgress, &CancellationToken::new()).await.unwrap();
        assert_eq!(first.csv, second.csv);
        assert_eq!(first.records.len() + first.summary.fuzzy + first.summary.exact, 6);
    }

    #[tokio::test]
    async fn test_channel_progress() {
        let pipeline = MatchPipeline::new(config(0.5), LookupProvider::new(&[])).unwrap();
        let (sink, mut rx) = ChannelProgress::channel();

        pipeline.run(b"a,b\nx,x\n", &sink, &CancellationToken::new()).await.unwrap();
        drop(sink);

        let mut stages = Vec::new();
        while let Some(event) = rx.recv().await {
            stages.push(event.stage);
        }
        assert_eq!(stages.first(), Some(&Stage::Parsing));
        assert_eq!(stages.last(), Some(&Stage::Done));
    }

    #[tokio::test]
    async fn test_cancel_during_assignment() {
        let pipeline = MatchPipeline::new(config(0.5), LookupProvider::new(&[])).unwrap();
        let token = CancellationToken::new();
        let trigger = token.clone();
        let sink = move |e: ProgressEvent| {
            if e.stage == Stage::Assigning {
                trigger.cancel();
            }
        };

        let err = pipeline.run(b"a,b\nAlpha,Omega\nBeta,Gamma\n", &sink, &token).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.stage, Stage::Assigning);
        assert!(matches!(err.source, Error::Cancelled(Stage::Assigning)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_input_completes() {
        let pipeline = MatchPipeline::new(config(0.5), LookupProvider::new(&[])).unwrap();
        let input = b"a,b\nAc\xFFme,Ac\xFFme\nBeta,Gamma\n";

        let output = pipeline.run(input, &NoopProgress, &CancellationToken::new()).await.unwrap();
        assert_eq!(output.summary.exact, 1);
        assert_eq!(output.summary.unmatched_a, 1);
        assert_eq!(output.summary.unmatched_b, 1);
        assert_eq!(output.records[0].a.as_ref().unwrap().value, "Ac\u{FFFD}me");
        assert!(String::from_utf8(output.csv).unwrap().contains("Ac\u{FFFD}me,Ac\u{FFFD}me,exact,"));
    }

    #[tokio::test]
    async fn test_swapped_columns_flip_output_headers() {
        let mut cfg = config(0.5);
        cfg.columns.swap_columns_by_count = true;
        let provider = LookupProvider::new(&[]);
        let pipeline = MatchPipeline::new(cfg, provider.clone()).unwrap();
        let input = b"long,short\nAlpha,alpha\nBeta,\nGamma,\n";

        let output = pipeline.run(input, &NoopProgress, &CancellationToken::new()).await.unwrap();
        assert!(output.summary.columns_swapped);
        assert_eq!(output.header_a, "short");
        assert_eq!(output.header_b, "long");
        assert_eq!(
            String::from_utf8(output.csv).unwrap(),
            "short,long,match_type,score\n\
             alpha,Alpha,exact,\n\
             ,Beta,unmatched,\n\
             ,Gamma,unmatched,\n"
        );
        assert_eq!(output.summary.unmatched_b, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        let plain = MatchPipeline::new(config(0.5), LookupProvider::new(&[])).unwrap();
        let output = plain.run(input, &NoopProgress, &CancellationToken::new()).await.unwrap();
        assert!(!output.summary.columns_swapped);
        assert_eq!(output.header_a, "long");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = MatchPipeline::new(MatchConfig::new(2.0), LookupProvider::new(&[])).err().unwrap();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
