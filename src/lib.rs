//! # colmatch
//!
//! Match the values of two CSV columns against each other.
//!
//! colmatch pairs identical values first, then embeds whatever is left,
//! scores every remaining A/B pair by cosine similarity and resolves a
//! one-to-one assignment above a similarity threshold. Every input row ends
//! up in exactly one output record: `exact`, `fuzzy` or `unmatched`.
//!
//! ## Quick Start
//!
//! ### From the command line
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! colmatch vendors.csv --threshold 0.85
//! colmatch vendors.csv --threshold 0.6 --provider hash -o matched.csv
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use colmatch::prelude::*;
//!
//! # async fn demo() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let mut config = MatchConfig::new(0.85);
//! config.embedding.provider = ProviderKind::Hash;
//!
//! let pipeline = MatchPipeline::from_config(config)?;
//! let input = std::fs::read("vendors.csv")?;
//! let output = pipeline
//!     .run(&input, &TracingProgress, &CancellationToken::new())
//!     .await?;
//! std::fs::write("vendors_matched.csv", &output.csv)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! - [`colmatch-core`](colmatch_core) - loader, exact matcher, SIMD scorer, assignment, writer
//! - [`colmatch-embed`](colmatch_embed) - embedding providers, batching and retry
//! - [`colmatch-pipeline`](colmatch_pipeline) - configuration and orchestration

// Re-export core types
pub use colmatch_core::{
    load_table, normalize, Assignment, AssignmentResolver, AssignmentStrategy, Column, ColumnSelection,
    EmbeddingVector, Error, MatchRecord, MatchType, NoopProgress, NormalizeOptions, ProgressEvent,
    ProgressSink, Result, Row, RowId, SimilarityMatrix, SimilarityScorer, Stage, Table, TracingProgress,
};

// Re-export embedding providers
pub use colmatch_embed::{
    EmbeddingBatcher, EmbeddingProvider, HashingEmbedder, OpenAiConfig, OpenAiEmbedder, ProviderError,
    RetryPolicy,
};

// Re-export the pipeline
pub use colmatch_pipeline::{
    CancellationToken, ChannelProgress, EmbeddingSettings, MatchConfig, MatchOutput, MatchPipeline,
    MatchSummary, PipelineError, ProviderKind,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AssignmentStrategy, CancellationToken, ColumnSelection, EmbeddingProvider, Error, MatchConfig,
        MatchOutput, MatchPipeline, MatchRecord, MatchType, NormalizeOptions, ProgressEvent, ProgressSink,
        ProviderKind, Result, Stage, TracingProgress,
    };
}

/// SIMD-optimized vector operations
pub mod simd {
    pub use colmatch_core::simd::{dot, norm};
}
