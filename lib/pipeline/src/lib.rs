//! # colmatch Pipeline
//!
//! Runs a two-column table through the whole matching engine:
//! parsing, exact matching, embedding, scoring, assignment and output.
//!
//! ```rust,no_run
//! use colmatch_pipeline::{CancellationToken, MatchConfig, MatchPipeline, ProviderKind};
//! use colmatch_core::TracingProgress;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = MatchConfig::new(0.85);
//! config.embedding.provider = ProviderKind::Hash;
//!
//! let pipeline = MatchPipeline::from_config(config)?;
//! let input = b"vendor,ledger\nAcme Inc,ACME INC.\nNorthwind,Northwind Traders\n";
//! let output = pipeline.run(input, &TracingProgress, &CancellationToken::new()).await?;
//! println!("{}", String::from_utf8_lossy(&output.csv));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod pipeline;

pub use config::{EmbeddingSettings, MatchConfig, ProviderKind};
pub use pipeline::{ChannelProgress, MatchOutput, MatchPipeline, MatchSummary, PipelineError};

pub use tokio_util::sync::CancellationToken;
