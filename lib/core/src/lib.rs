//! # colmatch Core
//!
//! Core library for colmatch, a two-column record matcher.
//!
//! This crate provides the deterministic parts of the matching engine:
//!
//! - [`load_table`] - CSV bytes to two ordered [`Row`] sequences
//! - [`exact_match`] - normalized equality pairing, before any embedding cost
//! - [`SimilarityScorer`] - parallel, SIMD cosine matrix over the remainder
//! - [`AssignmentResolver`] - greedy or optimal one-to-one assignment
//! - [`merge_records`] / [`write_csv`] - final record order and serialization
//!
//! ## Example
//!
//! ```rust
//! use colmatch_core::{
//!     exact_match, load_table, AssignmentResolver, ColumnSelection, EmbeddingVector,
//!     NormalizeOptions, SimilarityScorer,
//! };
//!
//! let csv = b"left,right\nAcme Inc,acme inc\nBeta LLC,Beta Limited\n";
//! let opts = NormalizeOptions::default();
//! let table = load_table(csv, &ColumnSelection::default(), &opts).unwrap();
//! let outcome = exact_match(table.a, table.b, &opts);
//! assert_eq!(outcome.matches.len(), 1);
//!
//! // vectors normally come from an embedding provider
//! let a = vec![EmbeddingVector::new(vec![1.0, 0.2])];
//! let b = vec![EmbeddingVector::new(vec![0.9, 0.3])];
//! let matrix = SimilarityScorer::new().score(&a, &b).unwrap();
//! let assignment = AssignmentResolver::new(0.8).resolve(&matrix, &[1], &[1]).unwrap();
//! assert_eq!(assignment.pairs.len(), 1);
//! ```

pub mod error;
pub mod row;
pub mod normalize;
pub mod loader;
pub mod exact;
pub mod vector;
pub mod score;
pub mod assign;
pub mod record;
pub mod writer;
pub mod progress;

/// SIMD dot product and norm kernels
///
/// - AVX2/FMA on x86_64
/// - NEON on ARM64/Apple Silicon
/// - scalar fallback elsewhere
pub mod simd;

pub use error::{Error, Result};
pub use row::{Column, Row, RowId};
pub use normalize::{normalize, NormalizeOptions, NormalizedValue};
pub use loader::{load_table, ColumnSelection, Table};
pub use exact::{exact_match, ExactOutcome};
pub use vector::EmbeddingVector;
pub use score::{SimilarityMatrix, SimilarityScorer};
pub use assign::{Assignment, AssignmentResolver, AssignmentStrategy, FuzzyPair};
pub use record::{MatchRecord, MatchType};
pub use writer::{merge_records, verify_coverage, write_csv};
pub use progress::{MonotonicProgress, NoopProgress, ProgressEvent, ProgressSink, Stage, TracingProgress};
