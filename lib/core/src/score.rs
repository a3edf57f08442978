//! Similarity scorer
//!
//! Builds the dense m×n cosine matrix between the A and B remainders. Row
//! blocks are computed in parallel on the rayon pool; the caller's stop
//! check runs between blocks so a cancelled run drops the partial matrix.

use crate::progress::Stage;
use crate::vector::EmbeddingVector;
use crate::{Error, Result};
use rayon::prelude::*;

/// Rows per parallel block
pub const DEFAULT_BLOCK_ROWS: usize = 64;

/// Row-major m×n score matrix
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl SimilarityMatrix {
    /// Build from row-major data; `data.len()` must equal `rows * cols`
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InternalInvariant(format!(
                "matrix data has {} cells, expected {}x{}",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.cols + j]
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }
}

/// Cosine scorer with configurable block size
#[derive(Debug, Clone, Copy)]
pub struct SimilarityScorer {
    block_rows: usize,
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self {
            block_rows: DEFAULT_BLOCK_ROWS,
        }
    }
}

impl SimilarityScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_rows(mut self, rows: usize) -> Self {
        self.block_rows = rows.max(1);
        self
    }

    /// Score every pair without a stop check
    pub fn score(&self, a: &[EmbeddingVector], b: &[EmbeddingVector]) -> Result<SimilarityMatrix> {
        self.score_with(a, b, || false, |_, _| {})
    }

    /// Score every pair.
    ///
    /// `should_stop` is polled before each block; `on_block` receives
    /// (rows done, total rows) after each block.
    pub fn score_with<S, P>(
        &self,
        a: &[EmbeddingVector],
        b: &[EmbeddingVector],
        should_stop: S,
        mut on_block: P,
    ) -> Result<SimilarityMatrix>
    where
        S: Fn() -> bool,
        P: FnMut(usize, usize),
    {
        let dim = check_dimensions(a, b)?;
        let m = a.len();
        let n = b.len();
        if m == 0 || n == 0 {
            return SimilarityMatrix::from_vec(m, n, Vec::new());
        }

        // 1/‖v‖, or 0 for zero-norm vectors so their scores collapse to 0
        let inv_a = inverse_norms(a);
        let inv_b = inverse_norms(b);

        let mut data = vec![0.0f32; m * n];
        let block_cells = self.block_rows * n;

        for (block_idx, block) in data.chunks_mut(block_cells).enumerate() {
            if should_stop() {
                tracing::debug!(block = block_idx, "scoring stopped");
                return Err(Error::Cancelled(Stage::Scoring));
            }
            let first_row = block_idx * self.block_rows;

            block
                .par_chunks_mut(n)
                .enumerate()
                .for_each(|(offset, out)| {
                    let i = first_row + offset;
                    let va = a[i].as_slice();
                    for (j, cell) in out.iter_mut().enumerate() {
                        let scale = inv_a[i] * inv_b[j];
                        *cell = if scale == 0.0 {
                            0.0
                        } else {
                            (crate::simd::dot(va, b[j].as_slice()) * scale).clamp(-1.0, 1.0)
                        };
                    }
                });

            let done = (first_row + self.block_rows).min(m);
            on_block(done, m);
        }

        tracing::debug!(rows = m, cols = n, dim, "similarity matrix built");
        SimilarityMatrix::from_vec(m, n, data)
    }
}

fn check_dimensions(a: &[EmbeddingVector], b: &[EmbeddingVector]) -> Result<usize> {
    let mut all = a.iter().chain(b.iter());
    let dim = match all.next() {
        Some(v) => v.dim(),
        None => return Ok(0),
    };
    if let Some(bad) = all.find(|v| v.dim() != dim) {
        return Err(Error::InternalInvariant(format!(
            "embedding dimension mismatch: {} vs {}",
            dim,
            bad.dim()
        )));
    }
    Ok(dim)
}

fn inverse_norms(vectors: &[EmbeddingVector]) -> Vec<f32> {
    vectors
        .par_iter()
        .map(|v| {
            let norm = v.norm();
            if norm > 0.0 && norm.is_finite() {
                1.0 / norm
            } else {
                0.0
            }
        })
        .collect()
}
