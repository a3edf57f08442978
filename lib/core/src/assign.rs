//! Assignment resolver
//!
//! Turns the similarity matrix into a one-to-one mapping. Two strategies:
//!
//! - [`AssignmentStrategy::Greedy`] repeatedly commits the highest remaining
//!   score until the best remaining score falls below the threshold.
//! - [`AssignmentStrategy::Optimal`] solves a maximum-weight bipartite
//!   matching (Kuhn-Munkres) restricted to cells at or above the threshold.
//!
//! Both are deterministic. Equal scores are broken by the lower combined
//! ordinal (A ordinal + B ordinal), then by the lower A ordinal. Both poll a
//! caller-supplied stop check while they run.

use crate::progress::Stage;
use crate::score::SimilarityMatrix;
use crate::{Error, Result};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStrategy {
    #[default]
    Greedy,
    Optimal,
}

impl fmt::Display for AssignmentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentStrategy::Greedy => f.write_str("greedy"),
            AssignmentStrategy::Optimal => f.write_str("optimal"),
        }
    }
}

impl FromStr for AssignmentStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "greedy" => Ok(AssignmentStrategy::Greedy),
            "optimal" | "hungarian" => Ok(AssignmentStrategy::Optimal),
            other => Err(Error::InvalidConfig(format!("unknown assignment strategy '{}'", other))),
        }
    }
}

/// A committed fuzzy pair; indices point into the remainder sequences
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyPair {
    pub a: usize,
    pub b: usize,
    pub score: f32,
}

/// Greedy candidate cell; u32 indices keep it at 12 bytes
#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    a: u32,
    b: u32,
}

/// Matrix rows scanned between stop checks while collecting candidates
const STOP_CHECK_ROWS: usize = 256;

/// Resolver output: pairs in resolution order plus leftover indices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    pub pairs: Vec<FuzzyPair>,
    /// Ascending
    pub unmatched_a: Vec<usize>,
    /// Ascending
    pub unmatched_b: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct AssignmentResolver {
    threshold: f32,
    strategy: AssignmentStrategy,
}

impl AssignmentResolver {
    /// `threshold` is inclusive: a score equal to it is accepted
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            strategy: AssignmentStrategy::Greedy,
        }
    }

    pub fn strategy(mut self, strategy: AssignmentStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Resolve the matrix without a stop check.
    ///
    /// `ordinals_a[i]` / `ordinals_b[j]` are the original table ordinals of
    /// matrix row i / column j; they drive the tie-break.
    pub fn resolve(
        &self,
        matrix: &SimilarityMatrix,
        ordinals_a: &[usize],
        ordinals_b: &[usize],
    ) -> Result<Assignment> {
        self.resolve_with(matrix, ordinals_a, ordinals_b, || false)
    }

    /// Resolve the matrix, returning [`Error::Cancelled`] once `should_stop`
    /// reports true. Polled every few hundred candidate rows for greedy and
    /// once per augmented row for optimal.
    pub fn resolve_with<S>(
        &self,
        matrix: &SimilarityMatrix,
        ordinals_a: &[usize],
        ordinals_b: &[usize],
        should_stop: S,
    ) -> Result<Assignment>
    where
        S: Fn() -> bool,
    {
        if ordinals_a.len() != matrix.rows() || ordinals_b.len() != matrix.cols() {
            return Err(Error::InternalInvariant(format!(
                "ordinal lists ({}, {}) do not match a {}x{} matrix",
                ordinals_a.len(),
                ordinals_b.len(),
                matrix.rows(),
                matrix.cols()
            )));
        }

        let mut pairs = match self.strategy {
            AssignmentStrategy::Greedy => self.greedy(matrix, ordinals_a, ordinals_b, &should_stop)?,
            AssignmentStrategy::Optimal => self.optimal(matrix, &should_stop)?,
        };
        if self.strategy == AssignmentStrategy::Optimal {
            pairs.sort_by_key(|p| resolution_key(p.score, ordinals_a[p.a], ordinals_b[p.b]));
        }

        let mut used_a = vec![false; matrix.rows()];
        let mut used_b = vec![false; matrix.cols()];
        for p in &pairs {
            if used_a[p.a] || used_b[p.b] {
                return Err(Error::InternalInvariant(format!(
                    "resolver reused row {} or column {}",
                    p.a, p.b
                )));
            }
            used_a[p.a] = true;
            used_b[p.b] = true;
        }

        let assignment = Assignment {
            pairs,
            unmatched_a: unused(&used_a),
            unmatched_b: unused(&used_b),
        };
        tracing::debug!(
            strategy = %self.strategy,
            threshold = self.threshold,
            fuzzy = assignment.pairs.len(),
            unmatched_a = assignment.unmatched_a.len(),
            unmatched_b = assignment.unmatched_b.len(),
            "assignment resolved"
        );
        Ok(assignment)
    }

    fn greedy<S>(
        &self,
        matrix: &SimilarityMatrix,
        ordinals_a: &[usize],
        ordinals_b: &[usize],
        should_stop: &S,
    ) -> Result<Vec<FuzzyPair>>
    where
        S: Fn() -> bool,
    {
        if u32::try_from(matrix.rows()).is_err() || u32::try_from(matrix.cols()).is_err() {
            return Err(Error::InternalInvariant(format!(
                "{}x{} matrix exceeds the greedy index range",
                matrix.rows(),
                matrix.cols()
            )));
        }

        // Only cells that can ever be committed; everything else is below
        // threshold and would stop the scan anyway.
        let mut candidates: Vec<Candidate> = Vec::new();
        for i in 0..matrix.rows() {
            if i % STOP_CHECK_ROWS == 0 && should_stop() {
                return Err(Error::Cancelled(Stage::Assigning));
            }
            for (j, &score) in matrix.row(i).iter().enumerate() {
                if score >= self.threshold {
                    candidates.push(Candidate {
                        score,
                        a: i as u32,
                        b: j as u32,
                    });
                }
            }
        }
        if should_stop() {
            return Err(Error::Cancelled(Stage::Assigning));
        }
        candidates.sort_unstable_by_key(|c| {
            resolution_key(c.score, ordinals_a[c.a as usize], ordinals_b[c.b as usize])
        });

        let mut used_a = vec![false; matrix.rows()];
        let mut used_b = vec![false; matrix.cols()];
        let limit = matrix.rows().min(matrix.cols());
        let mut pairs = Vec::with_capacity(limit);

        for cand in candidates {
            if pairs.len() == limit {
                break;
            }
            let (a, b) = (cand.a as usize, cand.b as usize);
            if used_a[a] || used_b[b] {
                continue;
            }
            used_a[a] = true;
            used_b[b] = true;
            pairs.push(FuzzyPair { a, b, score: cand.score });
        }
        Ok(pairs)
    }

    fn optimal<S>(&self, matrix: &SimilarityMatrix, should_stop: &S) -> Result<Vec<FuzzyPair>>
    where
        S: Fn() -> bool,
    {
        if matrix.is_empty() {
            return Ok(Vec::new());
        }
        // Eligible cells weigh (score - threshold + 1) > 0, ineligible ones 0,
        // so taking an eligible pair always beats leaving both rows open.
        let transpose = matrix.rows() > matrix.cols();
        let (n, m) = if transpose {
            (matrix.cols(), matrix.rows())
        } else {
            (matrix.rows(), matrix.cols())
        };
        let weight = |r: usize, c: usize| -> f64 {
            let s = if transpose { matrix.get(c, r) } else { matrix.get(r, c) };
            if s >= self.threshold {
                f64::from(s) - f64::from(self.threshold) + 1.0
            } else {
                0.0
            }
        };

        let assigned = hungarian_max(n, m, weight, should_stop)?;

        let mut pairs = Vec::new();
        for (r, c) in assigned {
            let (i, j) = if transpose { (c, r) } else { (r, c) };
            let score = matrix.get(i, j);
            if score >= self.threshold {
                pairs.push(FuzzyPair { a: i, b: j, score });
            }
        }
        Ok(pairs)
    }
}

/// Sort key: score descending, then combined ordinal, then A ordinal
#[inline]
fn resolution_key(score: f32, ord_a: usize, ord_b: usize) -> (Reverse<OrderedFloat<f32>>, usize, usize) {
    (Reverse(OrderedFloat(score)), ord_a + ord_b, ord_a)
}

fn unused(used: &[bool]) -> Vec<usize> {
    used.iter()
        .enumerate()
        .filter(|(_, u)| !**u)
        .map(|(i, _)| i)
        .collect()
}

/// Kuhn-Munkres on an n×m weight matrix with n <= m, maximizing total weight.
///
/// Returns (row, column) for every row. Potentials-based O(n²·m) variant;
/// `should_stop` is polled before each row is augmented.
fn hungarian_max<W, S>(n: usize, m: usize, weight: W, should_stop: &S) -> Result<Vec<(usize, usize)>>
where
    W: Fn(usize, usize) -> f64,
    S: Fn() -> bool,
{
    debug_assert!(n <= m);
    let cost = |r: usize, c: usize| -weight(r, c);

    // 1-based; index 0 is the virtual free row/column
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        if should_stop() {
            tracing::debug!(row = i - 1, rows = n, "assignment stopped");
            return Err(Error::Cancelled(Stage::Assigning));
        }
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;

            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost(i0 - 1, j - 1) - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }

            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }

            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut out: Vec<(usize, usize)> = (1..=m)
        .filter(|&j| p[j] != 0)
        .map(|j| (p[j] - 1, j - 1))
        .collect();
    out.sort_unstable();
    Ok(out)
}
