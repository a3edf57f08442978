use serde::{Deserialize, Serialize};

/// An embedding for exactly one row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingVector {
    data: Vec<f32>,
}

impl EmbeddingVector {
    #[inline]
    #[must_use]
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    #[inline]
    #[must_use]
    pub fn zeros(dim: usize) -> Self {
        Self {
            data: vec![0.0; dim],
        }
    }

    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn into_inner(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    pub fn norm(&self) -> f32 {
        crate::simd::norm(&self.data)
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Cosine similarity in [-1, 1].
    ///
    /// Zero-norm vectors and dimension mismatches score 0.0, never NaN.
    #[inline]
    pub fn cosine_similarity(&self, other: &EmbeddingVector) -> f32 {
        if self.dim() != other.dim() {
            return 0.0;
        }
        let norm_a = self.norm();
        let norm_b = other.norm();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        let dot = crate::simd::dot(&self.data, &other.data);
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }

    /// Scale to unit length in place; zero vectors are left alone
    #[inline]
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > f32::EPSILON {
            let inv = 1.0 / norm;
            for x in &mut self.data {
                *x *= inv;
            }
        }
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(data: Vec<f32>) -> Self {
        Self::new(data)
    }
}
