//! Row-aligned embedding matrix with exhaustive dot-product ranking.
//!
//! Row `i` of the matrix belongs to catalog row `i`. Rows are unit length,
//! so the dot product is the cosine similarity.

use crate::recommender::preprocess::l2_norm;

/// Tolerance used when checking that a row has unit length.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// Ordered embedding vectors, one per catalog row.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: Vec<Vec<f32>>,
    dimensions: usize,
}

/// A ranked catalog row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredRow {
    /// Catalog row index
    pub index: usize,
    /// Cosine similarity score
    pub score: f32,
}

impl EmbeddingMatrix {
    pub fn new(dimensions: usize) -> Self {
        Self {
            rows: Vec::new(),
            dimensions,
        }
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Append a row. The row must match the matrix dimensions and be unit
    /// length.
    pub fn push(&mut self, embedding: Vec<f32>) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        let norm = l2_norm(&embedding);
        if !norm.is_finite() {
            return Err(IndexError::NonFiniteVector);
        }
        if norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }
        if (norm - 1.0).abs() > UNIT_NORM_TOLERANCE {
            return Err(IndexError::NotNormalized(norm));
        }

        self.rows.push(embedding);
        Ok(())
    }

    /// Score every row against `query` and return the `top_k` best.
    ///
    /// Results are sorted by score, highest first. Equal scores keep catalog
    /// order. `top_k` larger than the matrix returns every row.
    pub fn rank(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredRow>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let norm = l2_norm(query);
        if !norm.is_finite() {
            return Err(IndexError::NonFiniteVector);
        }
        if norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut results: Vec<ScoredRow> = self
            .rows
            .iter()
            .enumerate()
            .map(|(index, row)| ScoredRow {
                index,
                score: dot(query, row),
            })
            .collect();

        // sort_by is stable, ties stay in index order
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k.min(self.rows.len()));

        Ok(results)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Vector is not unit length (norm {0})")]
    NotNormalized(f32),

    #[error("Vector contains NaN or infinite components")]
    NonFiniteVector,
}
