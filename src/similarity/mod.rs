//! Semantic similarity scoring between two texts.
//!
//! Three backends, in preference order:
//!
//! 1. Dense embeddings (`dense-embeddings` feature) - cosine similarity
//!    of unit-normalized neural embeddings
//! 2. TF-IDF sparse vectors over a corpus built lazily from inputs seen
//!    so far
//! 3. Token-set overlap (Jaccard)
//!
//! Selection happens once at startup: the highest-preference backend
//! whose dependencies load without error wins, and every subsequent call
//! uses it. There is no per-call fallback.
//!
//! Scores are estimates in [0,1]; callers clamp before persisting or
//! comparing because dense backends can produce values a few ulps
//! outside the interval.

#[cfg(feature = "dense-embeddings")]
mod dense;
mod tfidf;
mod token;

#[cfg(feature = "dense-embeddings")]
pub use dense::DenseEmbeddingBackend;
pub use tfidf::TfIdfBackend;
pub use token::TokenOverlapBackend;

use std::sync::Arc;
use tracing::info;

use crate::error::Result;

/// A semantic similarity scorer.
pub trait SimilarityBackend: Send + Sync {
    /// Stable identifier, used in logs and measurement records.
    fn name(&self) -> &'static str;

    /// Score similarity between two texts in [0,1] (pre-clamp estimate).
    fn similarity(&self, a: &str, b: &str) -> Result<f64>;

    /// Embed one text, when the backend has a vector space. Backends
    /// without embeddings return `None` and the L2 cache stays idle.
    fn embed(&self, _text: &str) -> Result<Option<Vec<f32>>> {
        Ok(None)
    }

    /// Logical identifier of the embedding space; changes invalidate the
    /// L2 cache. `None` when `embed` never returns vectors.
    fn embedding_version(&self) -> Option<&str> {
        None
    }
}

/// Select the best available backend. Logged once; the choice is
/// process-wide and immutable afterwards.
pub fn select_backend() -> Arc<dyn SimilarityBackend> {
    #[cfg(feature = "dense-embeddings")]
    match DenseEmbeddingBackend::load() {
        Ok(backend) => {
            info!(backend = backend.name(), "similarity backend selected");
            return Arc::new(backend);
        }
        Err(error) => {
            info!(%error, "dense embedding backend unavailable, falling back");
        }
    }

    let backend = TfIdfBackend::new();
    info!(backend = backend.name(), "similarity backend selected");
    Arc::new(backend)
}

/// Clamp a similarity score into [0,1], absorbing numerical error.
pub fn clamp_unit(score: f64) -> f64 {
    score.clamp(0.0, 1.0)
}

/// Cosine similarity between two vectors; 0.0 when either is zero-norm.
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_absorbs_numerical_error() {
        assert_eq!(clamp_unit(1.000000007), 1.0);
        assert_eq!(clamp_unit(-0.000000003), 0.0);
        assert_eq!(clamp_unit(0.5), 0.5);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_identical_vectors() {
        let score = cosine(&[0.3, 0.4, 0.5], &[0.3, 0.4, 0.5]);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_select_backend_always_succeeds() {
        let backend = select_backend();
        let score = backend.similarity("hello world", "hello world").unwrap();
        assert!(clamp_unit(score) > 0.99);
    }
}
