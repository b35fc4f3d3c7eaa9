//! TF-IDF sparse vector similarity over a lazily built corpus.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{clamp_unit, SimilarityBackend};
use crate::error::{Error, Result};

/// Document-frequency statistics accumulated from every input seen.
#[derive(Debug, Default)]
struct Corpus {
    document_count: u64,
    document_frequency: HashMap<String, u64>,
}

impl Corpus {
    fn observe(&mut self, tokens: &HashMap<String, usize>) {
        self.document_count += 1;
        for term in tokens.keys() {
            *self.document_frequency.entry(term.clone()).or_insert(0) += 1;
        }
    }

    /// Smoothed inverse document frequency.
    fn idf(&self, term: &str) -> f64 {
        let df = self.document_frequency.get(term).copied().unwrap_or(0);
        (((self.document_count + 1) as f64) / ((df + 1) as f64)).ln() + 1.0
    }
}

/// Middle-preference backend: cosine similarity in TF-IDF space. The
/// corpus grows with each call, so scores sharpen as the process sees
/// more text. Empty vocabulary yields 0.
pub struct TfIdfBackend {
    corpus: Mutex<Corpus>,
}

impl TfIdfBackend {
    pub fn new() -> Self {
        Self {
            corpus: Mutex::new(Corpus::default()),
        }
    }
}

impl Default for TfIdfBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn term_counts(text: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
    {
        *counts.entry(token.to_string()).or_insert(0) += 1;
    }
    counts
}

impl SimilarityBackend for TfIdfBackend {
    fn name(&self) -> &'static str {
        "tfidf"
    }

    fn similarity(&self, a: &str, b: &str) -> Result<f64> {
        let counts_a = term_counts(a);
        let counts_b = term_counts(b);

        if counts_a.is_empty() || counts_b.is_empty() {
            return Ok(0.0);
        }

        let mut corpus = self
            .corpus
            .lock()
            .map_err(|e| Error::Similarity(format!("corpus lock poisoned: {}", e)))?;
        corpus.observe(&counts_a);
        corpus.observe(&counts_b);

        let weigh = |counts: &HashMap<String, usize>| -> HashMap<String, f64> {
            let total: usize = counts.values().sum();
            counts
                .iter()
                .map(|(term, count)| {
                    let tf = *count as f64 / total as f64;
                    (term.clone(), tf * corpus.idf(term))
                })
                .collect()
        };

        let weights_a = weigh(&counts_a);
        let weights_b = weigh(&counts_b);

        let mut dot = 0.0;
        for (term, weight_a) in &weights_a {
            if let Some(weight_b) = weights_b.get(term) {
                dot += weight_a * weight_b;
            }
        }

        let norm_a: f64 = weights_a.values().map(|w| w * w).sum::<f64>().sqrt();
        let norm_b: f64 = weights_b.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return Ok(0.0);
        }

        Ok(clamp_unit(dot / (norm_a * norm_b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts_score_one() {
        let backend = TfIdfBackend::new();
        let score = backend
            .similarity("prioritize unit tests", "prioritize unit tests")
            .unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_texts_score_zero() {
        let backend = TfIdfBackend::new();
        let score = backend.similarity("alpha beta", "gamma delta").unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_empty_vocabulary_yields_zero() {
        let backend = TfIdfBackend::new();
        assert_eq!(backend.similarity("", "").unwrap(), 0.0);
        assert_eq!(backend.similarity("...", "!!!").unwrap(), 0.0);
    }

    #[test]
    fn test_overlapping_texts_score_between() {
        let backend = TfIdfBackend::new();
        let score = backend
            .similarity(
                "self documenting code is best",
                "prioritize self documenting code",
            )
            .unwrap();
        assert!(score > 0.0 && score < 1.0, "score={}", score);
    }

    #[test]
    fn test_corpus_grows_with_calls() {
        let backend = TfIdfBackend::new();
        backend.similarity("a b", "c d").unwrap();
        backend.similarity("e f", "g h").unwrap();
        let corpus = backend.corpus.lock().unwrap();
        assert_eq!(corpus.document_count, 4);
        assert!(corpus.document_frequency.contains_key("a"));
    }

    #[test]
    fn test_scores_clamped() {
        let backend = TfIdfBackend::new();
        for (a, b) in [
            ("x y z", "x y z"),
            ("repeated repeated repeated", "repeated"),
            ("one two", "two three"),
        ] {
            let score = backend.similarity(a, b).unwrap();
            assert!((0.0..=1.0).contains(&score), "{} vs {} -> {}", a, b, score);
        }
    }
}
