//! Token-set overlap similarity (Jaccard index).

use std::collections::HashSet;

use super::SimilarityBackend;
use crate::error::Result;

/// Lowest-preference backend: lowercase, split on non-alphanumerics,
/// deduplicate, score |A∩B| / |A∪B|.
#[derive(Debug, Default)]
pub struct TokenOverlapBackend;

impl TokenOverlapBackend {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

impl SimilarityBackend for TokenOverlapBackend {
    fn name(&self) -> &'static str {
        "token-overlap"
    }

    fn similarity(&self, a: &str, b: &str) -> Result<f64> {
        let set_a = tokenize(a);
        let set_b = tokenize(b);

        if set_a.is_empty() && set_b.is_empty() {
            return Ok(0.0);
        }

        let intersection = set_a.intersection(&set_b).count();
        let union = set_a.union(&set_b).count();
        Ok(intersection as f64 / union as f64)
    }
}
