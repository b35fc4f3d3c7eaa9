//! Model allowlist queries.
//!
//! Population comes from host configuration (out of scope here); this is
//! the query surface request validation uses.

use std::collections::{HashMap, HashSet};

/// Per-adapter allowlist of model identifiers.
///
/// An adapter with no registered list accepts any model id; an adapter
/// with a list accepts only its members.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    allowlists: HashMap<String, HashSet<String>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the allowlist for one adapter, replacing any prior list.
    pub fn set_allowlist(
        &mut self,
        adapter: impl Into<String>,
        models: impl IntoIterator<Item = String>,
    ) {
        self.allowlists
            .insert(adapter.into(), models.into_iter().collect());
    }

    /// Whether `model_id` may run on `adapter`.
    pub fn is_allowed(&self, adapter: &str, model_id: &str) -> bool {
        match self.allowlists.get(adapter) {
            Some(models) => models.contains(model_id),
            None => true,
        }
    }

    /// Sorted allowlisted models for an adapter; empty when unrestricted.
    pub fn models_for(&self, adapter: &str) -> Vec<String> {
        let mut models: Vec<String> = self
            .allowlists
            .get(adapter)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        models.sort();
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrestricted_adapter_allows_anything() {
        let registry = ModelRegistry::new();
        assert!(registry.is_allowed("claude", "sonnet"));
        assert!(registry.models_for("claude").is_empty());
    }

    #[test]
    fn test_allowlist_enforced() {
        let mut registry = ModelRegistry::new();
        registry.set_allowlist("claude", vec!["sonnet".to_string(), "opus".to_string()]);

        assert!(registry.is_allowed("claude", "sonnet"));
        assert!(!registry.is_allowed("claude", "gpt5"));
        assert_eq!(registry.models_for("claude"), vec!["opus", "sonnet"]);
    }
}
