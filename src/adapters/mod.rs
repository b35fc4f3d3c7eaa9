//! Adapter contract and implementations for LLM back-ends.
//!
//! An adapter abstracts one way of invoking a model: a CLI subprocess
//! wrapper or an HTTP service client. The orchestrator only sees the
//! `Adapter` trait; concrete adapters register by name in a factory
//! keyed on configuration.
//!
//! Transient failures (network, 5xx, 429) retry internally with bounded
//! exponential backoff; permanent failures (4xx except 429) fail fast.
//! Either way a failed invocation is isolated to its participant for
//! that round.

mod cli;
mod http;
mod registry;

pub use cli::{CliAdapter, CliAdapterConfig};
pub use http::{HttpAdapter, HttpAdapterConfig};
pub use registry::ModelRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Result of an optional prompt length pre-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptLengthCheck {
    Ok,
    TooLong { limit: usize },
}

/// Uniform invocation surface over one LLM back-end.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Registered adapter name (e.g. "claude", "codex").
    fn name(&self) -> &str;

    /// Invoke `model_id` with `prompt` and return the raw response text.
    ///
    /// The deadline must be honored promptly; implementations retry
    /// transient errors internally within it.
    async fn invoke(&self, model_id: &str, prompt: &str, deadline: Duration) -> Result<String>;

    /// Optional pre-flight check; the orchestrator calls it before
    /// `invoke` when implemented.
    fn validate_prompt_length(&self, _prompt: &str) -> PromptLengthCheck {
        PromptLengthCheck::Ok
    }
}

/// Bounded exponential backoff policy for transient adapter errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries for a single invocation.
    pub max_retries: u32,
    /// Base delay used for exponential backoff.
    pub base_delay_ms: u64,
    /// Backoff multiplier applied per retry attempt.
    pub backoff_factor: f64,
}

impl RetryConfig {
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        let millis = (self.base_delay_ms as f64 * factor).round().max(0.0) as u64;
        Duration::from_millis(millis)
    }

    /// Whether `error` warrants another attempt after `attempt` tries.
    pub(crate) fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        attempt < self.max_retries
            && error
                .adapter_kind()
                .map(|kind| kind.is_retryable())
                .unwrap_or(false)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 200,
            backoff_factor: 2.0,
        }
    }
}

/// Name-keyed adapter factory. Hosts register concrete adapters at
/// startup; request validation resolves participants against it.
#[derive(Default)]
pub struct AdapterFactory {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name. Later registrations with
    /// the same name replace earlier ones.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    /// Resolve an adapter by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Adapter>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| Error::validation(format!("unknown adapter '{}'", name)))
    }

    /// Registered adapter names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterErrorKind;

    struct EchoAdapter;

    #[async_trait]
    impl Adapter for EchoAdapter {
        fn name(&self) -> &str {
            "echo"
        }
        async fn invoke(&self, _model: &str, prompt: &str, _deadline: Duration) -> Result<String> {
            Ok(prompt.to_string())
        }
    }

    #[tokio::test]
    async fn test_factory_register_and_get() {
        let mut factory = AdapterFactory::new();
        factory.register(Arc::new(EchoAdapter));

        let adapter = factory.get("echo").unwrap();
        let response = adapter
            .invoke("m", "hello", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response, "hello");

        assert!(factory.get("missing").is_err());
        assert_eq!(factory.names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_should_retry_transient_within_cap() {
        let retry = RetryConfig::default();
        let transient = Error::adapter("t", AdapterErrorKind::Transport, "flaky");
        let throttled = Error::adapter("t", AdapterErrorKind::RateLimited, "429");

        assert!(retry.should_retry(&transient, 0));
        assert!(retry.should_retry(&throttled, 1));
        // past the cap
        assert!(!retry.should_retry(&transient, 2));
    }

    #[test]
    fn test_should_not_retry_permanent_errors() {
        let retry = RetryConfig::default();
        assert!(!retry.should_retry(&Error::adapter("t", AdapterErrorKind::Auth, "bad key"), 0));
        assert!(!retry.should_retry(
            &Error::adapter("t", AdapterErrorKind::InvalidModel, "gpt-42"),
            0
        ));
        assert!(!retry.should_retry(&Error::Internal("oops".to_string()), 0));
    }

    #[test]
    fn test_backoff_delays_grow_exponentially() {
        let retry = RetryConfig {
            max_retries: 3,
            base_delay_ms: 100,
            backoff_factor: 2.0,
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(400));
    }
}
