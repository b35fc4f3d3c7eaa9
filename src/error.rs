//! Error types for counsel-core.

use thiserror::Error;

/// Result type alias using counsel-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of adapter invocation failures.
///
/// The orchestrator isolates these to the affected participant for the
/// affected round; they never fail a deliberation on their own.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// The adapter did not respond before its deadline
    #[error("timeout")]
    Timeout,
    /// Network or subprocess transport failure (retryable)
    #[error("transport_error")]
    Transport,
    /// Credentials rejected by the back-end
    #[error("auth_error")]
    Auth,
    /// Model identifier unknown to the back-end
    #[error("invalid_model")]
    InvalidModel,
    /// Back-end throttled the request (retryable)
    #[error("rate_limited")]
    RateLimited,
}

impl AdapterErrorKind {
    /// Whether the adapter should retry internally with backoff.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transport | Self::RateLimited)
    }
}

/// Errors that can occur during deliberation operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected at the boundary before deliberation started
    #[error("Validation error: {0}")]
    Validation(String),

    /// Adapter invocation failed for one participant
    #[error("Adapter error ({adapter}): {kind} - {message}")]
    Adapter {
        adapter: String,
        kind: AdapterErrorKind,
        message: String,
    },

    /// Tool execution failed (converted to a failed execution record upstream)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Similarity backend failure
    #[error("Similarity backend error: {0}")]
    Similarity(String),

    /// Decision store I/O or constraint failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an adapter error.
    pub fn adapter(
        adapter: impl Into<String>,
        kind: AdapterErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Adapter {
            adapter: adapter.into(),
            kind,
            message: message.into(),
        }
    }

    /// Create a tool error.
    pub fn tool(message: impl Into<String>) -> Self {
        Self::Tool(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// The adapter error kind, if this is an adapter error.
    pub fn adapter_kind(&self) -> Option<AdapterErrorKind> {
        match self {
            Self::Adapter { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_kind_retryability() {
        assert!(AdapterErrorKind::Transport.is_retryable());
        assert!(AdapterErrorKind::RateLimited.is_retryable());
        assert!(!AdapterErrorKind::Auth.is_retryable());
        assert!(!AdapterErrorKind::InvalidModel.is_retryable());
        assert!(!AdapterErrorKind::Timeout.is_retryable());
    }

    #[test]
    fn test_adapter_error_display() {
        let err = Error::adapter("claude", AdapterErrorKind::RateLimited, "429 from API");
        assert_eq!(
            err.to_string(),
            "Adapter error (claude): rate_limited - 429 from API"
        );
        assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::RateLimited));
    }
}
