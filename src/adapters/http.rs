//! HTTP service adapter.
//!
//! Client for messages-style LLM HTTP APIs. Status codes map onto the
//! adapter error taxonomy: 401/403 are auth failures, 404 is an invalid
//! model, 429 is rate limiting (retryable), 5xx and transport faults are
//! retryable, remaining 4xx fail fast.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::time::{sleep, timeout};

use super::{Adapter, PromptLengthCheck, RetryConfig};
use crate::error::{AdapterErrorKind, Error, Result};

/// Configuration for one HTTP-backed adapter.
#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    /// Registered adapter name.
    pub name: String,
    /// API key sent in the auth header.
    pub api_key: String,
    /// Service base URL.
    pub base_url: String,
    /// Header carrying the API key (e.g. "x-api-key", "authorization").
    pub auth_header: String,
    /// Max tokens requested per completion.
    pub max_tokens: u32,
    /// Maximum prompt length in characters, when the service has one.
    pub prompt_limit: Option<usize>,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
}

impl HttpAdapterConfig {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            auth_header: "x-api-key".to_string(),
            max_tokens: 4096,
            prompt_limit: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_auth_header(mut self, header: impl Into<String>) -> Self {
        self.auth_header = header.into();
        self
    }

    pub fn with_prompt_limit(mut self, limit: usize) -> Self {
        self.prompt_limit = Some(limit);
        self
    }
}

fn build_http_client(timeout_duration: Duration) -> Client {
    // Some sandboxed macOS environments can panic during proxy
    // auto-detection in reqwest's default client builder. Fall back to
    // no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| {
        Client::builder().timeout(timeout_duration).build()
    })) {
        Ok(Ok(client)) => client,
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout_duration)
            .build()
            .expect("Failed to create HTTP client"),
    }
}

// Wire types for a messages-style completion API.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Adapter invoking a remote completion API per request.
pub struct HttpAdapter {
    config: HttpAdapterConfig,
    http: Client,
}

impl HttpAdapter {
    pub fn new(config: HttpAdapterConfig) -> Self {
        let http = build_http_client(Duration::from_secs(300));
        Self { config, http }
    }

    async fn invoke_once(&self, model_id: &str, prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model: model_id,
            messages: vec![WireMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header(&self.config.auth_header, &self.config.api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                Error::adapter(
                    &self.config.name,
                    AdapterErrorKind::Transport,
                    format!("HTTP request failed: {}", e),
                )
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            Error::adapter(
                &self.config.name,
                AdapterErrorKind::Transport,
                format!("failed to read response: {}", e),
            )
        })?;

        if !status.is_success() {
            let kind = classify_status(status);
            return Err(Error::adapter(
                &self.config.name,
                kind,
                format!("HTTP {}: {}", status, truncate(&body, 400)),
            ));
        }

        let parsed: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            Error::adapter(
                &self.config.name,
                AdapterErrorKind::Transport,
                format!("unparseable response: {}", e),
            )
        })?;

        Ok(parsed
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }

    async fn invoke_with_retry(&self, model_id: &str, prompt: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.invoke_once(model_id, prompt).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !self.config.retry.should_retry(&error, attempt) {
                        return Err(error);
                    }
                    sleep(self.config.retry.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn classify_status(status: StatusCode) -> AdapterErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AdapterErrorKind::Auth,
        StatusCode::NOT_FOUND => AdapterErrorKind::InvalidModel,
        StatusCode::TOO_MANY_REQUESTS => AdapterErrorKind::RateLimited,
        status if status.is_server_error() => AdapterErrorKind::Transport,
        // Remaining 4xx: permanent, surfaced as auth-or-shape problems
        // that retrying cannot fix.
        _ => AdapterErrorKind::InvalidModel,
    }
}

fn truncate(text: &str, cap: usize) -> &str {
    match text.char_indices().nth(cap) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn invoke(&self, model_id: &str, prompt: &str, deadline: Duration) -> Result<String> {
        match timeout(deadline, self.invoke_with_retry(model_id, prompt)).await {
            Ok(result) => result,
            Err(_) => Err(Error::adapter(
                &self.config.name,
                AdapterErrorKind::Timeout,
                format!("no response within {}s", deadline.as_secs()),
            )),
        }
    }

    fn validate_prompt_length(&self, prompt: &str) -> PromptLengthCheck {
        match self.config.prompt_limit {
            Some(limit) if prompt.len() > limit => PromptLengthCheck::TooLong { limit },
            _ => PromptLengthCheck::Ok,
        }
    }
}
