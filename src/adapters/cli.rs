//! CLI subprocess adapter.
//!
//! Wraps a local LLM CLI (e.g. `claude`, `codex`): the prompt goes to
//! the subprocess on stdin, the response comes back on stdout. The
//! subprocess is killed when the deadline lapses or the invocation is
//! dropped.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, timeout};
use tracing::debug;

use super::{Adapter, PromptLengthCheck, RetryConfig};
use crate::error::{AdapterErrorKind, Error, Result};

/// Configuration for one CLI-backed adapter.
#[derive(Debug, Clone)]
pub struct CliAdapterConfig {
    /// Registered adapter name.
    pub name: String,
    /// Binary to execute; resolved through PATH when not absolute.
    pub command: String,
    /// Arguments placed before the model flag.
    pub base_args: Vec<String>,
    /// Flag used to pass the model id (e.g. "--model").
    pub model_flag: Option<String>,
    /// Maximum prompt length in characters, when the CLI has one.
    pub prompt_limit: Option<usize>,
    /// Retry policy for transport failures.
    pub retry: RetryConfig,
}

impl CliAdapterConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            base_args: Vec::new(),
            model_flag: Some("--model".to_string()),
            prompt_limit: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    pub fn with_prompt_limit(mut self, limit: usize) -> Self {
        self.prompt_limit = Some(limit);
        self
    }
}

/// Adapter invoking a local CLI subprocess per request.
pub struct CliAdapter {
    config: CliAdapterConfig,
    binary: PathBuf,
}

impl CliAdapter {
    /// Resolve the binary up front so a missing CLI fails at registration
    /// time, not mid-deliberation.
    pub fn new(config: CliAdapterConfig) -> Result<Self> {
        let expanded = shellexpand::tilde(&config.command).into_owned();
        let binary = which::which(&expanded).map_err(|e| {
            Error::Config(format!("CLI '{}' not found: {}", config.command, e))
        })?;
        debug!(adapter = %config.name, binary = %binary.display(), "CLI adapter resolved");
        Ok(Self { config, binary })
    }

    async fn invoke_once(&self, model_id: &str, prompt: &str) -> Result<String> {
        let mut command = tokio::process::Command::new(&self.binary);
        command
            .args(&self.config.base_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(flag) = &self.config.model_flag {
            command.arg(flag).arg(model_id);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::adapter(
                &self.config.name,
                AdapterErrorKind::Transport,
                format!("failed to spawn '{}': {}", self.config.command, e),
            )
        })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            Error::adapter(
                &self.config.name,
                AdapterErrorKind::Transport,
                "no stdin handle",
            )
        })?;
        stdin.write_all(prompt.as_bytes()).await.map_err(|e| {
            Error::adapter(
                &self.config.name,
                AdapterErrorKind::Transport,
                format!("failed to write prompt: {}", e),
            )
        })?;
        drop(stdin);

        let output = child.wait_with_output().await.map_err(|e| {
            Error::adapter(
                &self.config.name,
                AdapterErrorKind::Transport,
                format!("subprocess I/O failed: {}", e),
            )
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let kind = classify_cli_failure(&stderr);
            return Err(Error::adapter(
                &self.config.name,
                kind,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        // Raw text, no adapter-introduced wrapping.
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
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

/// Map a CLI's stderr onto the adapter error taxonomy.
fn classify_cli_failure(stderr: &str) -> AdapterErrorKind {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests")
    {
        AdapterErrorKind::RateLimited
    } else if lower.contains("unauthorized")
        || lower.contains("authentication")
        || lower.contains("api key")
    {
        AdapterErrorKind::Auth
    } else if lower.contains("unknown model") || lower.contains("invalid model") {
        AdapterErrorKind::InvalidModel
    } else {
        AdapterErrorKind::Transport
    }
}

#[async_trait]
impl Adapter for CliAdapter {
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
