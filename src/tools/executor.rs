//! Sandboxed execution of evidence tool requests.
//!
//! Policy, in order of enforcement:
//! - paths resolve against the configured working directory and must stay
//!   inside a permitted root; absolute paths are allowed but logged
//! - file size is checked against the 1 MiB ceiling before reading
//! - binary content (null byte in the first 8 KiB) is refused
//! - commands come from a fixed whitelist, run with argument arrays and a
//!   sanitized environment (PATH only), never through a shell
//! - every invocation carries its own deadline
//!
//! Failures become `ToolExecutionRecord { success: false }`; they never
//! abort the round or the sibling executions.

use futures::future::join_all;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{ToolExecutionRecord, ToolRequest};
use crate::config::ToolConfig;
use crate::error::{Error, Result};

/// Commands `run_command` may execute. Exhaustive.
pub const COMMAND_WHITELIST: &[&str] = &["ls", "grep", "find", "cat", "head", "tail"];

const SEARCH_MATCH_LIMIT: usize = 100;
const LIST_PATH_LIMIT: usize = 200;
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// Executes evidence tools within a policy boundary.
pub struct ToolExecutor {
    working_dir: PathBuf,
    permitted_roots: Vec<PathBuf>,
    config: ToolConfig,
}

impl ToolExecutor {
    /// Create an executor rooted at `working_dir`, which is also the only
    /// permitted root until more are added.
    pub fn new(working_dir: impl Into<PathBuf>, config: ToolConfig) -> Self {
        let working_dir = working_dir.into();
        Self {
            permitted_roots: vec![working_dir.clone()],
            working_dir,
            config,
        }
    }

    /// Permit an additional root for path resolution.
    pub fn with_permitted_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.permitted_roots.push(root.into());
        self
    }

    /// Execute all of a round's tool requests concurrently, bounded by the
    /// configured worker pool, with individual deadlines. Returns one
    /// record per request, sorted by (requester, tool name) for canonical
    /// reporting.
    pub async fn execute_round(
        &self,
        requests: Vec<(String, ToolRequest)>,
        round_num: u32,
    ) -> Vec<ToolExecutionRecord> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let deadline = Duration::from_secs(self.config.timeout_secs);

        let tasks: Vec<_> = requests
            .into_iter()
            .map(|(participant_id, request)| {
                let executor = self;
                let semaphore = Arc::clone(&semaphore);

                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("Semaphore closed unexpectedly");

                    let start = Instant::now();
                    let outcome = timeout(deadline, executor.execute_one(&request)).await;
                    let elapsed_ms = start.elapsed().as_millis() as u64;

                    match outcome {
                        Ok(Ok(output)) => ToolExecutionRecord::success(
                            participant_id,
                            &request,
                            output,
                            elapsed_ms,
                            round_num,
                        ),
                        Ok(Err(error)) => ToolExecutionRecord::failure(
                            participant_id,
                            &request,
                            error.to_string(),
                            elapsed_ms,
                            round_num,
                        ),
                        Err(_) => ToolExecutionRecord::failure(
                            participant_id,
                            &request,
                            format!("timed out after {}s", deadline.as_secs()),
                            elapsed_ms,
                            round_num,
                        ),
                    }
                }
            })
            .collect();

        let mut records = join_all(tasks).await;
        records.sort_by(|a, b| {
            (a.requesting_participant_id.as_str(), a.tool_name.as_str())
                .cmp(&(b.requesting_participant_id.as_str(), b.tool_name.as_str()))
        });
        records
    }

    /// Execute a single request. Errors map to record failures upstream.
    pub async fn execute_one(&self, request: &ToolRequest) -> Result<String> {
        match request {
            ToolRequest::ReadFile { path } => self.read_file(path).await,
            ToolRequest::SearchCode { pattern, path } => self.search_code(pattern, path).await,
            ToolRequest::ListFiles { pattern, path } => {
                self.list_files(pattern, path.as_deref()).await
            }
            ToolRequest::RunCommand { command, args } => self.run_command(command, args).await,
        }
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let resolved = self.resolve_path(path)?;

        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| Error::tool(format!("path '{}' not accessible: {}", path, e)))?;
        if !metadata.is_file() {
            return Err(Error::tool(format!("'{}' is not a regular file", path)));
        }
        if metadata.len() > self.config.max_file_bytes {
            return Err(Error::tool(format!(
                "'{}' is {} bytes, over the {} byte limit",
                path,
                metadata.len(),
                self.config.max_file_bytes
            )));
        }

        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| Error::tool(format!("failed to read '{}': {}", path, e)))?;

        let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
        if sniff.contains(&0u8) {
            return Err(Error::tool(format!("'{}' looks binary", path)));
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn search_code(&self, pattern: &str, path: &str) -> Result<String> {
        let regex =
            Regex::new(pattern).map_err(|e| Error::tool(format!("invalid pattern: {}", e)))?;
        let root = self.resolve_path(path)?;
        if !root.exists() {
            return Err(Error::tool(format!("path '{}' not found", path)));
        }

        let max_file_bytes = self.config.max_file_bytes;
        let result = tokio::task::spawn_blocking(move || {
            search_tree(&regex, &root, max_file_bytes, SEARCH_MATCH_LIMIT)
        })
        .await
        .map_err(|e| Error::Internal(format!("search task failed: {}", e)))?;

        let (mut lines, truncated) = result?;
        if truncated {
            lines.push(format!(
                "... output truncated at {} matches",
                SEARCH_MATCH_LIMIT
            ));
        }
        if lines.is_empty() {
            return Ok("no matches".to_string());
        }
        Ok(lines.join("\n"))
    }

    async fn list_files(&self, pattern: &str, path: Option<&str>) -> Result<String> {
        let root = match path {
            Some(path) => self.resolve_path(path)?,
            None => self.working_dir.clone(),
        };
        if !root.exists() {
            return Err(Error::tool(format!(
                "path '{}' not found",
                root.display()
            )));
        }

        // The glob pattern participates in path construction, so its
        // literal prefix must pass the same containment check as any
        // other tool path.
        let joined = root.join(pattern);
        if !self.glob_prefix_permitted(&joined) {
            warn!(pattern, "list_files pattern escapes permitted roots");
            return Err(Error::tool(format!(
                "pattern '{}' is outside permitted roots",
                pattern
            )));
        }

        let glob_expr = joined.to_string_lossy().into_owned();
        let entries = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let paths = glob::glob(&glob_expr)
                .map_err(|e| Error::tool(format!("invalid glob pattern: {}", e)))?;

            let mut out: Vec<String> = paths
                .filter_map(|entry| entry.ok())
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            out.sort();
            Ok(out)
        })
        .await
        .map_err(|e| Error::Internal(format!("list task failed: {}", e)))??;

        let total = entries.len();
        let mut shown: Vec<String> = entries.into_iter().take(LIST_PATH_LIMIT).collect();
        if total > LIST_PATH_LIMIT {
            shown.push(format!(
                "... {} more paths not shown",
                total - LIST_PATH_LIMIT
            ));
        }
        if shown.is_empty() {
            return Ok("no matching paths".to_string());
        }
        Ok(shown.join("\n"))
    }

    async fn run_command(&self, command: &str, args: &[String]) -> Result<String> {
        if !COMMAND_WHITELIST.contains(&command) {
            return Err(Error::tool(format!(
                "command '{}' is not whitelisted",
                command
            )));
        }

        let binary = which::which(command)
            .map_err(|e| Error::tool(format!("command '{}' not found: {}", command, e)))?;

        // Argument arrays only; sanitized environment; no shell.
        let output = tokio::process::Command::new(binary)
            .args(args)
            .current_dir(&self.working_dir)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::tool(format!("failed to run '{}': {}", command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::tool(format!(
                "'{}' exited with {}: {}",
                command,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Resolve a request path against the working directory and enforce
    /// the permitted-root policy.
    fn resolve_path(&self, raw: &str) -> Result<PathBuf> {
        let expanded = shellexpand::tilde(raw).into_owned();
        let candidate = PathBuf::from(&expanded);

        if candidate.is_absolute() {
            debug!(path = %candidate.display(), "absolute path in tool request");
        }

        let joined = if candidate.is_absolute() {
            candidate
        } else {
            self.working_dir.join(candidate)
        };

        // Canonicalize when possible so `..` segments cannot escape the
        // roots; fall back to the joined path for not-yet-existing targets
        // (existence errors surface per-tool).
        let resolved = joined.canonicalize().unwrap_or(joined);

        if !self.path_permitted(&resolved) {
            warn!(path = %resolved.display(), "tool path outside permitted roots");
            return Err(Error::tool(format!(
                "path '{}' is outside permitted roots",
                raw
            )));
        }

        Ok(resolved)
    }

    fn path_permitted(&self, path: &Path) -> bool {
        self.permitted_roots.iter().any(|root| {
            let root = root.canonicalize().unwrap_or_else(|_| root.clone());
            path.starts_with(&root)
        })
    }

    /// Check the literal (non-wildcard) prefix of a glob path against the
    /// permitted roots, so `..` segments or absolute patterns cannot walk
    /// the expansion out of the sandbox.
    fn glob_prefix_permitted(&self, glob_path: &Path) -> bool {
        let mut prefix = PathBuf::new();
        for component in glob_path.components() {
            let text = component.as_os_str().to_string_lossy();
            if text.chars().any(|c| matches!(c, '*' | '?' | '[')) {
                break;
            }
            prefix.push(component);
        }
        let resolved = prefix.canonicalize().unwrap_or(prefix);
        self.path_permitted(&resolved)
    }
}

/// Walk `root`, collecting `file:line: text` matches up to `limit`.
fn search_tree(
    regex: &Regex,
    root: &Path,
    max_file_bytes: u64,
    limit: usize,
) -> Result<(Vec<String>, bool)> {
    let glob_expr = if root.is_dir() {
        root.join("**/*").to_string_lossy().into_owned()
    } else {
        root.to_string_lossy().into_owned()
    };

    let mut matches = Vec::new();
    let paths =
        glob::glob(&glob_expr).map_err(|e| Error::tool(format!("invalid search root: {}", e)))?;

    for entry in paths.filter_map(|entry| entry.ok()) {
        if !entry.is_file() {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            if metadata.len() > max_file_bytes {
                continue;
            }
        }
        let Ok(content) = std::fs::read_to_string(&entry) else {
            continue; // unreadable or non-UTF-8
        };

        for (line_idx, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(format!("{}:{}: {}", entry.display(), line_idx + 1, line));
                if matches.len() >= limit {
                    return Ok((matches, true));
                }
            }
        }
    }

    Ok((matches, false))
}
