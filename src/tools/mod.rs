//! Evidence tools requested by participants during a debate.
//!
//! Models embed `TOOL_REQUEST:` markers to ask for read-only evidence:
//! file contents, code search hits, directory listings, or the output of
//! a small whitelist of commands. Results are shared with every
//! participant in the following round.
//!
//! The tool set is closed; requests are validated structurally during
//! marker parsing (serde) and by policy (paths, sizes, whitelist) at
//! execution time.

mod executor;

pub use executor::{ToolExecutor, COMMAND_WHITELIST};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A validated request to run one evidence tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolRequest {
    /// Read one file as UTF-8 text.
    ReadFile { path: String },
    /// Search file contents for a regex pattern under a directory.
    SearchCode { pattern: String, path: String },
    /// List paths matching a glob pattern.
    ListFiles {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Run a whitelisted command with an argument array.
    RunCommand {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl ToolRequest {
    /// The wire name of the requested tool.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "read_file",
            Self::SearchCode { .. } => "search_code",
            Self::ListFiles { .. } => "list_files",
            Self::RunCommand { .. } => "run_command",
        }
    }

    /// The argument record as JSON, for execution records and prompts.
    pub fn arguments_json(&self) -> Value {
        match self {
            Self::ReadFile { path } => json!({ "path": path }),
            Self::SearchCode { pattern, path } => json!({ "pattern": pattern, "path": path }),
            Self::ListFiles { pattern, path } => match path {
                Some(path) => json!({ "pattern": pattern, "path": path }),
                None => json!({ "pattern": pattern }),
            },
            Self::RunCommand { command, args } => json!({ "command": command, "args": args }),
        }
    }
}

/// Outcome of one tool execution, success or failure.
///
/// Failures are data: they are reported to the models in the next round
/// and never abort the round that requested them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub requesting_participant_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub round_num: u32,
    pub timestamp: DateTime<Utc>,
}

impl ToolExecutionRecord {
    /// Create a success record.
    pub fn success(
        participant_id: impl Into<String>,
        request: &ToolRequest,
        output: String,
        elapsed_ms: u64,
        round_num: u32,
    ) -> Self {
        Self {
            requesting_participant_id: participant_id.into(),
            tool_name: request.tool_name().to_string(),
            arguments: request.arguments_json(),
            success: true,
            output,
            error: None,
            elapsed_ms,
            round_num,
            timestamp: Utc::now(),
        }
    }

    /// Create a failure record.
    pub fn failure(
        participant_id: impl Into<String>,
        request: &ToolRequest,
        error: impl Into<String>,
        elapsed_ms: u64,
        round_num: u32,
    ) -> Self {
        Self {
            requesting_participant_id: participant_id.into(),
            tool_name: request.tool_name().to_string(),
            arguments: request.arguments_json(),
            success: false,
            output: String::new(),
            error: Some(error.into()),
            elapsed_ms,
            round_num,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tool_request_wire_format() {
        let request: ToolRequest = serde_json::from_str(
            r#"{"name":"search_code","arguments":{"pattern":"fn main","path":"src"}}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            ToolRequest::SearchCode {
                pattern: "fn main".to_string(),
                path: "src".to_string(),
            }
        );
        assert_eq!(request.tool_name(), "search_code");
    }

    #[test]
    fn test_list_files_path_is_optional() {
        let request: ToolRequest =
            serde_json::from_str(r#"{"name":"list_files","arguments":{"pattern":"**/*.rs"}}"#)
                .unwrap();
        assert_eq!(
            request,
            ToolRequest::ListFiles {
                pattern: "**/*.rs".to_string(),
                path: None,
            }
        );
    }

    #[test]
    fn test_run_command_args_default_empty() {
        let request: ToolRequest =
            serde_json::from_str(r#"{"name":"run_command","arguments":{"command":"ls"}}"#).unwrap();
        assert_eq!(
            request,
            ToolRequest::RunCommand {
                command: "ls".to_string(),
                args: Vec::new(),
            }
        );
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let result: std::result::Result<ToolRequest, _> =
            serde_json::from_str(r#"{"name":"write_file","arguments":{"path":"x"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_arguments_json_round_trip() {
        let request = ToolRequest::RunCommand {
            command: "grep".to_string(),
            args: vec!["-n".to_string(), "TODO".to_string()],
        };
        assert_eq!(
            request.arguments_json(),
            serde_json::json!({"command": "grep", "args": ["-n", "TODO"]})
        );
    }
}
