//! Tool definitions for the agent
//!
//! A [`ToolCall`] is the loose `{tool, args}` shape the collaborator emits.
//! It is validated into a closed [`ToolAction`] before anything runs, and
//! [`execute_tool`] is the single chokepoint through which every process
//! spawn and file access passes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;

use crate::session::Session;
use crate::tools::filesystem;
use crate::tools::shell::{CommandRunner, InterruptSignal};

/// Wire names of the supported tools
pub const SHELL_COMMAND: &str = "shell_command";
pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";

/// Structured tool request, as emitted by the collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Shell command tool call, as synthesized for direct commands
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new(SHELL_COMMAND).with_arg("command", command)
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    /// Build from arbitrary JSON, stringifying non-string argument values
    pub fn from_json(value: serde_json::Value) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "tool call must be a JSON object".to_string())?;
        let tool = object
            .get("tool")
            .and_then(|t| t.as_str())
            .ok_or_else(|| "missing string field 'tool'".to_string())?
            .to_string();

        let mut args = BTreeMap::new();
        match object.get("args") {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::Object(map)) => {
                for (key, value) in map {
                    let value = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    args.insert(key.clone(), value);
                }
            }
            Some(_) => return Err("field 'args' must be an object".to_string()),
        }

        Ok(Self { tool, args })
    }

    /// Compact JSON rendering for transcripts and prompts
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"tool\":\"{}\"}}", self.tool))
    }
}

/// Validated tool request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolAction {
    ShellCommand { command: String },
    ReadFile { path: String },
    WriteFile { path: String, content: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("no command provided")]
    NoCommand,
    #[error("no path provided")]
    NoPath,
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
}

impl TryFrom<&ToolCall> for ToolAction {
    type Error = ToolCallError;

    fn try_from(call: &ToolCall) -> Result<Self, Self::Error> {
        match call.tool.as_str() {
            SHELL_COMMAND => match call.arg("command").map(str::trim) {
                Some(command) if !command.is_empty() => Ok(ToolAction::ShellCommand {
                    command: command.to_string(),
                }),
                _ => Err(ToolCallError::NoCommand),
            },
            READ_FILE => Ok(ToolAction::ReadFile {
                path: call.arg("path").unwrap_or_default().to_string(),
            }),
            WRITE_FILE => match call.arg("path") {
                Some(path) if !path.trim().is_empty() => Ok(ToolAction::WriteFile {
                    path: path.to_string(),
                    content: call.arg("content").unwrap_or_default().to_string(),
                }),
                _ => Err(ToolCallError::NoPath),
            },
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }
}

/// Tool execution result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub execution_time_seconds: f64,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>, started: Instant) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: String::new(),
            execution_time_seconds: started.elapsed().as_secs_f64(),
        }
    }

    pub fn failure(error: impl Into<String>, started: Instant) -> Self {
        Self::failure_with_output(String::new(), error, started)
    }

    fn failure_with_output(output: impl Into<String>, error: impl Into<String>, started: Instant) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: error.into(),
            execution_time_seconds: started.elapsed().as_secs_f64(),
        }
    }

    /// Text to show and record: output on success, error otherwise
    pub fn message(&self) -> &str {
        if self.success {
            &self.output
        } else {
            &self.error
        }
    }
}

/// Everything a tool needs to run
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session: Session,
    pub runner: CommandRunner,
    pub interrupt: InterruptSignal,
}

impl ToolContext {
    pub fn new(session: Session, runner: CommandRunner) -> Self {
        Self {
            session,
            runner,
            interrupt: InterruptSignal::CtrlC,
        }
    }

    pub fn with_interrupt(mut self, interrupt: InterruptSignal) -> Self {
        self.interrupt = interrupt;
        self
    }
}

/// Execute a tool call, normalizing every outcome into a [`ToolResult`]
pub async fn execute_tool(call: &ToolCall, ctx: &mut ToolContext) -> ToolResult {
    let started = Instant::now();

    let action = match ToolAction::try_from(call) {
        Ok(action) => action,
        Err(e) => {
            tracing::debug!(tool = %call.tool, error = %e, "Rejected tool call");
            return ToolResult::failure(e.to_string(), started);
        }
    };

    match action {
        ToolAction::ShellCommand { command } => {
            let outcome = ctx.runner.run(&mut ctx.session, &command, &ctx.interrupt).await;
            if outcome.ok {
                ToolResult::ok(outcome.stdout, started)
            } else {
                let error = if outcome.stderr.trim().is_empty() {
                    format!("command exited with status {}", outcome.exit_code)
                } else {
                    outcome.stderr.clone()
                };
                ToolResult::failure_with_output(outcome.stderr, error, started)
            }
        }
        ToolAction::ReadFile { path } => match filesystem::read_file(&ctx.session, &path) {
            Ok(content) => ToolResult::ok(content, started),
            Err(e) => ToolResult::failure(e.to_string(), started),
        },
        ToolAction::WriteFile { path, content } => {
            match filesystem::write_file(&ctx.session, &path, &content) {
                Ok(message) => ToolResult::ok(message, started),
                Err(e) => ToolResult::failure(e.to_string(), started),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SafetyProfile;
    use crate::tools::shell::ShellConfig;
    use tempfile::TempDir;

    fn context(profile: SafetyProfile) -> (TempDir, ToolContext) {
        let temp = TempDir::new().unwrap();
        let session = Session::new(temp.path(), true).unwrap();
        let runner = CommandRunner::new(ShellConfig {
            profile,
            shell: "/bin/sh".into(),
            ..ShellConfig::default()
        });
        let ctx = ToolContext::new(session, runner).with_interrupt(InterruptSignal::Never);
        (temp, ctx)
    }

    #[test]
    fn test_tool_call_from_json_stringifies_args() {
        let call = ToolCall::from_json(serde_json::json!({
            "tool": "write_file",
            "args": {"path": "n.txt", "content": 42}
        }))
        .unwrap();
        assert_eq!(call.arg("content"), Some("42"));
        assert!(ToolCall::from_json(serde_json::json!(["tool"])).is_err());
        assert!(ToolCall::from_json(serde_json::json!({"args": {}})).is_err());
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(
            ToolAction::try_from(&ToolCall::new(SHELL_COMMAND)),
            Err(ToolCallError::NoCommand)
        );
        assert_eq!(
            ToolAction::try_from(&ToolCall::shell("   ")),
            Err(ToolCallError::NoCommand)
        );
        assert_eq!(
            ToolAction::try_from(&ToolCall::new(WRITE_FILE).with_arg("content", "x")),
            Err(ToolCallError::NoPath)
        );
        assert_eq!(
            ToolAction::try_from(&ToolCall::new("delete_everything")),
            Err(ToolCallError::UnknownTool("delete_everything".into()))
        );
    }

    #[test]
    fn test_write_file_content_defaults_to_empty() {
        let action = ToolAction::try_from(&ToolCall::new(WRITE_FILE).with_arg("path", "empty.txt")).unwrap();
        assert_eq!(
            action,
            ToolAction::WriteFile { path: "empty.txt".into(), content: String::new() }
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_message() {
        let (_temp, mut ctx) = context(SafetyProfile::Standard);
        let result = execute_tool(&ToolCall::new("browse"), &mut ctx).await;
        assert!(!result.success);
        assert_eq!(result.error, "unknown tool 'browse'");
    }

    #[tokio::test]
    async fn test_forbidden_shell_command_is_blocked() {
        let (_temp, mut ctx) = context(SafetyProfile::Standard);
        let result = execute_tool(&ToolCall::shell("rm -rf /"), &mut ctx).await;
        assert!(!result.success);
        assert!(result.error.contains("forbidden word: rm"));
    }

    #[tokio::test]
    async fn test_shell_success_output_is_stdout() {
        let (_temp, mut ctx) = context(SafetyProfile::Standard);
        let result = execute_tool(&ToolCall::shell("echo dispatched"), &mut ctx).await;
        assert!(result.success);
        assert_eq!(result.output, "dispatched\n");
        assert_eq!(result.message(), "dispatched\n");
        assert!(result.execution_time_seconds >= 0.0);
    }

    #[tokio::test]
    async fn test_shell_failure_output_is_stderr() {
        let (_temp, mut ctx) = context(SafetyProfile::Standard);
        let result = execute_tool(&ToolCall::shell("ls definitely_missing_entry"), &mut ctx).await;
        assert!(!result.success);
        assert!(result.output.contains("definitely_missing_entry"));
        assert_eq!(result.output, result.error);
    }

    #[tokio::test]
    async fn test_file_tools_through_dispatcher() {
        let (_temp, mut ctx) = context(SafetyProfile::Standard);
        let write = ToolCall::new(WRITE_FILE)
            .with_arg("path", "plan.md")
            .with_arg("content", "# Plan\n");
        assert!(execute_tool(&write, &mut ctx).await.success);

        let read = execute_tool(&ToolCall::new(READ_FILE).with_arg("path", "plan.md"), &mut ctx).await;
        assert!(read.success);
        assert_eq!(read.output, "# Plan\n");

        let dir = execute_tool(&ToolCall::new(READ_FILE).with_arg("path", "."), &mut ctx).await;
        assert!(!dir.success);
        assert!(dir.error.contains("not a file"));
    }
}
