//! AI collaborator: the trait the agent loop talks to, the response parser,
//! and a Mistral chat-completions client

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::agent::cleaner::CommandCleaner;
use crate::agent::tools::{ToolCall, READ_FILE, SHELL_COMMAND, WRITE_FILE};
use crate::config::ProviderConfig;
use crate::types::{Message, Role};

pub const DEFAULT_BASE_URL: &str = "https://codestral.mistral.ai/v1";
pub const DEFAULT_MODEL: &str = "codestral-latest";

static JSON_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```json\s*(.*?)```").expect("json block pattern is valid")
});

/// A parsed collaborator reply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Suggestion {
    pub explanation: String,
    /// Cleaned shell command, or the target path of a file tool
    pub command: Option<String>,
    pub tool_call: Option<ToolCall>,
}

impl Suggestion {
    /// Plain-text answer with no tool call
    pub fn answer(explanation: impl Into<String>) -> Self {
        Self {
            explanation: explanation.into(),
            ..Self::default()
        }
    }

    /// Suggestion carrying a tool call
    pub fn with_tool(explanation: impl Into<String>, call: ToolCall) -> Self {
        let command = match call.tool.as_str() {
            SHELL_COMMAND => call.arg("command").map(str::to_string),
            READ_FILE | WRITE_FILE => call.arg("path").map(str::to_string),
            _ => None,
        };
        Self {
            explanation: explanation.into(),
            command,
            tool_call: Some(call),
        }
    }
}

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("missing API key for provider '{0}'")]
    MissingApiKey(String),
    #[error("network error communicating with provider: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Source of suggestions for the agent loop
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn suggest(
        &self,
        question: &str,
        cwd: &Path,
        history: &[Message],
    ) -> Result<Suggestion, CollaboratorError>;
}

/// Extracts explanation and tool call from free-form collaborator text
pub struct ResponseParser;

impl ResponseParser {
    pub fn parse(text: &str) -> Suggestion {
        let text = text.trim();

        let Some(captures) = JSON_BLOCK.captures(text) else {
            return Suggestion::answer(text);
        };
        let (Some(block), Some(body)) = (captures.get(0), captures.get(1)) else {
            return Suggestion::answer(text);
        };

        let mut explanation = text[..block.start()].trim().to_string();

        let parsed = serde_json::from_str::<serde_json::Value>(body.as_str().trim())
            .map_err(|e| e.to_string())
            .and_then(ToolCall::from_json);

        match parsed {
            Ok(mut call) => {
                if call.tool == SHELL_COMMAND {
                    if let Some(raw) = call.args.get_mut("command") {
                        *raw = CommandCleaner::clean(raw);
                    }
                }
                Suggestion::with_tool(explanation, call)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Collaborator emitted unparseable tool JSON");
                explanation.push_str(&format!("\n\n[Error parsing tool JSON: {}]", e));
                Suggestion::answer(explanation)
            }
        }
    }
}

/// System prompt describing the tools and the reply format
pub fn build_system_prompt() -> &'static str {
    r#"You are SAM, an AI command-line assistant for developers.

Your responsibilities:
- Explain commands clearly and concisely.
- Prefer portable POSIX-friendly commands.
- When a user writes a shell command, assume they want it executed.
- Never ask for confirmation, just run it via the tool call.
- Suggest safe commands and avoid destructive operations.
- When the user mentions a file, script or path, use the read_file or write_file tools instead of asking for its contents.
- When you modify a file, apply the change with write_file rather than printing the whole file back.

TOOLS AVAILABLE:
1. shell_command: run a single-line command. {"tool": "shell_command", "args": {"command": "<command>"}}
2. read_file: read a file's contents. {"tool": "read_file", "args": {"path": "<file_path>"}}
3. write_file: write content to a file. {"tool": "write_file", "args": {"path": "<file_path>", "content": "<content>"}}

RESPONSE RULES:
1. First explain what you are doing.
2. When a tool is helpful, output exactly one tool call inside a JSON code block:

```json
{"tool": "shell_command", "args": {"command": "ls -la"}}
```

3. If no tool is required, answer normally with no JSON block.
4. Pipes, redirections and command chaining are rejected; use one plain command per tool call.

Be concise, correct, and developer-friendly."#
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

impl ChatMessage {
    fn new(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Mistral (OpenAI-compatible) chat-completions client
#[derive(Clone)]
pub struct MistralClient {
    client: Arc<Client>,
    provider: ProviderConfig,
    api_key: String,
    shell_name: String,
}

impl std::fmt::Debug for MistralClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MistralClient")
            .field("model", &self.provider.model)
            .field("base_url", &self.provider.base_url)
            .finish_non_exhaustive()
    }
}

impl MistralClient {
    pub fn new(
        provider: ProviderConfig,
        api_key: impl Into<String>,
        shell: &Path,
    ) -> Result<Self, CollaboratorError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(CollaboratorError::MissingApiKey(provider.name.clone()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(provider.timeout_secs))
            .build()?;

        let shell_name = shell
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            client: Arc::new(client),
            provider,
            api_key,
            shell_name,
        })
    }

    /// Build from config, looking the key up via env, keyring, then file
    pub fn from_config(provider: &ProviderConfig, shell: &Path) -> Result<Self, CollaboratorError> {
        let api_key = crate::security::keyring::get_api_key(&provider.name)
            .map_err(|_| CollaboratorError::MissingApiKey(provider.name.clone()))?;
        Self::new(provider.clone(), api_key, shell)
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    fn context_line(&self, cwd: &Path) -> String {
        format!(
            "[OS={}, Shell={}, CWD={}]",
            std::env::consts::OS,
            self.shell_name,
            cwd.display()
        )
    }

    fn build_messages(&self, question: &str, cwd: &Path, history: &[Message]) -> Vec<ChatMessage> {
        let mut history = history;
        if let Some((last, rest)) = history.split_last() {
            if last.role == Role::User && last.content == question {
                history = rest;
            }
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new("system", build_system_prompt()));
        messages.extend(
            history
                .iter()
                .map(|m| ChatMessage::new(m.role.as_api_str(), m.content.clone())),
        );
        messages.push(ChatMessage::new(
            "user",
            format!("{}\n\n{}", self.context_line(cwd), question),
        ));
        messages
    }

    /// Send one chat completion and return the reply text
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, CollaboratorError> {
        let request = ChatRequest {
            model: &self.provider.model,
            messages,
            temperature: self.provider.temperature,
            max_tokens: self.provider.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.provider.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Api { status, body });
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CollaboratorError::MalformedResponse(e.to_string()))?;

        extract_content(&raw)
    }
}

/// Pull the assistant text out of a chat-completions response
fn extract_content(raw: &serde_json::Value) -> Result<String, CollaboratorError> {
    let content = raw
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"));

    match content {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(serde_json::Value::Array(parts)) => Ok(parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("")),
        Some(other) => Ok(other.to_string()),
        None => Err(CollaboratorError::MalformedResponse(
            "response has no choices[0].message.content".to_string(),
        )),
    }
}

#[async_trait]
impl Collaborator for MistralClient {
    async fn suggest(
        &self,
        question: &str,
        cwd: &Path,
        history: &[Message],
    ) -> Result<Suggestion, CollaboratorError> {
        let messages = self.build_messages(question, cwd, history);
        tracing::debug!(model = %self.provider.model, messages = messages.len(), "Requesting suggestion");
        let text = self.complete(messages).await?;
        Ok(ResponseParser::parse(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> MistralClient {
        MistralClient::new(ProviderConfig::default(), "test-key", Path::new("/usr/bin/zsh")).unwrap()
    }

    #[test]
    fn test_parse_plain_text() {
        let suggestion = ResponseParser::parse("  The answer is 42.  ");
        assert_eq!(suggestion, Suggestion::answer("The answer is 42."));
    }

    #[test]
    fn test_parse_shell_tool_cleans_command() {
        let text = "Let me check.\n\n```json\n{\"tool\": \"shell_command\", \"args\": {\"command\": \"`echo $HOME`\"}}\n```";
        let suggestion = ResponseParser::parse(text);
        assert_eq!(suggestion.explanation, "Let me check.");
        assert_eq!(suggestion.command.as_deref(), Some("printenv HOME"));
        let call = suggestion.tool_call.unwrap();
        assert_eq!(call.arg("command"), Some("printenv HOME"));
    }

    #[test]
    fn test_parse_file_tool_sets_path_as_command() {
        let text = "```json\n{\"tool\": \"read_file\", \"args\": {\"path\": \"Cargo.toml\"}}\n```";
        let suggestion = ResponseParser::parse(text);
        assert_eq!(suggestion.command.as_deref(), Some("Cargo.toml"));
        assert_eq!(suggestion.tool_call.unwrap().tool, READ_FILE);
    }

    #[test]
    fn test_parse_bad_json_becomes_annotated_text() {
        let text = "Trying.\n```json\n{\"tool\": \"shell_command\", args}\n```";
        let suggestion = ResponseParser::parse(text);
        assert!(suggestion.tool_call.is_none());
        assert!(suggestion.explanation.starts_with("Trying."));
        assert!(suggestion.explanation.contains("[Error parsing tool JSON:"));
    }

    #[test]
    fn test_duplicate_trailing_question_is_not_repeated() {
        let client = client();
        let history = vec![
            Message::new(Role::User, "earlier"),
            Message::new(Role::Assistant, "reply"),
            Message::new(Role::User, "list files"),
        ];
        let messages = client.build_messages("list files", Path::new("/tmp"), &history);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[3].role, "user");
        assert!(messages[3].content.starts_with("[OS="));
        assert!(messages[3].content.contains("Shell=zsh, CWD=/tmp]"));
        assert!(messages[3].content.ends_with("list files"));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let err = MistralClient::new(ProviderConfig::default(), "  ", Path::new("/bin/sh")).unwrap_err();
        assert!(matches!(err, CollaboratorError::MissingApiKey(_)));
    }

    #[test]
    fn test_extract_content_shapes() {
        let text = serde_json::json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(extract_content(&text).unwrap(), "hi");

        let parts = serde_json::json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "a"}, {"type": "text", "text": "b"}
        ]}}]});
        assert_eq!(extract_content(&parts).unwrap(), "ab");

        let empty = serde_json::json!({"choices": []});
        assert!(extract_content(&empty).is_err());
    }
}
