//! Bounded conversation history fed back to the collaborator

use crate::agent::tools::{ToolCall, ToolResult};

pub use crate::types::{Message, Role};

/// Default cap on retained entries
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Default cap on recorded tool output, in characters
pub const DEFAULT_MAX_TOOL_OUTPUT_CHARS: usize = 2000;

/// Marker appended to truncated tool output
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Append-only transcript with FIFO eviction
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
    max_entries: usize,
    max_tool_output_chars: usize,
}

impl Conversation {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_ENTRIES, DEFAULT_MAX_TOOL_OUTPUT_CHARS)
    }

    pub fn with_limits(max_entries: usize, max_tool_output_chars: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_entries: max_entries.max(1),
            max_tool_output_chars,
        }
    }

    /// Add a message, evicting the oldest entries past the cap
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));

        if self.messages.len() > self.max_entries {
            let excess = self.messages.len() - self.max_entries;
            self.messages.drain(..excess);
        }
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.add_message(Role::User, content);
    }

    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.add_message(Role::Assistant, content);
    }

    /// Record an assistant turn that proposed a tool call
    pub fn add_suggestion(&mut self, explanation: &str, call: &ToolCall) {
        let explanation = explanation.trim();
        let content = if explanation.is_empty() {
            format!("```json\n{}\n```", call.to_json())
        } else {
            format!("{}\n\n```json\n{}\n```", explanation, call.to_json())
        };
        self.add_assistant(content);
    }

    /// Record a tool outcome as an assistant turn
    pub fn add_tool_result(&mut self, result: &ToolResult) {
        let status = if result.success { "Success" } else { "Failure" };
        let output = truncate_chars(result.message(), self.max_tool_output_chars);
        self.add_assistant(format!(
            "Context: The last command produced the following output...\nStatus: {}\n```\n{}\n```",
            status, output
        ));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
