//! Agent module - collaborator, tool dispatch, conversation and the loop

pub mod cleaner;
pub mod conversation;
pub mod interactive;
pub mod llm;
pub mod recognizer;
pub mod tool_loop;
pub mod tools;

pub use cleaner::CommandCleaner;
pub use conversation::Conversation;
pub use llm::{Collaborator, CollaboratorError, MistralClient, ResponseParser, Suggestion};
pub use recognizer::CommandRecognizer;
pub use tool_loop::{
    CommandProcessor, LoopLimits, ProcessorHooks, ProcessorState, QueryContext, QueryOutcome,
    Step, StopReason,
};
pub use tools::{execute_tool, ToolAction, ToolCall, ToolCallError, ToolContext, ToolResult};
