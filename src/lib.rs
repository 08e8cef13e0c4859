//! sam-shell - AI Shell Assistant Library
//!
//! An interactive command-line agent with:
//! - A profile-driven safety gate in front of every shell command
//! - A sandboxed session bounding `cd` and file writes
//! - A command runner that streams output and honors interrupts
//! - A bounded agent loop driving an AI collaborator through tool calls
//!
//! # Example
//!
//! ```ignore
//! use sam_shell::security::SafetyProfile;
//! use sam_shell::session::Session;
//! use sam_shell::tools::{CommandRunner, InterruptSignal, ShellConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut session = Session::new(".", true)?;
//!     let runner = CommandRunner::new(ShellConfig::default());
//!     let outcome = runner.run(&mut session, "ls -la", &InterruptSignal::CtrlC).await;
//!     println!("{}", outcome.stdout);
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod agent;
pub mod config;
pub mod security;
pub mod session;
pub mod tools;
pub mod cli;

pub use agent::{
    CommandProcessor,
    Collaborator,
    Conversation,
    MistralClient,
    QueryOutcome,
    StopReason,
    Suggestion,
    ToolCall,
    ToolResult,
};

pub use config::Config;

pub use security::{is_safe, SafetyProfile, Sandbox};

pub use session::{HostEnv, Session};
