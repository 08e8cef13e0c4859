//! Security module
//!
//! Provides the guards that sit in front of every execution:
//! - Command safety gate (profile-driven token denylist)
//! - File system sandbox (path containment)
//! - OS keyring integration for API keys

pub mod gate;
pub mod keyring;
pub mod sandbox;

pub use gate::{check_command, is_safe, SafetyProfile, Verdict};
pub use sandbox::{normalize_path, Sandbox};
