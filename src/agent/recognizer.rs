//! Heuristic routing of user input: shell command or natural language

use std::path::Path;

use crate::tools::shell;

/// Words that usually open a question
const QUESTION_WORDS: &[&str] = &[
    "what", "who", "when", "where", "why", "how", "which", "is", "list", "show", "find", "get",
    "can", "do", "does",
];

/// Shell builtins that never resolve on PATH
const BUILTIN_COMMANDS: &[&str] = &[
    "cd", "echo", "export", "alias", "unalias", "exit", "quit", "history", "source", "jobs", "fg",
    "bg", "kill", "type",
];

pub struct CommandRecognizer;

impl CommandRecognizer {
    /// Whether `text` looks like something to hand to the shell
    pub fn is_shell_command(text: &str) -> bool {
        let Some(first) = text.split_whitespace().next() else {
            return false;
        };
        let command = first.to_lowercase();

        if QUESTION_WORDS.contains(&command.as_str()) {
            return false;
        }
        if BUILTIN_COMMANDS.contains(&command.as_str()) {
            return true;
        }
        if which::which(first).is_ok() {
            return true;
        }
        is_executable_file(Path::new(first))
    }

    pub fn is_interactive(text: &str) -> bool {
        shell::is_interactive(text)
    }
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}
