//! Working-directory session and host environment snapshot

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::security::sandbox::{normalize_path, Sandbox};

/// Environment variable marking a process as running inside a session
pub const NESTED_MARKER: &str = "SAM_SHELL_ACTIVE";

/// Shell used when `SHELL` is not set
pub const DEFAULT_SHELL: &str = "/bin/sh";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("directory does not exist")]
    NotADirectory,
    #[error("directory is outside of sandbox")]
    OutsideSandbox,
    #[error("sandbox root '{0}' is not a directory")]
    InvalidRoot(PathBuf),
    #[error("already running inside a sam session ({NESTED_MARKER} is set)")]
    Nested,
}

/// Snapshot of the environment the session was started from.
///
/// Injected instead of read from the process so nesting checks and shell
/// selection are testable without mutating real process state.
#[derive(Debug, Clone, Default)]
pub struct HostEnv {
    vars: HashMap<String, String>,
}

impl HostEnv {
    /// Capture the current process environment
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Fail if this process was itself spawned from a session
    pub fn ensure_not_nested(&self) -> Result<(), SessionError> {
        match self.get(NESTED_MARKER) {
            Some(value) if !value.is_empty() => Err(SessionError::Nested),
            _ => Ok(()),
        }
    }

    /// Shell used to run non-builtin commands
    pub fn shell(&self) -> PathBuf {
        self.get("SHELL")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SHELL))
    }

    pub fn home(&self) -> Option<PathBuf> {
        self.get("HOME").map(PathBuf::from).or_else(dirs::home_dir)
    }
}

/// Current directory plus the sandbox that bounds it
#[derive(Debug, Clone)]
pub struct Session {
    sandbox: Sandbox,
    cwd: PathBuf,
    sandboxed: bool,
    home: Option<PathBuf>,
}

impl Session {
    /// Start a session in `root`, which becomes both sandbox root and cwd
    pub fn new(root: impl AsRef<Path>, sandboxed: bool) -> Result<Self, SessionError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(SessionError::InvalidRoot(root.to_path_buf()));
        }
        let sandbox = Sandbox::new(root);
        Ok(Self {
            cwd: sandbox.root().to_path_buf(),
            sandbox,
            sandboxed,
            home: dirs::home_dir(),
        })
    }

    /// Override the home directory used for `~` and bare `cd`
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn sandbox_root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn is_sandboxed(&self) -> bool {
        self.sandboxed
    }

    /// Resolve a user-supplied path against the cwd
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.sandbox.resolve(&self.cwd, &self.expand_home(path))
    }

    /// Change directory. `None` goes to the sandbox root when sandboxed,
    /// otherwise to the home directory.
    pub fn change_directory(&mut self, target: Option<&str>) -> Result<(), SessionError> {
        let new_path = match target.filter(|t| !t.is_empty()) {
            Some(path) => self.resolve(path),
            None if self.sandboxed => self.sandbox.root().to_path_buf(),
            None => self
                .home
                .clone()
                .map(|h| normalize_path(&h))
                .ok_or(SessionError::NotADirectory)?,
        };

        if self.sandboxed && !self.sandbox.contains_physical(&new_path) {
            return Err(SessionError::OutsideSandbox);
        }
        if !new_path.is_dir() {
            return Err(SessionError::NotADirectory);
        }

        tracing::debug!(from = %self.cwd.display(), to = %new_path.display(), "Changed directory");
        self.cwd = new_path;
        Ok(())
    }

    /// Cwd with the home prefix abbreviated to `~`
    pub fn display_cwd(&self) -> String {
        if let Some(home) = &self.home {
            if let Ok(rest) = self.cwd.strip_prefix(home) {
                if rest.as_os_str().is_empty() {
                    return "~".to_string();
                }
                return format!("~/{}", rest.display());
            }
        }
        self.cwd.display().to_string()
    }

    fn expand_home(&self, path: &str) -> String {
        match (&self.home, path.strip_prefix('~')) {
            (Some(home), Some(rest)) if rest.is_empty() || rest.starts_with('/') => {
                format!("{}{}", home.display(), rest)
            }
            _ => path.to_string(),
        }
    }
}
