//! Safe file operations with sandbox integration
//!
//! Paths are resolved against the session's current directory. Writes must
//! land inside the sandbox root; reads must be regular UTF-8 text files.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

use crate::session::Session;

/// Maximum file size for reading (10 MB)
const MAX_READ_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FileToolError {
    #[error("'{0}' is not a file")]
    NotAFile(String),
    #[error("permission denied reading '{0}'")]
    PermissionDenied(String),
    #[error("'{0}' is not a text file or has invalid encoding")]
    InvalidEncoding(String),
    #[error("'{path}' is too large to read ({size} bytes, max {max} bytes)")]
    TooLarge { path: String, size: u64, max: u64 },
    #[error("attempt to write outside of sandbox: '{0}'")]
    OutsideSandbox(String),
    #[error("parent directory of '{0}' does not exist")]
    MissingParent(String),
    #[error("error accessing '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FileToolError {
    fn io(path: &str, source: std::io::Error) -> Self {
        match source.kind() {
            ErrorKind::PermissionDenied => FileToolError::PermissionDenied(path.to_string()),
            _ => FileToolError::Io { path: path.to_string(), source },
        }
    }
}

/// Read a text file relative to the session's cwd
pub fn read_file(session: &Session, path: &str) -> Result<String, FileToolError> {
    let resolved = session.resolve(path);

    let metadata = match fs::metadata(&resolved) {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(FileToolError::NotAFile(path.to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(FileToolError::NotAFile(path.to_string()))
        }
        Err(e) => return Err(FileToolError::io(path, e)),
    };

    if metadata.len() > MAX_READ_SIZE {
        return Err(FileToolError::TooLarge {
            path: path.to_string(),
            size: metadata.len(),
            max: MAX_READ_SIZE,
        });
    }

    let bytes = fs::read(&resolved).map_err(|e| FileToolError::io(path, e))?;
    let content = String::from_utf8(bytes).map_err(|_| FileToolError::InvalidEncoding(path.to_string()))?;

    tracing::debug!(path = %resolved.display(), size = content.len(), "File read");
    Ok(content)
}

/// Create or overwrite a file inside the sandbox.
///
/// Missing parent directories are not created; the write fails instead.
pub fn write_file(session: &Session, path: &str, content: &str) -> Result<String, FileToolError> {
    let resolved: PathBuf = session.resolve(path);

    if !session.sandbox().contains_physical(&resolved) {
        tracing::debug!(path = %resolved.display(), root = %session.sandbox_root().display(), "Write outside sandbox refused");
        return Err(FileToolError::OutsideSandbox(path.to_string()));
    }

    if resolved.is_dir() {
        return Err(FileToolError::NotAFile(path.to_string()));
    }

    match resolved.parent() {
        Some(parent) if parent.is_dir() => {}
        _ => return Err(FileToolError::MissingParent(path.to_string())),
    }

    fs::write(&resolved, content).map_err(|source| FileToolError::Io {
        path: path.to_string(),
        source,
    })?;

    tracing::info!(path = %resolved.display(), bytes = content.len(), "File written");
    Ok(format!("Wrote {} bytes to {}", content.len(), path))
}
