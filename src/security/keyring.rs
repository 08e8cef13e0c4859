//! Keyring integration for secure API key storage
//! Falls back to file storage if keyring is unavailable

use anyhow::{Result, Context};
use std::path::PathBuf;
use std::fs;

const SERVICE_NAME: &str = "sam-shell";
const API_KEY_FILE_SUFFIX: &str = "api_key.txt";

/// Environment variable consulted before any stored key
pub const API_KEY_ENV: &str = "MISTRAL_API_KEY";

fn username(provider: &str) -> String {
    format!("{}-api-key", provider)
}

/// Get the path for the fallback API key file
fn api_key_file_path(provider: &str) -> Result<PathBuf> {
    let dir = crate::config::config_dir()?;
    fs::create_dir_all(&dir).context("Failed to create config directory")?;
    Ok(dir.join(format!("{}_{}", provider, API_KEY_FILE_SUFFIX)))
}

/// Store the API key for `provider` - tries keyring first, falls back to file
pub fn set_api_key(provider: &str, key: &str) -> Result<()> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, &username(provider)) {
        if entry.set_password(key).is_ok() {
            return Ok(());
        }
    }

    tracing::info!(provider = %provider, "Keyring unavailable, storing API key in config directory");
    save_to_file(provider, key)
}

fn save_to_file(provider: &str, key: &str) -> Result<()> {
    let path = api_key_file_path(provider)?;
    fs::write(&path, key).context("Failed to write API key file")?;

    // Set restrictive permissions on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .context("Failed to set file permissions")?;
    }

    Ok(())
}

/// Get the API key for `provider`: environment, then keyring, then file
pub fn get_api_key(provider: &str) -> Result<String> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            return Ok(key.trim().to_string());
        }
    }

    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, &username(provider)) {
        if let Ok(key) = entry.get_password() {
            return Ok(key);
        }
    }

    let path = api_key_file_path(provider)?;
    let key = fs::read_to_string(&path)
        .context("No API key found. Run '/settings api_key <key>' or set MISTRAL_API_KEY.")?;
    Ok(key.trim().to_string())
}

/// Delete the stored API key from both keyring and file
pub fn delete_api_key(provider: &str) -> Result<()> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, &username(provider)) {
        let _ = entry.delete_credential();
    }

    let path = api_key_file_path(provider)?;
    if path.exists() {
        fs::remove_file(&path).context("Failed to delete API key file")?;
    }

    Ok(())
}

/// Check if an API key is available for `provider`
pub fn has_api_key(provider: &str) -> bool {
    get_api_key(provider).map(|k| !k.is_empty()).unwrap_or(false)
}

/// Mask a key for display, e.g. `********` (at most 20 characters)
pub fn mask_key(key: &str) -> String {
    "*".repeat(key.chars().count().min(20))
}
