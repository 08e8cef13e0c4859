//! Configuration management
//!
//! Provider settings, safety settings and agent loop limits, persisted as
//! TOML in the platform config directory. API keys never live here.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::agent::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::security::SafetyProfile;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Chat-completions provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_name() -> String {
    "mistral".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    800
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Supported provider names
pub const PROVIDERS: &[&str] = &["mistral"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Unknown profile names fall back to `standard`
    #[serde(default, deserialize_with = "lenient_profile")]
    pub safety_profile: SafetyProfile,
    #[serde(default = "default_true")]
    pub sandbox_enabled: bool,
    /// Sandbox root; the launch directory when unset
    #[serde(default)]
    pub sandbox_root: Option<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            safety_profile: SafetyProfile::default(),
            sandbox_enabled: true,
            sandbox_root: None,
        }
    }
}

fn lenient_profile<'de, D>(deserializer: D) -> std::result::Result<SafetyProfile, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.parse().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Falling back to the standard safety profile");
        SafetyProfile::Standard
    }))
}

fn default_true() -> bool {
    true
}

/// Agent loop limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    #[serde(default = "default_max_error_recovery_depth")]
    pub max_error_recovery_depth: usize,
    #[serde(default = "default_max_history_entries")]
    pub max_history_entries: usize,
    #[serde(default = "default_max_tool_output_chars")]
    pub max_tool_output_chars: usize,
    /// Lines kept in the live output window
    #[serde(default = "default_live_output_lines")]
    pub live_output_lines: usize,
    #[serde(default = "default_true")]
    pub recover_direct_failures: bool,
}

fn default_max_tool_calls() -> usize {
    5
}

fn default_max_error_recovery_depth() -> usize {
    2
}

fn default_max_history_entries() -> usize {
    100
}

fn default_max_tool_output_chars() -> usize {
    2000
}

fn default_live_output_lines() -> usize {
    50
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: default_max_tool_calls(),
            max_error_recovery_depth: default_max_error_recovery_depth(),
            max_history_entries: default_max_history_entries(),
            max_tool_output_chars: default_max_tool_output_chars(),
            live_output_lines: default_live_output_lines(),
            recover_direct_failures: true,
        }
    }
}

impl Config {
    /// Load configuration from the default path, creating it on first use
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load configuration from `path`, writing defaults if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().context("Config path has no parent")?;
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;

        tracing::debug!(path = %path.display(), "Config saved");
        Ok(())
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "sam-shell", "sam-shell")
        .context("Failed to get project directories")
}

/// Directory holding config.toml and the fallback key file
pub fn config_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Print the current configuration
pub fn show_config(config: &Config) -> Result<()> {
    let key_status = if crate::security::keyring::has_api_key(&config.provider.name) {
        crate::security::keyring::get_api_key(&config.provider.name)
            .map(|k| crate::security::keyring::mask_key(&k))
            .unwrap_or_else(|_| "not set".to_string())
    } else {
        "not set".to_string()
    };

    println!("Config file: {}", config_path()?.display());
    println!();
    println!("[provider]");
    println!("  name            {}", config.provider.name);
    println!("  model           {}", config.provider.model);
    println!("  base_url        {}", config.provider.base_url);
    println!("  temperature     {}", config.provider.temperature);
    println!("  max_tokens      {}", config.provider.max_tokens);
    println!("  timeout_secs    {}", config.provider.timeout_secs);
    println!("  api_key         {}", key_status);
    println!("[security]");
    println!("  safety_profile  {}", config.security.safety_profile);
    println!("  sandbox         {}", if config.security.sandbox_enabled { "enabled" } else { "disabled" });
    if let Some(root) = &config.security.sandbox_root {
        println!("  sandbox_root    {}", root.display());
    }
    println!("[agent]");
    println!("  max_tool_calls            {}", config.agent.max_tool_calls);
    println!("  max_error_recovery_depth  {}", config.agent.max_error_recovery_depth);
    println!("  max_history_entries       {}", config.agent.max_history_entries);
    println!("  max_tool_output_chars     {}", config.agent.max_tool_output_chars);
    println!("  live_output_lines         {}", config.agent.live_output_lines);
    println!("  recover_direct_failures   {}", config.agent.recover_direct_failures);

    Ok(())
}

/// Store the API key for `provider`
pub fn set_api_key(provider: &str, key: &str) -> Result<()> {
    crate::security::keyring::set_api_key(provider, key)?;
    println!("API key for {} stored securely.", provider);
    Ok(())
}

/// Persist a new safety profile
/// Apply `change` to the config stored at `path` and save it.
///
/// Works on the file, not on a runtime config that may carry command-line
/// overrides, so those never become persistent.
pub fn update_stored(path: &Path, change: impl FnOnce(&mut Config)) -> Result<Config> {
    let mut stored = Config::load_from(path)?;
    change(&mut stored);
    stored.save_to(path)?;
    Ok(stored)
}

pub fn set_safety_profile(profile: SafetyProfile) -> Result<()> {
    update_stored(&config_path()?, |stored| stored.security.safety_profile = profile)?;
    println!("Safety profile set to {}", profile);
    Ok(())
}

/// Reset configuration to defaults
pub fn reset_config() -> Result<()> {
    Config::default().save()?;
    println!("Configuration reset to defaults.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.provider.model, "codestral-latest");
        assert_eq!(config.provider.max_tokens, 800);
        assert_eq!(config.security.safety_profile, SafetyProfile::Standard);
        assert!(config.security.sandbox_enabled);
        assert_eq!(config.agent.max_tool_calls, 5);
        assert_eq!(config.agent.max_error_recovery_depth, 2);
    }

    #[test]
    fn test_load_creates_file_then_reads_it_back() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/config.toml");

        let mut config = Config::load_from(&path).unwrap();
        assert!(path.exists());

        config.security.safety_profile = SafetyProfile::Strict;
        config.agent.max_tool_calls = 3;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[agent]\nmax_tool_calls = 9\n").unwrap();
        assert_eq!(config.agent.max_tool_calls, 9);
        assert_eq!(config.agent.max_history_entries, 100);
        assert_eq!(config.provider.name, "mistral");
    }

    #[test]
    fn test_unknown_profile_falls_back_to_standard() {
        let config: Config = toml::from_str("[security]\nsafety_profile = \"paranoid\"\n").unwrap();
        assert_eq!(config.security.safety_profile, SafetyProfile::Standard);

        let config: Config = toml::from_str("[security]\nsafety_profile = \"LENIENT\"\n").unwrap();
        assert_eq!(config.security.safety_profile, SafetyProfile::Lenient);
    }
}
