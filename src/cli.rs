//! CLI interface for sam

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::agent::interactive::{self, OneShot};
use crate::config::Config;
use crate::security::SafetyProfile;
use crate::session::HostEnv;

#[derive(Parser)]
#[command(name = "sam")]
#[command(about = "AI shell assistant with a sandboxed command runner", long_about = None)]
#[command(version)]
struct Cli {
    /// Sandbox root and starting directory (default: current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Safety profile: standard, lenient or strict
    #[arg(long, global = true, value_parser = parse_profile)]
    profile: Option<SafetyProfile>,

    /// Allow cd outside the sandbox root
    #[arg(long, global = true)]
    no_sandbox: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the assistant a single question
    Ask {
        /// The question
        #[arg(required = true, trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Run a single command through the safety gate
    Exec {
        /// The command
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Configure the shell
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Store the provider API key
        #[arg(long)]
        set_api_key: Option<String>,
        /// Remove the stored provider API key
        #[arg(long)]
        delete_api_key: bool,
        /// Persist a safety profile
        #[arg(long, value_parser = parse_profile)]
        safety: Option<SafetyProfile>,
        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,
    },
}

fn parse_profile(s: &str) -> std::result::Result<SafetyProfile, String> {
    s.parse()
}

impl Cli {
    /// Fold command-line overrides into the loaded config
    fn apply_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(profile) = self.profile {
            config.security.safety_profile = profile;
        }
        if self.no_sandbox {
            config.security.sandbox_enabled = false;
        }
        if let Some(root) = &self.root {
            let root = std::fs::canonicalize(root)
                .with_context(|| format!("Invalid root directory: {}", root.display()))?;
            config.security.sandbox_root = Some(root);
        }
        Ok(())
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Config { show, set_api_key, delete_api_key, safety, reset }) = &cli.command {
        return run_config(ConfigAction {
            show: *show,
            set_api_key: set_api_key.as_deref(),
            delete_api_key: *delete_api_key,
            safety: *safety,
            reset: *reset,
        });
    }

    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Using default configuration");
        Config::default()
    });
    cli.apply_overrides(&mut config)?;
    let env = HostEnv::from_process();

    match cli.command {
        None => interactive::run_interactive(config, env).await?,
        Some(Commands::Ask { query }) => {
            let ok = interactive::run_one_shot(config, env, OneShot::Ask(query.join(" "))).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Some(Commands::Exec { command }) => {
            let ok = interactive::run_one_shot(config, env, OneShot::Exec(shell_words::join(&command))).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Some(Commands::Config { .. }) => {}
    }

    Ok(())
}

struct ConfigAction<'a> {
    show: bool,
    set_api_key: Option<&'a str>,
    delete_api_key: bool,
    safety: Option<SafetyProfile>,
    reset: bool,
}

fn run_config(action: ConfigAction<'_>) -> Result<()> {
    if action.reset {
        crate::config::reset_config()?;
    }
    if let Some(key) = action.set_api_key {
        let config = Config::load()?;
        crate::config::set_api_key(&config.provider.name, key)?;
    }
    if action.delete_api_key {
        let config = Config::load()?;
        crate::security::keyring::delete_api_key(&config.provider.name)?;
        println!("API key for {} removed.", config.provider.name);
    }
    if let Some(profile) = action.safety {
        crate::config::set_safety_profile(profile)?;
    }
    if action.show {
        crate::config::show_config(&Config::load()?)?;
    }

    let nothing_requested = !(action.show
        || action.reset
        || action.delete_api_key
        || action.set_api_key.is_some()
        || action.safety.is_some());
    if nothing_requested {
        println!("Configuration options:");
        println!("  --show                 Display current configuration");
        println!("  --set-api-key <key>    Store the provider API key");
        println!("  --delete-api-key       Remove the stored API key");
        println!("  --safety <profile>     standard, lenient or strict");
        println!("  --reset                Reset configuration to defaults");
    }
    Ok(())
}
