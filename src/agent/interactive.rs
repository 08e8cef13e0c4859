//! Interactive CLI
//!
//! A REPL around the [`CommandProcessor`]: builtins are intercepted first,
//! `!cmd` forces a direct command, and everything else is routed by the
//! [`CommandRecognizer`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use crossterm::{execute, style::{Color, Print, ResetColor, SetForegroundColor}};
use indicatif::{ProgressBar, ProgressStyle};
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::Helper;
use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::agent::conversation::{Conversation, Role};
use crate::agent::llm::{Collaborator, CollaboratorError, MistralClient, Suggestion};
use crate::agent::recognizer::CommandRecognizer;
use crate::agent::tool_loop::{CommandProcessor, LoopLimits, ProcessorHooks, QueryOutcome, StopReason};
use crate::agent::tools::{ToolCall, ToolContext, ToolResult, READ_FILE, SHELL_COMMAND, WRITE_FILE};
use crate::config::{Config, ProviderConfig, PROVIDERS};
use crate::security::SafetyProfile;
use crate::session::{HostEnv, Session};
use crate::tools::shell::{is_interactive, CommandRunner, LiveSurface, LiveWindow, ShellConfig};

const HISTORY_FILE: &str = ".sam_history";

const BUILTIN_COMMANDS: &[&str] = &[
    "/help", "/clear", "/history", "/settings", "/settings provider", "/settings api_key",
    "/settings safety", "/exit", "/quit",
];

/// REPL builtins
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Builtin {
    Clear,
    Exit,
    Help,
    History,
    Settings(Vec<String>),
}

/// Where a line of input goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Builtin(Builtin),
    Direct(String),
    Query(String),
}

impl Input {
    pub fn classify(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Empty;
        }

        match line {
            "clear" | "/clear" => return Input::Builtin(Builtin::Clear),
            "exit" | "quit" | "/exit" | "/quit" => return Input::Builtin(Builtin::Exit),
            "/help" | "help" => return Input::Builtin(Builtin::Help),
            "/history" => return Input::Builtin(Builtin::History),
            _ => {}
        }

        if let Some(rest) = line.strip_prefix("/settings") {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                let args = rest.split_whitespace().map(str::to_string).collect();
                return Input::Builtin(Builtin::Settings(args));
            }
        }

        if let Some(command) = line.strip_prefix('!') {
            let command = command.trim();
            return if command.is_empty() {
                Input::Empty
            } else {
                Input::Direct(command.to_string())
            };
        }

        if CommandRecognizer::is_shell_command(line) {
            Input::Direct(line.to_string())
        } else {
            Input::Query(line.to_string())
        }
    }
}

/// A parsed `/settings` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingChange {
    Show,
    Provider(String),
    ApiKey(String),
    Safety(SafetyProfile),
}

impl SettingChange {
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let Some(option) = args.first() else {
            return Ok(SettingChange::Show);
        };
        let value = args.get(1);

        match option.to_lowercase().as_str() {
            "provider" => {
                let provider = value
                    .ok_or_else(|| "Usage: /settings provider <name>".to_string())?
                    .to_lowercase();
                if !PROVIDERS.contains(&provider.as_str()) {
                    return Err(format!("Unsupported provider: {}", provider));
                }
                Ok(SettingChange::Provider(provider))
            }
            "api_key" => value
                .map(|k| SettingChange::ApiKey(k.clone()))
                .ok_or_else(|| "Usage: /settings api_key <key>".to_string()),
            "safety" => {
                let profile = value.ok_or_else(|| {
                    "Usage: /settings safety <standard|lenient|strict>".to_string()
                })?;
                profile.parse().map(SettingChange::Safety)
            }
            other => Err(format!("Unknown settings option: {}", other)),
        }
    }
}

/// Stand-in collaborator used until an API key is configured
struct Unconfigured {
    provider: String,
}

#[async_trait]
impl Collaborator for Unconfigured {
    async fn suggest(
        &self,
        _question: &str,
        _cwd: &Path,
        _history: &[crate::types::Message],
    ) -> Result<Suggestion, CollaboratorError> {
        Err(CollaboratorError::MissingApiKey(self.provider.clone()))
    }
}

/// Connect to the configured provider, degrading to direct-commands-only
pub fn connect_collaborator(provider: &ProviderConfig, env: &HostEnv) -> Arc<dyn Collaborator> {
    match MistralClient::from_config(provider, &env.shell()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::warn!(error = %e, "AI collaborator unavailable");
            Arc::new(Unconfigured {
                provider: provider.name.clone(),
            })
        }
    }
}

/// Spinner that can be stopped and restarted across tool runs
#[derive(Default)]
pub struct Spinner {
    bar: Mutex<Option<ProgressBar>>,
    enabled: bool,
}

impl Spinner {
    pub fn new(enabled: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            enabled,
        }
    }

    pub fn start(&self, message: impl Into<String>) {
        if !self.enabled {
            return;
        }
        let message = message.into();
        if let Ok(mut guard) = self.bar.lock() {
            match guard.as_ref() {
                Some(bar) => bar.set_message(message),
                None => {
                    let bar = ProgressBar::new_spinner();
                    bar.set_style(
                        ProgressStyle::default_spinner()
                            .template("  {spinner:.dim} {msg}")
                            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                    );
                    bar.set_message(message);
                    bar.enable_steady_tick(Duration::from_millis(80));
                    *guard = Some(bar);
                }
            }
        }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                bar.set_message(message.into());
            }
        }
    }

    pub fn stop(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(bar) = guard.take() {
                bar.finish_and_clear();
            }
        }
    }
}

fn print_colored(text: &str, color: Color) {
    let _ = execute!(io::stdout(), SetForegroundColor(color), Print(text), ResetColor);
}

fn print_line(text: &str, color: Color) {
    print_colored(text, color);
    println!();
}

fn preview(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

fn print_help() {
    println!();
    println!("  Type a shell command to run it, or ask a question in plain language.");
    println!();
    println!("  !<command>                 Force a direct shell command");
    println!("  /settings                  Show settings");
    println!("  /settings provider <name>  Set the AI provider (mistral)");
    println!("  /settings api_key <key>    Store the provider API key");
    println!("  /settings safety <profile> standard, lenient or strict");
    println!("  /history                   Show the conversation");
    println!("  clear                      Clear the conversation");
    println!("  exit, quit                 Leave");
    println!();
}

fn render_explanation(suggestion: &Suggestion) {
    let explanation = suggestion.explanation.trim();
    if !explanation.is_empty() {
        println!("{}", explanation);
    }
    if let Some(call) = &suggestion.tool_call {
        if call.tool == SHELL_COMMAND {
            if let Some(command) = &suggestion.command {
                print_line(&format!("  → {}", command), Color::Cyan);
            }
        }
    }
}

fn describe_tool(call: &ToolCall) -> String {
    match call.tool.as_str() {
        SHELL_COMMAND => format!("Running {}", call.arg("command").unwrap_or_default()),
        READ_FILE => format!("Reading {}", call.arg("path").unwrap_or_default()),
        WRITE_FILE => format!("Writing {}", call.arg("path").unwrap_or_default()),
        other => format!("Calling {}", other),
    }
}

fn render_result(result: &ToolResult) {
    let text = result.message().trim_end();
    if result.success {
        if !text.is_empty() {
            println!("{}", text);
        }
    } else {
        print_line(&format!("✗ {}", text), Color::Red);
    }
}

fn render_stop(reason: &StopReason) {
    match reason {
        StopReason::Completed => {}
        StopReason::NoSuggestion(e) => print_line(&format!("No suggestion available: {}", e), Color::Red),
        StopReason::ToolLimitReached | StopReason::MaxErrorRecovery => {
            print_line(&format!("Stopped: {}", reason), Color::Yellow)
        }
    }
}

fn hooks(spinner: Arc<Spinner>) -> ProcessorHooks {
    let progress = spinner.clone();
    let explanation = spinner.clone();
    let start = spinner.clone();
    let complete = spinner.clone();
    let stop = spinner;

    ProcessorHooks {
        on_progress: Some(Box::new(move |msg: &str| progress.start(msg))),
        on_explanation: Some(Box::new(move |suggestion: &Suggestion| {
            explanation.stop();
            render_explanation(suggestion);
        })),
        on_tool_start: Some(Box::new(move |call: &ToolCall| {
            let interactive = call.tool == SHELL_COMMAND
                && call.arg("command").map(is_interactive).unwrap_or(false);
            if interactive {
                start.stop();
            } else {
                start.start(describe_tool(call));
            }
        })),
        on_tool_complete: Some(Box::new(move |_call: &ToolCall, result: &ToolResult| {
            complete.stop();
            render_result(result);
        })),
        on_stop: Some(Box::new(move |reason: &StopReason| {
            stop.stop();
            render_stop(reason);
        })),
    }
}

/// Build a processor for `config`, rendering through `spinner`
pub fn build_processor(config: &Config, env: &HostEnv, spinner: Arc<Spinner>) -> Result<CommandProcessor> {
    let root = match &config.security.sandbox_root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    let session = Session::new(&root, config.security.sandbox_enabled)
        .with_context(|| format!("Failed to start session in {}", root.display()))?;

    let surface_spinner = spinner.clone();
    let surface: LiveSurface = Arc::new(move |window: &LiveWindow| {
        if let Some(line) = window.latest() {
            surface_spinner.set_message(preview(&line.text, 80));
        }
    });
    let shell = ShellConfig {
        live_lines: config.agent.live_output_lines,
        ..ShellConfig::from_env(env, config.security.safety_profile)
    };
    let runner = CommandRunner::new(shell).with_surface(surface);

    let conversation = Conversation::with_limits(
        config.agent.max_history_entries,
        config.agent.max_tool_output_chars,
    );

    let processor = CommandProcessor::new(
        connect_collaborator(&config.provider, env),
        ToolContext::new(session, runner),
        conversation,
        LoopLimits::from(&config.agent),
        env,
    )?;
    Ok(processor.with_hooks(hooks(spinner)))
}

/// REPL state
pub struct Shell {
    /// Effective config, including command-line overrides
    config: Config,
    /// Where `/settings` changes are persisted
    config_file: Option<PathBuf>,
    env: HostEnv,
    processor: CommandProcessor,
}

impl Shell {
    pub fn new(config: Config, env: HostEnv, spinner: Arc<Spinner>) -> Result<Self> {
        let processor = build_processor(&config, &env, spinner)?;
        Ok(Self {
            config,
            config_file: crate::config::config_path().ok(),
            env,
            processor,
        })
    }

    /// Persist settings changes to `path` instead of the default location
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    fn persist(&self, change: impl FnOnce(&mut Config)) -> Result<()> {
        let path = self
            .config_file
            .as_deref()
            .context("No config file location available")?;
        crate::config::update_stored(path, change)?;
        Ok(())
    }

    pub fn processor(&self) -> &CommandProcessor {
        &self.processor
    }

    fn prompt(&self) -> String {
        format!("\x1b[32msam:{}❯\x1b[0m ", self.processor.session().display_cwd())
    }

    /// Handle one line; `false` means leave the REPL
    pub async fn handle_line(&mut self, line: &str) -> bool {
        match Input::classify(line) {
            Input::Empty => {}
            Input::Builtin(Builtin::Exit) => return false,
            Input::Builtin(Builtin::Clear) => {
                self.processor.conversation_mut().clear();
                print_line("Conversation cleared.", Color::DarkGrey);
            }
            Input::Builtin(Builtin::Help) => print_help(),
            Input::Builtin(Builtin::History) => self.print_history(),
            Input::Builtin(Builtin::Settings(args)) => {
                if let Err(e) = self.handle_settings(&args) {
                    print_line(&format!("✗ {}", e), Color::Red);
                }
            }
            Input::Direct(command) => {
                self.processor.process_direct_command(&command).await;
            }
            Input::Query(query) => {
                self.processor.process_ai_query(&query).await;
            }
        }
        true
    }

    /// Run a single query or command outside the REPL
    pub async fn run_once(&mut self, input: OneShot) -> QueryOutcome {
        match input {
            OneShot::Ask(query) => self.processor.process_ai_query(&query).await,
            OneShot::Exec(command) => self.processor.process_direct_command(&command).await,
        }
    }

    fn print_history(&self) {
        let conversation = self.processor.conversation();
        if conversation.is_empty() {
            print_line("No conversation yet.", Color::DarkGrey);
            return;
        }
        for message in conversation.messages() {
            let color = match message.role {
                Role::User => Color::Green,
                Role::Assistant => Color::Cyan,
            };
            print_line(&format!("{}:", message.role), color);
            println!("{}\n", message.content);
        }
    }

    fn handle_settings(&mut self, args: &[String]) -> Result<()> {
        let change = SettingChange::parse(args).map_err(anyhow::Error::msg)?;
        match change {
            SettingChange::Show => {
                let key = if crate::security::keyring::has_api_key(&self.config.provider.name) {
                    "set"
                } else {
                    "(not set)"
                };
                println!("Current settings:");
                println!("  provider: {}", self.config.provider.name);
                println!("  api_key: {}", key);
                println!("  safety_profile: {}", self.config.security.safety_profile);
                print_help();
            }
            SettingChange::Provider(provider) => {
                self.config.provider.name = provider.clone();
                self.persist(|stored| stored.provider.name = provider.clone())?;
                self.reconnect();
                print_line(&format!("✓ Provider set to {}", provider), Color::Green);
            }
            SettingChange::ApiKey(key) => {
                crate::security::keyring::set_api_key(&self.config.provider.name, &key)?;
                self.reconnect();
                print_line("✓ API key set.", Color::Green);
            }
            SettingChange::Safety(profile) => {
                self.config.security.safety_profile = profile;
                self.persist(|stored| stored.security.safety_profile = profile)?;
                self.processor.tools_mut().runner.set_profile(profile);
                print_line(&format!("✓ Safety profile set to {}", profile), Color::Green);
            }
        }
        Ok(())
    }

    fn reconnect(&mut self) {
        let collaborator = connect_collaborator(&self.config.provider, &self.env);
        self.processor.set_collaborator(collaborator);
    }
}

/// Non-REPL entry points
#[derive(Debug, Clone)]
pub enum OneShot {
    Ask(String),
    Exec(String),
}

struct ShellHelper {
    filenames: FilenameCompleter,
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, ctx: &rustyline::Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let partial = &line[..pos];
        if partial.starts_with('/') && !partial.contains(' ') {
            let matches = BUILTIN_COMMANDS
                .iter()
                .filter(|c| c.starts_with(partial))
                .map(|c| Pair {
                    display: c.to_string(),
                    replacement: c.to_string(),
                })
                .collect();
            return Ok((0, matches));
        }
        self.filenames.complete(line, pos, ctx)
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Highlighter for ShellHelper {}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HISTORY_FILE))
}

/// Run the interactive session
pub async fn run_interactive(config: Config, env: HostEnv) -> Result<()> {
    if !io::stdin().is_terminal() {
        return run_non_interactive(config, env).await;
    }

    let spinner = Arc::new(Spinner::new(true));
    let mut shell = Shell::new(config, env, spinner)?;

    if !crate::security::keyring::has_api_key(&shell.config.provider.name) {
        print_line(
            "No API key configured; only direct commands will work. Use /settings api_key <key>.",
            Color::Yellow,
        );
    }
    print_line("Type /help for help.", Color::DarkGrey);

    let editor_config = rustyline::Config::builder()
        .completion_type(rustyline::CompletionType::List)
        .edit_mode(rustyline::EditMode::Emacs)
        .auto_add_history(true)
        .build();
    let mut rl = rustyline::Editor::<ShellHelper, rustyline::history::DefaultHistory>::with_config(editor_config)
        .context("Failed to start line editor")?;
    rl.set_helper(Some(ShellHelper {
        filenames: FilenameCompleter::new(),
    }));

    let history = history_path();
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    loop {
        match rl.readline(&shell.prompt()) {
            Ok(line) => {
                if !shell.handle_line(&line).await {
                    break;
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                print_line(&format!("Error: {}", e), Color::Red);
                break;
            }
        }
    }

    if let Some(path) = &history {
        if let Err(e) = rl.save_history(path) {
            tracing::debug!(error = %e, "Failed to save history");
        }
    }
    Ok(())
}

/// Process stdin line by line without the editor
async fn run_non_interactive(config: Config, env: HostEnv) -> Result<()> {
    let mut shell = Shell::new(config, env, Arc::new(Spinner::new(false)))?;
    run_lines(&mut shell, io::stdin().lock()).await
}

/// Handle lines as they arrive, so a producer that never closes still
/// gets answers
async fn run_lines(shell: &mut Shell, input: impl BufRead) -> Result<()> {
    for line in input.lines() {
        let line = line.context("Failed to read input")?;
        if !shell.handle_line(&line).await {
            break;
        }
    }
    Ok(())
}

/// Run one query or command and report whether it succeeded
pub async fn run_one_shot(config: Config, env: HostEnv, input: OneShot) -> Result<bool> {
    let spinner = Arc::new(Spinner::new(io::stderr().is_terminal()));
    let mut shell = Shell::new(config, env, spinner)?;
    let outcome = shell.run_once(input).await;

    let ok = match &outcome.stop_reason {
        StopReason::Completed => outcome.last_result.as_ref().map(|r| r.success).unwrap_or(true),
        _ => false,
    };
    Ok(ok)
}
