//! Sandboxed shell command execution
//!
//! This module runs a validated command for a [`Session`]:
//! - Every command passes the safety gate first
//! - `cd` is handled in-process against the session, never spawned
//! - Interactive programs get the terminal; everything else is
//!   line-streamed through two reader tasks into one ordered channel
//! - A user interrupt terminates the child
//!
//! There is no wall-clock timeout: long-running and interactive processes
//! are expected, and the agent loop is bounded elsewhere.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::security::gate::{check_command, SafetyProfile, Verdict};
use crate::session::{HostEnv, Session, NESTED_MARKER};

/// Programs that need the controlling terminal
pub const INTERACTIVE_COMMANDS: &[&str] = &[
    "top", "htop", "vim", "vi", "nano", "pico", "less", "more", "man", "ssh",
];

/// Default number of lines kept for the live display
pub const DEFAULT_LIVE_LINES: usize = 50;

/// Whether `command` should be handed the terminal
pub fn is_interactive(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .map(|first| INTERACTIVE_COMMANDS.contains(&first.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Result of running one command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    /// The command as given
    pub command: String,
    /// `exit_code == 0`
    pub ok: bool,
    /// Real exit code, or -1 when the command never ran or was interrupted
    pub exit_code: i32,
    /// Complete standard output
    pub stdout: String,
    /// Complete standard error
    pub stderr: String,
    /// Execution duration
    pub duration_ms: u64,
}

impl CommandOutcome {
    fn failed(command: &str, reason: impl Into<String>, started: Instant) -> Self {
        Self {
            command: command.to_string(),
            ok: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: reason.into(),
            duration_ms: elapsed_ms(started),
        }
    }

    fn finished(command: &str, exit_code: i32, stdout: String, stderr: String, started: Instant) -> Self {
        Self {
            command: command.to_string(),
            ok: exit_code == 0,
            exit_code,
            stdout,
            stderr,
            duration_ms: elapsed_ms(started),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One captured line, for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

/// Capped window of the most recent output lines, interleaved in arrival
/// order. Only the display is capped; captured streams are not.
#[derive(Debug, Clone)]
pub struct LiveWindow {
    lines: VecDeque<OutputLine>,
    cap: usize,
}

impl LiveWindow {
    pub fn new(cap: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(cap.min(256)),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, line: OutputLine) {
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> impl Iterator<Item = &OutputLine> {
        self.lines.iter()
    }

    pub fn latest(&self) -> Option<&OutputLine> {
        self.lines.back()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Callback invoked with the live window each time a line arrives
pub type LiveSurface = Arc<dyn Fn(&LiveWindow) + Send + Sync>;

/// Source of user interrupts for a blocking wait
#[derive(Debug, Clone, Default)]
pub enum InterruptSignal {
    /// Ctrl+C delivered to this process
    CtrlC,
    /// Programmatic cancellation
    Token(CancellationToken),
    /// Never interrupted
    #[default]
    Never,
}

impl InterruptSignal {
    /// Resolves when the user interrupts
    pub async fn wait(&self) {
        match self {
            InterruptSignal::CtrlC => {
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            InterruptSignal::Token(token) => token.cancelled().await,
            InterruptSignal::Never => std::future::pending::<()>().await,
        }
    }
}

/// Shell runner configuration
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Safety profile applied by the gate
    pub profile: SafetyProfile,
    /// Shell invoked as `<shell> -c <command>`
    pub shell: PathBuf,
    /// Lines kept for the live display
    pub live_lines: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            profile: SafetyProfile::default(),
            shell: PathBuf::from(crate::session::DEFAULT_SHELL),
            live_lines: DEFAULT_LIVE_LINES,
        }
    }
}

impl ShellConfig {
    /// Configuration using the shell from the host environment
    pub fn from_env(env: &HostEnv, profile: SafetyProfile) -> Self {
        Self {
            profile,
            shell: env.shell(),
            ..Self::default()
        }
    }
}

/// Runs commands on behalf of a session
#[derive(Clone)]
pub struct CommandRunner {
    config: ShellConfig,
    surface: Option<LiveSurface>,
}

impl std::fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRunner")
            .field("config", &self.config)
            .field("surface", &self.surface.is_some())
            .finish()
    }
}

impl CommandRunner {
    pub fn new(config: ShellConfig) -> Self {
        Self { config, surface: None }
    }

    /// Attach a live-update surface for non-interactive output
    pub fn with_surface(mut self, surface: LiveSurface) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn profile(&self) -> SafetyProfile {
        self.config.profile
    }

    pub fn set_profile(&mut self, profile: SafetyProfile) {
        self.config.profile = profile;
    }

    /// Validate and run `command` in the session's cwd
    pub async fn run(
        &self,
        session: &mut Session,
        command: &str,
        interrupt: &InterruptSignal,
    ) -> CommandOutcome {
        let started = Instant::now();

        if let Verdict::Rejected(reason) = check_command(command, self.config.profile) {
            return CommandOutcome::failed(command, reason, started);
        }

        let tokens = match shell_words::split(command) {
            Ok(tokens) => tokens,
            Err(e) => return CommandOutcome::failed(command, format!("unable to parse command: {}", e), started),
        };

        if tokens.first().map(String::as_str) == Some("cd") {
            return match session.change_directory(tokens.get(1).map(String::as_str)) {
                Ok(()) => CommandOutcome::finished(command, 0, String::new(), String::new(), started),
                Err(e) => CommandOutcome::failed(command, e.to_string(), started),
            };
        }

        if is_interactive(command) {
            self.run_interactive(session, command, interrupt, started).await
        } else {
            self.run_streamed(session, command, interrupt, started).await
        }
    }

    fn base_command(&self, session: &Session, script: &str) -> Command {
        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(script)
            .current_dir(session.cwd())
            .env(NESTED_MARKER, "1");
        cmd
    }

    async fn run_interactive(
        &self,
        session: &Session,
        command: &str,
        interrupt: &InterruptSignal,
        started: Instant,
    ) -> CommandOutcome {
        // The gate rules out operators, so the command is a single program.
        // Replacing the shell keeps it in the terminal's foreground group and
        // makes it the process we signal.
        let mut cmd = self.base_command(session, &format!("exec {}", command));
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return CommandOutcome::failed(command, format!("failed to execute command: {}", e), started),
        };
        let pid = child.id();

        tokio::select! {
            status = child.wait() => match status {
                Ok(status) => {
                    let code = exit_code(status);
                    tracing::info!(command = %command, exit_code = code, "Interactive command exited");
                    CommandOutcome::finished(command, code, String::new(), String::new(), started)
                }
                Err(e) => CommandOutcome::failed(command, format!("failed to execute command: {}", e), started),
            },
            _ = interrupt.wait() => {
                // The child saw the same interrupt; make sure it is gone and
                // treat the session as ended normally.
                terminate(&mut child, pid, Reach::Process).await;
                tracing::info!(command = %command, "Interactive command interrupted by user");
                CommandOutcome::finished(command, 0, String::new(), String::new(), started)
            }
        }
    }

    async fn run_streamed(
        &self,
        session: &Session,
        command: &str,
        interrupt: &InterruptSignal,
        started: Instant,
    ) -> CommandOutcome {
        let mut cmd = self.base_command(session, command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so an interrupt reaches everything the shell started
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return CommandOutcome::failed(command, format!("failed to execute command: {}", e), started),
        };
        let pid = child.id();

        let (tx, mut rx) = mpsc::unbounded_channel::<(Stream, Vec<u8>)>();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, Stream::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, Stream::Stderr, tx.clone())));
        }
        drop(tx);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut window = LiveWindow::new(self.config.live_lines);
        let mut exit_status: Option<ExitStatus> = None;
        let mut streams_open = true;

        while exit_status.is_none() || streams_open {
            tokio::select! {
                chunk = rx.recv(), if streams_open => match chunk {
                    Some((stream, bytes)) => {
                        match stream {
                            Stream::Stdout => stdout.extend_from_slice(&bytes),
                            Stream::Stderr => stderr.extend_from_slice(&bytes),
                        }
                        if let Some(surface) = &self.surface {
                            let text = String::from_utf8_lossy(&bytes).trim_end_matches(['\n', '\r']).to_string();
                            window.push(OutputLine { stream, text });
                            surface(&window);
                        }
                    }
                    None => streams_open = false,
                },
                status = child.wait(), if exit_status.is_none() => match status {
                    Ok(status) => exit_status = Some(status),
                    Err(e) => {
                        readers.iter().for_each(|r| r.abort());
                        return CommandOutcome::failed(command, format!("failed to execute command: {}", e), started);
                    }
                },
                _ = interrupt.wait() => {
                    terminate(&mut child, pid, Reach::Group).await;
                    readers.iter().for_each(|r| r.abort());
                    tracing::warn!(command = %command, "Command interrupted by user");
                    return CommandOutcome::failed(command, "command interrupted by user", started);
                }
            }
        }

        let code = exit_status.map(exit_code).unwrap_or(-1);
        let outcome = CommandOutcome::finished(
            command,
            code,
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
            started,
        );

        tracing::info!(
            command = %command,
            exit_code = code,
            duration_ms = outcome.duration_ms,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Command finished"
        );

        outcome
    }
}

/// Forward newline-terminated chunks from one pipe until EOF
async fn pump<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<(Stream, Vec<u8>)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(stream = ?stream, error = %e, "Output pipe closed with error");
                break;
            }
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// What an interrupt signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reach {
    /// Only the child itself
    Process,
    /// The child's process group, led by the child
    Group,
}

#[cfg(unix)]
fn signal(pid: libc::pid_t, reach: Reach, sig: libc::c_int) {
    // SAFETY: plain signal delivery to a child (or group) we spawned
    let result = unsafe {
        match reach {
            Reach::Process => libc::kill(pid, sig),
            Reach::Group => libc::killpg(pid, sig),
        }
    };
    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!(pid, error = %err, "Failed to signal child");
        }
    }
}

/// Ask the child to exit, then make sure it and its group are gone
///
/// `pid` is captured at spawn: once the shell has been reaped `child.id()`
/// is gone, but its group may still have members.
async fn terminate(child: &mut Child, pid: Option<u32>, reach: Reach) {
    #[cfg(unix)]
    {
        if let Some(pid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            signal(pid, reach, libc::SIGTERM);
            let exited = tokio::time::timeout(Duration::from_secs(2), child.wait()).await.is_ok();
            if reach == Reach::Group {
                // Descendants may outlive the shell; the group id stays valid
                // while any of them is alive.
                signal(pid, reach, libc::SIGKILL);
            }
            if exited {
                return;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = (pid, reach);

    let _ = child.start_kill();
    let _ = child.wait().await;
}
