//! Agent loop (command processor)
//!
//! One user query drives a bounded conversation with the collaborator: each
//! iteration asks for a suggestion, executes at most one tool, records the
//! outcome and decides whether to continue. Per-query counters live in an
//! explicit [`QueryContext`] created fresh for every query.

use std::sync::Arc;

use crate::agent::conversation::Conversation;
use crate::agent::llm::{Collaborator, Suggestion};
use crate::agent::tools::{execute_tool, ToolCall, ToolContext, ToolResult};
use crate::config::AgentConfig;
use crate::session::{HostEnv, Session, SessionError};

/// Prompt sent after a tool succeeds
pub const SUCCESS_PROMPT: &str = "The tool executed successfully. Analyze the results above and proceed: \
call another tool if more work is needed, otherwise answer the user.";

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The collaborator answered without a tool call, or a direct command succeeded
    Completed,
    /// The collaborator could not be reached or returned garbage
    NoSuggestion(String),
    /// Tool-call budget exhausted
    ToolLimitReached,
    /// Too many consecutive failures
    MaxErrorRecovery,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Completed => write!(f, "completed"),
            StopReason::NoSuggestion(e) => write!(f, "no suggestion available: {}", e),
            StopReason::ToolLimitReached => write!(f, "tool call limit reached"),
            StopReason::MaxErrorRecovery => write!(f, "max error recovery depth reached"),
        }
    }
}

/// Observable processor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessorState {
    #[default]
    Idle,
    Processing,
    ExecutingTool,
    Analyzing,
}

/// Hard bounds on one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_tool_calls: usize,
    pub max_error_recovery_depth: usize,
    /// Hand failed direct commands to the collaborator
    pub recover_direct_failures: bool,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for LoopLimits {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_tool_calls: config.max_tool_calls,
            max_error_recovery_depth: config.max_error_recovery_depth,
            recover_direct_failures: config.recover_direct_failures,
        }
    }
}

/// What the loop does next after a suggestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Execute(ToolCall),
    Finish(StopReason),
}

/// Per-query counters and transitions
#[derive(Debug, Clone)]
pub struct QueryContext {
    limits: LoopLimits,
    tool_calls_remaining: usize,
    error_recovery_depth: usize,
    tool_calls_made: usize,
}

impl QueryContext {
    pub fn new(limits: LoopLimits) -> Self {
        Self {
            limits,
            tool_calls_remaining: limits.max_tool_calls,
            error_recovery_depth: 0,
            tool_calls_made: 0,
        }
    }

    pub fn tool_calls_remaining(&self) -> usize {
        self.tool_calls_remaining
    }

    pub fn error_recovery_depth(&self) -> usize {
        self.error_recovery_depth
    }

    pub fn tool_calls_made(&self) -> usize {
        self.tool_calls_made
    }

    /// Decide whether a suggestion's tool call may run, spending budget if so
    pub fn on_suggestion(&mut self, suggestion: &Suggestion) -> Step {
        match &suggestion.tool_call {
            None => Step::Finish(StopReason::Completed),
            Some(_) if self.tool_calls_remaining == 0 => Step::Finish(StopReason::ToolLimitReached),
            Some(call) => {
                self.tool_calls_remaining -= 1;
                self.tool_calls_made += 1;
                Step::Execute(call.clone())
            }
        }
    }

    /// Produce the next prompt, or the reason to stop
    pub fn on_tool_result(&mut self, call: &ToolCall, result: &ToolResult) -> Result<String, StopReason> {
        let prompt = if result.success {
            self.error_recovery_depth = 0;
            SUCCESS_PROMPT.to_string()
        } else {
            self.enter_recovery()?;
            error_prompt(call, result)
        };

        if self.tool_calls_remaining == 0 {
            return Err(StopReason::ToolLimitReached);
        }
        Ok(prompt)
    }

    /// Count one more consecutive failure
    pub fn enter_recovery(&mut self) -> Result<(), StopReason> {
        self.error_recovery_depth += 1;
        if self.error_recovery_depth > self.limits.max_error_recovery_depth {
            return Err(StopReason::MaxErrorRecovery);
        }
        Ok(())
    }
}

/// Prompt asking the collaborator to recover from a failed tool
pub fn error_prompt(call: &ToolCall, result: &ToolResult) -> String {
    format!(
        "The previous tool call failed.\n\nTool call:\n```json\n{}\n```\n\nError:\n```\n{}\n```\n\n\
Analyze the error and propose a corrected tool call, or explain why it cannot be fixed.",
        call.to_json(),
        result.error.trim_end()
    )
}

/// Final report of one query
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// Last explanation from the collaborator
    pub final_response: String,
    /// Collaborator round trips
    pub iterations: usize,
    pub tool_calls_made: usize,
    pub stop_reason: StopReason,
    pub last_result: Option<ToolResult>,
}

/// Optional observers of loop events
#[derive(Default)]
pub struct ProcessorHooks {
    pub on_progress: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_explanation: Option<Box<dyn Fn(&Suggestion) + Send + Sync>>,
    pub on_tool_start: Option<Box<dyn Fn(&ToolCall) + Send + Sync>>,
    pub on_tool_complete: Option<Box<dyn Fn(&ToolCall, &ToolResult) + Send + Sync>>,
    pub on_stop: Option<Box<dyn Fn(&StopReason) + Send + Sync>>,
}

impl std::fmt::Debug for ProcessorHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorHooks").finish_non_exhaustive()
    }
}

/// Drives queries and direct commands against one session
pub struct CommandProcessor {
    collaborator: Arc<dyn Collaborator>,
    tools: ToolContext,
    conversation: Conversation,
    limits: LoopLimits,
    hooks: ProcessorHooks,
    state: ProcessorState,
}

impl CommandProcessor {
    /// Fails when `env` shows we are already inside a session
    pub fn new(
        collaborator: Arc<dyn Collaborator>,
        tools: ToolContext,
        conversation: Conversation,
        limits: LoopLimits,
        env: &HostEnv,
    ) -> Result<Self, SessionError> {
        env.ensure_not_nested()?;
        Ok(Self {
            collaborator,
            tools,
            conversation,
            limits,
            hooks: ProcessorHooks::default(),
            state: ProcessorState::Idle,
        })
    }

    pub fn with_hooks(mut self, hooks: ProcessorHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn set_collaborator(&mut self, collaborator: Arc<dyn Collaborator>) {
        self.collaborator = collaborator;
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn limits(&self) -> LoopLimits {
        self.limits
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    pub fn session(&self) -> &Session {
        &self.tools.session
    }

    pub fn tools(&self) -> &ToolContext {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolContext {
        &mut self.tools
    }

    /// Ask the collaborator to handle a natural-language query
    pub async fn process_ai_query(&mut self, query: &str) -> QueryOutcome {
        let mut ctx = QueryContext::new(self.limits);
        self.conversation.add_user(query);
        tracing::info!(query = %query, "Processing query");
        self.run_loop(&mut ctx, query.to_string()).await
    }

    /// Run a user-typed command, handing failures to the collaborator
    pub async fn process_direct_command(&mut self, command: &str) -> QueryOutcome {
        let mut ctx = QueryContext::new(self.limits);
        let call = ToolCall::shell(command);

        self.state = ProcessorState::ExecutingTool;
        self.conversation.add_user(command);
        self.notify_tool_start(&call);
        let result = execute_tool(&call, &mut self.tools).await;
        self.conversation.add_tool_result(&result);
        self.notify_tool_complete(&call, &result);

        if result.success || !self.limits.recover_direct_failures {
            let stop_reason = StopReason::Completed;
            self.finish(&stop_reason);
            return QueryOutcome {
                final_response: String::new(),
                iterations: 0,
                tool_calls_made: 1,
                stop_reason,
                last_result: Some(result),
            };
        }

        if let Err(stop_reason) = ctx.enter_recovery() {
            self.finish(&stop_reason);
            return QueryOutcome {
                final_response: String::new(),
                iterations: 0,
                tool_calls_made: 1,
                stop_reason,
                last_result: Some(result),
            };
        }

        tracing::info!(command = %command, "Direct command failed, asking for recovery");
        let prompt = error_prompt(&call, &result);
        let mut outcome = self.run_loop(&mut ctx, prompt).await;
        outcome.tool_calls_made += 1;
        if outcome.last_result.is_none() {
            outcome.last_result = Some(result);
        }
        outcome
    }

    async fn run_loop(&mut self, ctx: &mut QueryContext, mut prompt: String) -> QueryOutcome {
        let mut iterations = 0;
        let mut final_response = String::new();
        let mut last_result = None;

        let stop_reason = loop {
            iterations += 1;
            self.state = ProcessorState::Processing;
            if let Some(ref cb) = self.hooks.on_progress {
                cb(&format!(
                    "Thinking ({} tool calls left)",
                    ctx.tool_calls_remaining()
                ));
            }

            let suggestion = match self
                .collaborator
                .suggest(&prompt, self.tools.session.cwd(), self.conversation.messages())
                .await
            {
                Ok(suggestion) => suggestion,
                Err(e) => {
                    tracing::warn!(error = %e, "Collaborator failed");
                    break StopReason::NoSuggestion(e.to_string());
                }
            };

            self.state = ProcessorState::Analyzing;
            if let Some(ref cb) = self.hooks.on_explanation {
                cb(&suggestion);
            }
            if !suggestion.explanation.trim().is_empty() {
                final_response = suggestion.explanation.clone();
            }

            let call = match ctx.on_suggestion(&suggestion) {
                Step::Finish(reason) => {
                    if !suggestion.explanation.trim().is_empty() {
                        self.conversation.add_assistant(suggestion.explanation.trim());
                    }
                    break reason;
                }
                Step::Execute(call) => call,
            };

            self.conversation.add_suggestion(&suggestion.explanation, &call);

            self.state = ProcessorState::ExecutingTool;
            self.notify_tool_start(&call);
            let result = execute_tool(&call, &mut self.tools).await;
            self.conversation.add_tool_result(&result);
            self.notify_tool_complete(&call, &result);

            let next = ctx.on_tool_result(&call, &result);
            last_result = Some(result);
            match next {
                Ok(next_prompt) => prompt = next_prompt,
                Err(reason) => break reason,
            }
        };

        self.finish(&stop_reason);
        QueryOutcome {
            final_response,
            iterations,
            tool_calls_made: ctx.tool_calls_made(),
            stop_reason,
            last_result,
        }
    }

    fn notify_tool_start(&self, call: &ToolCall) {
        tracing::debug!(tool = %call.tool, "Executing tool");
        if let Some(ref cb) = self.hooks.on_tool_start {
            cb(call);
        }
    }

    fn notify_tool_complete(&self, call: &ToolCall, result: &ToolResult) {
        tracing::debug!(
            tool = %call.tool,
            success = result.success,
            seconds = result.execution_time_seconds,
            "Tool finished"
        );
        if let Some(ref cb) = self.hooks.on_tool_complete {
            cb(call, result);
        }
    }

    fn finish(&mut self, reason: &StopReason) {
        self.state = ProcessorState::Idle;
        tracing::info!(reason = %reason, "Query finished");
        if let Some(ref cb) = self.hooks.on_stop {
            cb(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{CollaboratorError, MockCollaborator};
    use crate::security::SafetyProfile;
    use crate::tools::shell::{CommandRunner, InterruptSignal, ShellConfig};
    use crate::types::Role;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::TempDir;

    fn limits(max_tool_calls: usize) -> LoopLimits {
        LoopLimits {
            max_tool_calls,
            max_error_recovery_depth: 2,
            recover_direct_failures: true,
        }
    }

    fn processor(mock: MockCollaborator, limits: LoopLimits) -> (TempDir, CommandProcessor) {
        let temp = TempDir::new().unwrap();
        let session = Session::new(temp.path(), true).unwrap();
        let runner = CommandRunner::new(ShellConfig {
            profile: SafetyProfile::Standard,
            shell: "/bin/sh".into(),
            ..ShellConfig::default()
        });
        let tools = ToolContext::new(session, runner).with_interrupt(InterruptSignal::Never);
        let processor = CommandProcessor::new(
            Arc::new(mock),
            tools,
            Conversation::new(),
            limits,
            &HostEnv::default(),
        )
        .unwrap();
        (temp, processor)
    }

    #[test]
    fn test_context_spends_budget_then_refuses() {
        let mut ctx = QueryContext::new(limits(1));
        let suggestion = Suggestion::with_tool("", ToolCall::shell("ls"));

        assert!(matches!(ctx.on_suggestion(&suggestion), Step::Execute(_)));
        assert_eq!(ctx.tool_calls_remaining(), 0);
        assert_eq!(
            ctx.on_suggestion(&suggestion),
            Step::Finish(StopReason::ToolLimitReached)
        );
        assert_eq!(
            ctx.on_suggestion(&Suggestion::answer("done")),
            Step::Finish(StopReason::Completed)
        );
    }

    #[test]
    fn test_context_depth_counts_consecutive_failures() {
        let mut ctx = QueryContext::new(limits(10));
        let call = ToolCall::shell("false");
        let failed = ToolResult::failure("boom", Instant::now());
        let ok = ToolResult::ok("", Instant::now());

        assert!(ctx.on_tool_result(&call, &failed).unwrap().contains("boom"));
        assert_eq!(ctx.on_tool_result(&call, &ok).unwrap(), SUCCESS_PROMPT);
        assert_eq!(ctx.error_recovery_depth(), 0);

        assert!(ctx.on_tool_result(&call, &failed).is_ok());
        assert!(ctx.on_tool_result(&call, &failed).is_ok());
        assert_eq!(
            ctx.on_tool_result(&call, &failed),
            Err(StopReason::MaxErrorRecovery)
        );
    }

    #[tokio::test]
    async fn test_plain_answer_completes() {
        let mut mock = MockCollaborator::new();
        mock.expect_suggest()
            .times(1)
            .returning(|_, _, _| Ok(Suggestion::answer("Use `ls`.")));
        let (_temp, mut processor) = processor(mock, limits(5));

        let outcome = processor.process_ai_query("how do I list files").await;
        assert_eq!(outcome.stop_reason, StopReason::Completed);
        assert_eq!(outcome.final_response, "Use `ls`.");
        assert_eq!(outcome.tool_calls_made, 0);
        assert_eq!(processor.state(), ProcessorState::Idle);

        let history = processor.conversation().messages();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "Use `ls`.");
    }

    #[tokio::test]
    async fn test_budget_bounds_tool_calls() {
        let mut mock = MockCollaborator::new();
        mock.expect_suggest()
            .times(5)
            .returning(|_, _, _| Ok(Suggestion::with_tool("again", ToolCall::shell("echo hi"))));
        let (_temp, mut processor) = processor(mock, limits(5));

        let outcome = processor.process_ai_query("loop forever").await;
        assert_eq!(outcome.stop_reason, StopReason::ToolLimitReached);
        assert_eq!(outcome.tool_calls_made, 5);
        assert_eq!(outcome.iterations, 5);
    }

    #[tokio::test]
    async fn test_error_recovery_depth_is_bounded() {
        let mut mock = MockCollaborator::new();
        mock.expect_suggest().times(3).returning(|_, _, _| {
            Ok(Suggestion::with_tool("retry", ToolCall::shell("ls no_such_file_here")))
        });
        let (_temp, mut processor) = processor(mock, limits(5));

        let outcome = processor.process_ai_query("show the file").await;
        assert_eq!(outcome.stop_reason, StopReason::MaxErrorRecovery);
        assert_eq!(outcome.tool_calls_made, 3);
        assert!(!outcome.last_result.unwrap().success);
    }

    #[tokio::test]
    async fn test_success_resets_recovery_depth() {
        let counter = AtomicUsize::new(0);
        let mut mock = MockCollaborator::new();
        mock.expect_suggest().returning(move |_, _, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(match n {
                0 | 1 | 3 | 4 => Suggestion::with_tool("", ToolCall::shell("ls no_such_file_here")),
                2 => Suggestion::with_tool("", ToolCall::shell("echo ok")),
                _ => Suggestion::answer("gave up politely"),
            })
        });
        let (_temp, mut processor) = processor(mock, limits(10));

        let outcome = processor.process_ai_query("flaky").await;
        assert_eq!(outcome.stop_reason, StopReason::Completed);
        assert_eq!(outcome.tool_calls_made, 5);
        assert_eq!(outcome.final_response, "gave up politely");
    }

    #[tokio::test]
    async fn test_collaborator_failure_stops_without_tools() {
        let mut mock = MockCollaborator::new();
        mock.expect_suggest()
            .times(1)
            .returning(|_, _, _| Err(CollaboratorError::MalformedResponse("empty".into())));
        let (_temp, mut processor) = processor(mock, limits(5));

        let outcome = processor.process_ai_query("anything").await;
        assert!(matches!(outcome.stop_reason, StopReason::NoSuggestion(_)));
        assert_eq!(outcome.tool_calls_made, 0);
        assert!(outcome.last_result.is_none());
    }

    #[tokio::test]
    async fn test_tool_result_recorded_before_next_request() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_mock = seen.clone();
        let counter = AtomicUsize::new(0);
        let mut mock = MockCollaborator::new();
        mock.expect_suggest().returning(move |question, _, history| {
            seen_in_mock
                .lock()
                .unwrap()
                .push((question.to_string(), history.len()));
            Ok(match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Suggestion::with_tool("Checking.", ToolCall::shell("echo marker")),
                _ => Suggestion::answer("Done."),
            })
        });
        let (_temp, mut processor) = processor(mock, limits(5));

        processor.process_ai_query("say marker").await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], ("say marker".to_string(), 1));
        assert_eq!(seen[1].0, SUCCESS_PROMPT);
        // user, suggestion, tool result
        assert_eq!(seen[1].1, 3);
        let history = processor.conversation().messages();
        assert!(history[2].content.contains("marker"));
    }

    #[tokio::test]
    async fn test_forbidden_suggestion_feeds_error_back() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let prompts_in_mock = prompts.clone();
        let counter = AtomicUsize::new(0);
        let mut mock = MockCollaborator::new();
        mock.expect_suggest().returning(move |question, _, _| {
            prompts_in_mock.lock().unwrap().push(question.to_string());
            Ok(match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Suggestion::with_tool("", ToolCall::shell("rm -rf /")),
                _ => Suggestion::answer("I will not do that."),
            })
        });
        let (_temp, mut processor) = processor(mock, limits(5));

        let outcome = processor.process_ai_query("wipe it").await;
        assert_eq!(outcome.stop_reason, StopReason::Completed);
        let prompts = prompts.lock().unwrap();
        assert!(prompts[1].contains("forbidden word: rm"));
    }

    #[tokio::test]
    async fn test_direct_command_success_skips_collaborator() {
        let mut mock = MockCollaborator::new();
        mock.expect_suggest().times(0);
        let (_temp, mut processor) = processor(mock, limits(5));

        let outcome = processor.process_direct_command("echo direct").await;
        assert_eq!(outcome.stop_reason, StopReason::Completed);
        assert_eq!(outcome.last_result.unwrap().output, "direct\n");

        let history = processor.conversation().messages();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "echo direct");
        assert!(history[1].content.contains("Status: Success"));
    }

    #[tokio::test]
    async fn test_direct_command_failure_enters_recovery() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let prompts_in_mock = prompts.clone();
        let mut mock = MockCollaborator::new();
        mock.expect_suggest().times(1).returning(move |question, _, _| {
            prompts_in_mock.lock().unwrap().push(question.to_string());
            Ok(Suggestion::answer("That file does not exist."))
        });
        let (_temp, mut processor) = processor(mock, limits(5));

        let outcome = processor.process_direct_command("cat missing.txt").await;
        assert_eq!(outcome.stop_reason, StopReason::Completed);
        assert_eq!(outcome.tool_calls_made, 1);
        assert!(prompts.lock().unwrap()[0].contains("missing.txt"));
    }

    #[tokio::test]
    async fn test_direct_recovery_can_be_disabled() {
        let mut mock = MockCollaborator::new();
        mock.expect_suggest().times(0);
        let mut no_recovery = limits(5);
        no_recovery.recover_direct_failures = false;
        let (_temp, mut processor) = processor(mock, no_recovery);

        let outcome = processor.process_direct_command("cat missing.txt").await;
        assert!(!outcome.last_result.unwrap().success);
    }

    #[test]
    fn test_nested_session_is_refused() {
        let temp = TempDir::new().unwrap();
        let session = Session::new(temp.path(), true).unwrap();
        let tools = ToolContext::new(session, CommandRunner::new(ShellConfig::default()));
        let env = HostEnv::from_vars([(crate::session::NESTED_MARKER, "1")]);

        let result = CommandProcessor::new(
            Arc::new(MockCollaborator::new()),
            tools,
            Conversation::new(),
            LoopLimits::default(),
            &env,
        );
        assert!(matches!(result, Err(SessionError::Nested)));
    }
}
