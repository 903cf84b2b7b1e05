//! The driver: wires providers, the host-language evaluator, and tool
//! executors to the pause/resume controller.
//!
//! Two entry points:
//! - [`Runner::run`] — the synchronous loop from the top of the state machine
//!   to completion, fulfilling every pause through a [`Host`] bundle.
//! - [`Runner::start`] / [`RunHandle`] — iterative execution. Each pause
//!   returns a consuming handle; resuming consumes it, so a stale handle
//!   cannot resume the same pause twice.
//!
//! The driver performs no type checks — those live inside the `resume_*`
//! functions.

use crate::{
    ast::Program,
    context::{FormatOptions, format_context_for_ai},
    error::{RunError, RunResult},
    frame::{AiOperation, PromptToolCall},
    provider::{AiInteraction, AiProvider, AiRequest, ProviderMessage, Role, TsEvaluator},
    state::{
        ImportedModule, PendingAi, PendingCompress, PendingTool, PendingTs, RunOptions, RuntimeState, Status,
        TsCallKind,
    },
    tools::{ToolContext, ToolRegistry, execute_with_tools},
    value::{Json, Value},
};

/// The external collaborators a run needs.
pub struct Host<'a> {
    pub provider: &'a mut dyn AiProvider,
    /// Absent when the program contains no host-escape blocks or imports.
    pub ts: Option<&'a mut dyn TsEvaluator>,
    pub tools: &'a ToolRegistry,
}

/// Top-level interface for executing a program.
#[derive(Debug, Clone, PartialEq)]
pub struct Runner {
    state: RuntimeState,
}

impl Runner {
    #[must_use]
    pub fn new(program: Program, options: RunOptions) -> Self {
        Self {
            state: RuntimeState::new(program, options),
        }
    }

    /// Wraps an existing state (e.g. one restored from a snapshot).
    #[must_use]
    pub fn from_state(state: RuntimeState) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    #[must_use]
    pub fn state_mut(&mut self) -> &mut RuntimeState {
        &mut self.state
    }

    #[must_use]
    pub fn into_state(self) -> RuntimeState {
        self.state
    }

    /// Registers a host module for import resolution. Must precede `run`.
    pub fn register_module(&mut self, module: ImportedModule) {
        self.state.register_module(module);
    }

    /// Runs the program to completion, fulfilling every pause through the
    /// host bundle. Returns the final value of the last executed expression.
    ///
    /// On error the state is left frozen (stacks intact, interaction log
    /// preserved) for post-mortem tooling.
    pub fn run(&mut self, host: &mut Host<'_>) -> Result<Value, RunError> {
        loop {
            self.state.run_until_pause();
            match self.state.status() {
                Status::Completed => return Ok(self.state.last_result().clone()),
                Status::Error => {
                    return Err(self
                        .state
                        .error()
                        .cloned()
                        .unwrap_or_else(|| RunError::protocol("run failed with no recorded error")));
                }
                Status::AwaitingAi => self.service_ai(host)?,
                Status::AwaitingUser => self.service_user(host)?,
                Status::AwaitingTs => self.service_ts(host)?,
                Status::AwaitingTool => self.service_tool(host)?,
                Status::AwaitingCompress => self.service_compress(host)?,
                Status::Running => unreachable!("run_until_pause returned while running"),
            }
        }
    }

    /// Starts iterative execution, consuming the runner.
    pub fn start(self) -> Result<RunProgress, RunError> {
        RunHandle { state: self.state }.advance()
    }

    // --- pause servicing ----------------------------------------------------

    fn service_ai(&mut self, host: &mut Host<'_>) -> RunResult<()> {
        let pending = self
            .state
            .pending_ai()
            .cloned()
            .expect("pending_ai parked while status is awaiting_ai");
        let request = build_ai_request(&pending);
        let mut interaction = AiInteraction::begin(pending.operation, &pending.prompt);

        let outcome = execute_with_tools(
            request,
            &pending.tools,
            host.tools,
            &self.state.options().root_dir,
            host.provider,
            self.state.options().max_tool_rounds,
        );
        match outcome {
            Ok(outcome) => {
                let tool_calls: Vec<PromptToolCall> = outcome.flatten();
                interaction.response = Some(outcome.response.value.clone());
                interaction.usage = outcome.response.usage;
                interaction.tool_calls = tool_calls.clone();
                self.state
                    .resume_with_ai(outcome.response.value, Some(interaction), tool_calls)
            }
            Err(err) => Err(self.state.fail(err)),
        }
    }

    fn service_user(&mut self, host: &mut Host<'_>) -> RunResult<()> {
        let pending = self
            .state
            .pending_ai()
            .cloned()
            .expect("pending_ai parked while status is awaiting_user");
        match host.provider.ask_user(&pending.prompt) {
            Ok(answer) => self.state.resume_with_user(answer),
            Err(err) => Err(self.state.fail(RunError::resource(format!("user input failed: {err}")))),
        }
    }

    fn service_ts(&mut self, host: &mut Host<'_>) -> RunResult<()> {
        let pending = self
            .state
            .pending_ts()
            .cloned()
            .expect("pending_ts parked while status is awaiting_ts");
        let Some(ts) = host.ts.as_deref_mut() else {
            return Err(self
                .state
                .fail(RunError::resource("no host-language evaluator registered")));
        };
        let result = match &pending.kind {
            TsCallKind::Block { code } => ts.evaluate(code, &pending.bindings),
            TsCallKind::ImportedFunction { module, name, args } => ts.call_function(module, name, args),
        };
        match result {
            Ok(value) => self.state.resume_with_ts(value),
            Err(err) => Err(self
                .state
                .fail(RunError::resource(format!("host-language evaluation failed: {err}")))),
        }
    }

    fn service_tool(&mut self, host: &mut Host<'_>) -> RunResult<()> {
        let pending = self
            .state
            .pending_tool()
            .cloned()
            .expect("pending_tool parked while status is awaiting_tool");
        let ctx = ToolContext {
            root_dir: self.state.options().root_dir.clone(),
        };
        match host.tools.execute(&pending.tool.name, &pending.args, &ctx) {
            Ok(result) => self.state.resume_with_tool(result),
            Err(err) => self.state.resume_with_tool_error(err),
        }
    }

    fn service_compress(&mut self, host: &mut Host<'_>) -> RunResult<()> {
        let pending = self
            .state
            .pending_compress()
            .cloned()
            .expect("pending_compress parked while status is awaiting_compress");
        let request = build_summary_request(&pending);
        match host.provider.execute(&request) {
            Ok(response) => {
                let summary = match response.value {
                    Value::Text(text) => text,
                    other => other.render(),
                };
                self.state.resume_with_compress(summary)
            }
            Err(err) => Err(self.state.fail(RunError::resource(format!("provider error: {err}")))),
        }
    }
}

/// Assembles the provider request for a pending AI call: rendered context as
/// a system message, the prompt as the user message.
fn build_ai_request(pending: &PendingAi) -> AiRequest {
    let context_text = if pending.context.is_empty() {
        None
    } else {
        Some(format_context_for_ai(&pending.context, FormatOptions::default()).text)
    };
    let mut messages = Vec::new();
    if let Some(context) = &context_text {
        messages.push(ProviderMessage::new(
            Role::System,
            format!("Current execution context:\n{context}"),
        ));
    }
    messages.push(ProviderMessage::new(Role::User, pending.prompt.clone()));
    AiRequest {
        operation: pending.operation,
        prompt: pending.prompt.clone(),
        model: pending.model.clone(),
        context_text,
        tools: pending.tools.clone(),
        messages,
    }
}

const DEFAULT_SUMMARY_PROMPT: &str = "Summarize the following execution history concisely, preserving every fact a later step might need.";

/// Assembles the summarization request for a pending compress.
fn build_summary_request(pending: &PendingCompress) -> AiRequest {
    let prompt = pending.prompt.clone().unwrap_or_else(|| DEFAULT_SUMMARY_PROMPT.to_owned());
    let context_text = format_context_for_ai(&pending.entries, FormatOptions::default()).text;
    let messages = vec![
        ProviderMessage::new(Role::System, format!("Execution history to summarize:\n{context_text}")),
        ProviderMessage::new(Role::User, prompt.clone()),
    ];
    AiRequest {
        operation: AiOperation::Do,
        prompt,
        model: pending.model.clone(),
        context_text: Some(context_text),
        tools: Vec::new(),
        messages,
    }
}

/// What a paused run is waiting for.
#[derive(Debug, Clone, PartialEq)]
pub enum PauseRequest {
    Ai(PendingAi),
    User(PendingAi),
    Ts(PendingTs),
    Tool(PendingTool),
    Compress(PendingCompress),
}

/// Result of advancing an iterative run.
#[derive(Debug)]
pub enum RunProgress {
    /// Execution paused; resume through the handle.
    Paused {
        request: PauseRequest,
        handle: RunHandle,
    },
    /// Execution finished with the final value.
    Complete(Value),
}

impl RunProgress {
    #[must_use]
    pub fn into_complete(self) -> Option<Value> {
        match self {
            Self::Complete(value) => Some(value),
            Self::Paused { .. } => None,
        }
    }

    #[must_use]
    pub fn into_paused(self) -> Option<(PauseRequest, RunHandle)> {
        match self {
            Self::Paused { request, handle } => Some((request, handle)),
            Self::Complete(_) => None,
        }
    }
}

/// A paused run. Consuming `resume_*` methods make double-resume
/// unrepresentable in this API; hosts that persist raw state across process
/// lifetimes get the same guarantee dynamically from the resume protocol.
#[derive(Debug)]
pub struct RunHandle {
    state: RuntimeState,
}

impl RunHandle {
    #[must_use]
    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    #[must_use]
    pub fn into_state(self) -> RuntimeState {
        self.state
    }

    /// Restores a handle around a paused state (e.g. loaded from a snapshot).
    #[must_use]
    pub fn from_state(state: RuntimeState) -> Self {
        Self { state }
    }

    pub fn resume_ai(
        mut self,
        value: Value,
        interaction: Option<AiInteraction>,
        tool_calls: Vec<PromptToolCall>,
    ) -> Result<RunProgress, RunError> {
        self.state.resume_with_ai(value, interaction, tool_calls)?;
        self.advance()
    }

    pub fn resume_user(mut self, input: String) -> Result<RunProgress, RunError> {
        self.state.resume_with_user(input)?;
        self.advance()
    }

    pub fn resume_ts(mut self, value: Value) -> Result<RunProgress, RunError> {
        self.state.resume_with_ts(value)?;
        self.advance()
    }

    pub fn resume_tool(mut self, result: Json) -> Result<RunProgress, RunError> {
        self.state.resume_with_tool(result)?;
        self.advance()
    }

    pub fn resume_compress(mut self, summary: String) -> Result<RunProgress, RunError> {
        self.state.resume_with_compress(summary)?;
        self.advance()
    }

    fn advance(mut self) -> Result<RunProgress, RunError> {
        self.state.run_until_pause();
        let request = match self.state.status() {
            Status::Completed => return Ok(RunProgress::Complete(self.state.last_result().clone())),
            Status::Error => {
                return Err(self
                    .state
                    .error()
                    .cloned()
                    .unwrap_or_else(|| RunError::protocol("run failed with no recorded error")));
            }
            Status::AwaitingAi => PauseRequest::Ai(
                self.state
                    .pending_ai()
                    .cloned()
                    .expect("pending_ai parked while status is awaiting_ai"),
            ),
            Status::AwaitingUser => PauseRequest::User(
                self.state
                    .pending_ai()
                    .cloned()
                    .expect("pending_ai parked while status is awaiting_user"),
            ),
            Status::AwaitingTs => PauseRequest::Ts(
                self.state
                    .pending_ts()
                    .cloned()
                    .expect("pending_ts parked while status is awaiting_ts"),
            ),
            Status::AwaitingTool => PauseRequest::Tool(
                self.state
                    .pending_tool()
                    .cloned()
                    .expect("pending_tool parked while status is awaiting_tool"),
            ),
            Status::AwaitingCompress => PauseRequest::Compress(
                self.state
                    .pending_compress()
                    .cloned()
                    .expect("pending_compress parked while status is awaiting_compress"),
            ),
            Status::Running => unreachable!("run_until_pause returned while running"),
        };
        Ok(RunProgress::Paused {
            request,
            handle: self,
        })
    }
}
