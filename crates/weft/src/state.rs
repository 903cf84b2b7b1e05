//! Runtime state and the pause/resume controller.
//!
//! The interpreter is a pure state machine: `step` advances one instruction,
//! and the six suspension points park a *pending bundle* describing what the
//! driver must fulfil. Each `resume_with_*` validates that its matching
//! bundle is parked, applies the destination type check, writes the value
//! into the evaluation, and emits the entry-log records the event implies.
//!
//! Status transitions:
//!
//! ```text
//! running → (step) → running | awaiting_* | completed | error
//! awaiting_ai       → resume_with_ai       → running
//! awaiting_user     → resume_with_user     → running
//! awaiting_ts       → resume_with_ts       → running
//! awaiting_tool     → resume_with_tool     → running
//! awaiting_compress → resume_with_compress → running
//! completed / error are terminal
//! ```
//!
//! Resuming without the matching pending bundle is a protocol error that
//! leaves the state untouched, so an already-resumed snapshot cannot be
//! resumed twice.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    ast::{ContextMode, FunctionDecl, Program},
    context::{ContextEntry, build_global_context, build_local_context},
    error::{CodeLoc, RunError, RunResult},
    frame::{AiOperation, ENTRY_FRAME, EntrySource, Frame, FrameEntry, PromptToolCall, ScopeKind},
    instruction::Instruction,
    provider::AiInteraction,
    tracer::TraceEvent,
    types::{TypeAnnotation, coerce},
    value::{Json, ModelConfig, ToolBinding, Value},
};

/// Execution status. Exactly one pending bundle is parked for each
/// `awaiting_*` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Running,
    AwaitingAi,
    AwaitingUser,
    AwaitingTs,
    AwaitingTool,
    AwaitingCompress,
    Completed,
    Error,
}

/// An LLM call waiting on the provider (or, for `ask`, on the user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAi {
    pub operation: AiOperation,
    pub prompt: String,
    pub model: Option<ModelConfig>,
    /// Tool schemas visible on the scope chain at the suspension point.
    pub tools: Vec<ToolBinding>,
    pub mode: ContextMode,
    /// Destination annotation recorded at lowering time, when the call
    /// initializes an annotated variable.
    pub expected: Option<TypeAnnotation>,
    /// Context projection captured at the suspension point.
    pub context: Vec<ContextEntry>,
}

/// What kind of host-language evaluation is pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TsCallKind {
    /// An inline escape block.
    Block { code: String },
    /// A call to a function imported from a host module.
    ImportedFunction {
        module: String,
        name: String,
        args: Vec<Value>,
    },
}

/// A host-language evaluation waiting on the escape evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTs {
    pub kind: TsCallKind,
    /// Deep copies of the JSON-representable variables visible at the
    /// suspension point. Const semantics survive the escape because these
    /// are copies, never references.
    pub bindings: IndexMap<String, Json>,
    pub expected: Option<TypeAnnotation>,
}

/// A language-level tool invocation waiting on its executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTool {
    pub tool: ToolBinding,
    pub args: IndexMap<String, Json>,
}

/// A `compress` scope exit waiting on its summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCompress {
    pub prompt: Option<String>,
    /// Nearest model on the scope chain, if any; the driver picks otherwise.
    pub model: Option<ModelConfig>,
    pub scope: ScopeKind,
    pub label: Option<String>,
    /// Index of the `ScopeEnter` entry whose slice the summary replaces.
    pub enter_index: usize,
    /// Projection of the entries to be summarized.
    pub entries: Vec<ContextEntry>,
}

/// A host module registered ahead of execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedModule {
    pub path: String,
    pub exports: Vec<String>,
}

/// What an `ImportId` resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBinding {
    pub module: String,
    pub name: String,
}

/// Knobs fixed at state construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    pub root_dir: PathBuf,
    /// Upper bound on tool rounds within one LLM invocation.
    pub max_tool_rounds: usize,
    /// Record `AiInteraction`s on resume.
    pub log_interactions: bool,
    /// Record `TraceEvent`s into the execution log.
    pub record_trace: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            max_tool_rounds: 8,
            log_interactions: true,
            record_trace: false,
        }
    }
}

/// The complete interpreter state. Serializable at every suspension point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    status: Status,
    error: Option<RunError>,
    pub(crate) call_stack: Vec<Frame>,
    /// The continuation: executes in LIFO order, top is next.
    pub(crate) instructions: Vec<Instruction>,
    /// Operand stack for in-flight expression evaluation.
    pub(crate) value_stack: Vec<Value>,
    /// The value of the most recently completed expression statement (and of
    /// every resume).
    pub(crate) last_result: Value,
    pending_ai: Option<PendingAi>,
    pending_ts: Option<PendingTs>,
    pending_tool: Option<PendingTool>,
    pending_compress: Option<PendingCompress>,
    /// Set by a resume so the next binding can attribute its entry to the
    /// model or the user; cleared by any other value-consuming instruction.
    pub(crate) pending_source: Option<EntrySource>,
    /// Function table indexed by `FunctionId`.
    pub(crate) functions: Vec<FunctionDecl>,
    /// Host modules registered for import resolution.
    pub(crate) imported_modules: IndexMap<String, ImportedModule>,
    /// Import table indexed by `ImportId`.
    pub(crate) import_bindings: Vec<ImportBinding>,
    /// Names exported by the program.
    pub(crate) exports: Vec<String>,
    pub(crate) ai_interactions: Vec<AiInteraction>,
    pub(crate) execution_log: Vec<TraceEvent>,
    pub(crate) options: RunOptions,
    /// Location of the statement currently executing, for error reports.
    pub(crate) current_loc: Option<CodeLoc>,
    pub(crate) steps: u64,
}

impl RuntimeState {
    /// Builds the initial state: an entry frame and the program's statements
    /// lowered onto the instruction stack.
    #[must_use]
    pub fn new(program: Program, options: RunOptions) -> Self {
        let instructions = program
            .statements
            .into_iter()
            .rev()
            .map(Instruction::ExecStatement)
            .collect();
        Self {
            status: Status::Running,
            error: None,
            call_stack: vec![Frame::new(ENTRY_FRAME)],
            instructions,
            value_stack: Vec::new(),
            last_result: Value::Null,
            pending_ai: None,
            pending_ts: None,
            pending_tool: None,
            pending_compress: None,
            pending_source: None,
            functions: Vec::new(),
            imported_modules: IndexMap::new(),
            import_bindings: Vec::new(),
            exports: Vec::new(),
            ai_interactions: Vec::new(),
            execution_log: Vec::new(),
            options,
            current_loc: None,
            steps: 0,
        }
    }

    // --- inspection ---------------------------------------------------------

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn last_result(&self) -> &Value {
        &self.last_result
    }

    #[must_use]
    pub fn call_stack(&self) -> &[Frame] {
        &self.call_stack
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[must_use]
    pub fn pending_ai(&self) -> Option<&PendingAi> {
        self.pending_ai.as_ref()
    }

    #[must_use]
    pub fn pending_ts(&self) -> Option<&PendingTs> {
        self.pending_ts.as_ref()
    }

    #[must_use]
    pub fn pending_tool(&self) -> Option<&PendingTool> {
        self.pending_tool.as_ref()
    }

    #[must_use]
    pub fn pending_compress(&self) -> Option<&PendingCompress> {
        self.pending_compress.as_ref()
    }

    #[must_use]
    pub fn ai_interactions(&self) -> &[AiInteraction] {
        &self.ai_interactions
    }

    #[must_use]
    pub fn execution_log(&self) -> &[TraceEvent] {
        &self.execution_log
    }

    #[must_use]
    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    #[must_use]
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Projects the current frame's entries.
    #[must_use]
    pub fn local_context(&self) -> Vec<ContextEntry> {
        build_local_context(&self.call_stack)
    }

    /// Projects every frame's entries in stack order.
    #[must_use]
    pub fn global_context(&self) -> Vec<ContextEntry> {
        build_global_context(&self.call_stack)
    }

    // --- host module registration -------------------------------------------

    /// Registers a host module so `import` statements can resolve against it.
    /// Must happen before the corresponding import executes.
    pub fn register_module(&mut self, module: ImportedModule) {
        self.imported_modules.insert(module.path.clone(), module);
    }

    // --- resume protocol ----------------------------------------------------

    /// Resumes from `awaiting_ai` with the provider's final value.
    ///
    /// Applies the destination type check recorded at lowering time, appends
    /// the `Prompt` entry (with the flattened tool-call history), logs the
    /// interaction when enabled, and hands the value to the continuation.
    pub fn resume_with_ai(
        &mut self,
        value: Value,
        interaction: Option<AiInteraction>,
        tool_calls: Vec<PromptToolCall>,
    ) -> RunResult<()> {
        self.expect_status(Status::AwaitingAi, "resume_with_ai")?;
        let pending = self
            .pending_ai
            .take()
            .expect("pending_ai parked while status is awaiting_ai");
        let value = self.check_expected(value, pending.expected.as_ref())?;
        self.current_frame_mut()?.append_entry(FrameEntry::Prompt {
            ai_type: pending.operation,
            prompt: pending.prompt,
            response: Some(value.clone()),
            tool_calls,
        });
        if self.options.log_interactions
            && let Some(interaction) = interaction
        {
            self.ai_interactions.push(interaction);
        }
        self.deliver(value, Some(EntrySource::Ai));
        Ok(())
    }

    /// Resumes from `awaiting_user` with the user's input.
    pub fn resume_with_user(&mut self, input: String) -> RunResult<()> {
        self.expect_status(Status::AwaitingUser, "resume_with_user")?;
        let pending = self
            .pending_ai
            .take()
            .expect("pending_ai parked while status is awaiting_user");
        let value = self.check_expected(Value::Text(input), pending.expected.as_ref())?;
        self.current_frame_mut()?.append_entry(FrameEntry::Prompt {
            ai_type: pending.operation,
            prompt: pending.prompt,
            response: Some(value.clone()),
            tool_calls: Vec::new(),
        });
        self.deliver(value, Some(EntrySource::User));
        Ok(())
    }

    /// Resumes from `awaiting_ts` with the evaluator's value.
    pub fn resume_with_ts(&mut self, value: Value) -> RunResult<()> {
        self.expect_status(Status::AwaitingTs, "resume_with_ts")?;
        let pending = self
            .pending_ts
            .take()
            .expect("pending_ts parked while status is awaiting_ts");
        let value = self.check_expected(value, pending.expected.as_ref())?;
        self.deliver(value, None);
        Ok(())
    }

    /// Resumes from `awaiting_tool` with the executor's result, recording the
    /// language-level `ToolCall` entry.
    pub fn resume_with_tool(&mut self, result: Json) -> RunResult<()> {
        self.expect_status(Status::AwaitingTool, "resume_with_tool")?;
        let pending = self
            .pending_tool
            .take()
            .expect("pending_tool parked while status is awaiting_tool");
        self.current_frame_mut()?.append_entry(FrameEntry::ToolCall {
            tool_name: pending.tool.name,
            args: pending.args,
            result: Some(result.clone()),
            error: None,
        });
        self.deliver(Value::from_json(result), None);
        Ok(())
    }

    /// Resumes from `awaiting_tool` with an executor failure. The failure is
    /// recorded in the entry log, then the run transitions to `error` — at
    /// the language level there is no model to feed the failure back to.
    pub fn resume_with_tool_error(&mut self, error: String) -> RunResult<()> {
        self.expect_status(Status::AwaitingTool, "resume_with_tool_error")?;
        let pending = self
            .pending_tool
            .take()
            .expect("pending_tool parked while status is awaiting_tool");
        let tool_name = pending.tool.name.clone();
        self.current_frame_mut()?.append_entry(FrameEntry::ToolCall {
            tool_name: pending.tool.name,
            args: pending.args,
            result: None,
            error: Some(error.clone()),
        });
        Err(self.fail(RunError::resource(format!("tool '{tool_name}' failed: {error}"))))
    }

    /// Resumes from `awaiting_compress`, replacing the compressed slice with
    /// a single summary entry.
    pub fn resume_with_compress(&mut self, summary: String) -> RunResult<()> {
        self.expect_status(Status::AwaitingCompress, "resume_with_compress")?;
        let pending = self
            .pending_compress
            .take()
            .expect("pending_compress parked while status is awaiting_compress");
        self.current_frame_mut()?.apply_summary(pending.enter_index, summary);
        self.status = Status::Running;
        Ok(())
    }

    /// Runs steps until the state leaves `running`.
    pub fn run_until_pause(&mut self) {
        while self.status == Status::Running {
            // step() records any error into the state; the driver reads
            // status afterwards.
            let _ = self.step();
        }
    }

    // --- internals shared with the stepper ----------------------------------

    fn expect_status(&self, expected: Status, operation: &str) -> RunResult<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(RunError::protocol(format!(
                "{operation} called while status is {}, expected {expected}",
                self.status
            )))
        }
    }

    /// Applies the recorded destination check; a failure fails the run.
    fn check_expected(&mut self, value: Value, expected: Option<&TypeAnnotation>) -> RunResult<Value> {
        match expected {
            Some(annotation) => match coerce(value, annotation) {
                Ok(value) => Ok(value),
                Err(err) => Err(self.fail(RunError::from(err))),
            },
            None => Ok(value),
        }
    }

    /// Hands a resumed value to the continuation.
    fn deliver(&mut self, value: Value, source: Option<EntrySource>) {
        self.last_result = value.clone();
        self.value_stack.push(value);
        self.pending_source = source;
        self.status = Status::Running;
    }

    /// Records an error, freezing both stacks for post-mortem inspection.
    pub(crate) fn fail(&mut self, err: RunError) -> RunError {
        let err = err.with_loc(self.current_loc);
        self.status = Status::Error;
        self.error = Some(err.clone());
        err
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub(crate) fn suspend_ai(&mut self, pending: PendingAi) {
        self.status = match pending.operation {
            AiOperation::Ask => Status::AwaitingUser,
            AiOperation::Do | AiOperation::Vibe => Status::AwaitingAi,
        };
        self.pending_ai = Some(pending);
    }

    pub(crate) fn suspend_ts(&mut self, pending: PendingTs) {
        self.status = Status::AwaitingTs;
        self.pending_ts = Some(pending);
    }

    pub(crate) fn suspend_tool(&mut self, pending: PendingTool) {
        self.status = Status::AwaitingTool;
        self.pending_tool = Some(pending);
    }

    pub(crate) fn suspend_compress(&mut self, pending: PendingCompress) {
        self.status = Status::AwaitingCompress;
        self.pending_compress = Some(pending);
    }

    pub(crate) fn current_frame_mut(&mut self) -> RunResult<&mut Frame> {
        self.call_stack
            .last_mut()
            .ok_or_else(|| RunError::protocol("call stack is empty"))
    }

    pub(crate) fn push_value(&mut self, value: Value) {
        self.value_stack.push(value);
    }

    pub(crate) fn pop_value(&mut self) -> RunResult<Value> {
        self.value_stack
            .pop()
            .ok_or_else(|| RunError::protocol("value stack underflow"))
    }

    /// Looks a name up the two-rung scope chain: current frame, then the
    /// entry frame.
    #[must_use]
    pub(crate) fn lookup(&self, name: &str) -> Option<&crate::frame::Variable> {
        if let Some(frame) = self.call_stack.last()
            && let Some(variable) = frame.get(name)
        {
            return Some(variable);
        }
        if self.call_stack.len() > 1 {
            return self.call_stack.first().and_then(|frame| frame.get(name));
        }
        None
    }

    /// Writes a name through the scope chain, emitting the snapshot entry in
    /// whichever frame owns the binding. Returns the stored value (coercion
    /// against the binding's annotation may have converted it).
    pub(crate) fn assign_through_chain(
        &mut self,
        name: &str,
        value: Value,
        source: Option<EntrySource>,
    ) -> RunResult<Value> {
        let depth = self.call_stack.len();
        if let Some(frame) = self.call_stack.last_mut()
            && let Some(stored) = frame.try_assign(name, value.clone(), source)?
        {
            return Ok(stored);
        }
        if depth > 1
            && let Some(frame) = self.call_stack.first_mut()
            && let Some(stored) = frame.try_assign(name, value, source)?
        {
            return Ok(stored);
        }
        Err(RunError::assignment(format!(
            "Cannot assign to undefined variable '{name}'"
        )))
    }

    /// Updates a variable in place without logging a snapshot (mutating
    /// methods). Walks the same two-rung chain as assignment.
    pub(crate) fn mutate_through_chain(&mut self, name: &str, value: Value) -> RunResult<()> {
        let depth = self.call_stack.len();
        if let Some(frame) = self.call_stack.last_mut()
            && frame.try_mutate(name, value.clone())?
        {
            return Ok(());
        }
        if depth > 1
            && let Some(frame) = self.call_stack.first_mut()
            && frame.try_mutate(name, value)?
        {
            return Ok(());
        }
        Err(RunError::assignment(format!(
            "Cannot assign to undefined variable '{name}'"
        )))
    }

    /// Tool bindings visible on the scope chain, globals first.
    #[must_use]
    pub(crate) fn visible_tools(&self) -> Vec<ToolBinding> {
        let mut tools = Vec::new();
        let mut frames: Vec<&Frame> = Vec::new();
        if let Some(entry) = self.call_stack.first() {
            frames.push(entry);
        }
        if self.call_stack.len() > 1
            && let Some(top) = self.call_stack.last()
        {
            frames.push(top);
        }
        for frame in frames {
            for variable in frame.locals().values() {
                if let Value::Tool(binding) = &variable.value {
                    tools.push(binding.clone());
                }
            }
        }
        tools
    }

    /// The nearest model on the scope chain: most recently declared first,
    /// current frame before the entry frame.
    #[must_use]
    pub(crate) fn nearest_model(&self) -> Option<ModelConfig> {
        let mut frames: Vec<&Frame> = Vec::new();
        if let Some(top) = self.call_stack.last() {
            frames.push(top);
        }
        if self.call_stack.len() > 1
            && let Some(entry) = self.call_stack.first()
        {
            frames.push(entry);
        }
        for frame in frames {
            for variable in frame.locals().values().rev() {
                if let Value::Model(config) = &variable.value {
                    return Some(config.clone());
                }
            }
        }
        None
    }

    /// The context projection an AI call carries, per its context mode.
    #[must_use]
    pub(crate) fn context_for_mode(&self, mode: &ContextMode) -> Vec<ContextEntry> {
        match mode {
            ContextMode::Default | ContextMode::Compress { .. } => self.local_context(),
            ContextMode::Verbose => self.global_context(),
            ContextMode::Forget => Vec::new(),
        }
    }
}
