//! Tool execution: the registry of native executors and the multi-round
//! invocation protocol between provider responses and tool executors.
//!
//! A tool failure inside the loop never aborts execution — it is captured
//! into the call record and fed back to the provider, which is the only
//! mechanism by which a model can recover from its own choice of tools.
//! Overflowing the round budget, by contrast, is a protocol error.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::{
    error::{RunError, RunResult},
    frame::PromptToolCall,
    provider::{AiProvider, AiRequest, AiResponse, ProviderMessage, ProviderToolCall, Role},
    value::{Json, ToolBinding},
};

/// Execution context handed to every tool executor.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub root_dir: PathBuf,
}

/// A native tool implementation registered with the driver.
pub trait ToolExecutor {
    fn execute(&self, args: &IndexMap<String, Json>, ctx: &ToolContext) -> Result<Json, String>;
}

impl<F> ToolExecutor for F
where
    F: Fn(&IndexMap<String, Json>, &ToolContext) -> Result<Json, String>,
{
    fn execute(&self, args: &IndexMap<String, Json>, ctx: &ToolContext) -> Result<Json, String> {
        self(args, ctx)
    }
}

/// Executors keyed by tool name.
#[derive(Default)]
pub struct ToolRegistry {
    executors: IndexMap<String, Box<dyn ToolExecutor>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, executor: impl ToolExecutor + 'static) {
        self.executors.insert(name.into(), Box::new(executor));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    /// Runs a single registered executor.
    pub fn execute(&self, name: &str, args: &IndexMap<String, Json>, ctx: &ToolContext) -> Result<Json, String> {
        let Some(executor) = self.executors.get(name) else {
            return Err(format!("no executor registered for tool '{name}'"));
        };
        executor.execute(args, ctx)
    }
}

/// One round of the loop: every call the provider requested in a single
/// response, in provider order, each resolved to a result or an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRound {
    pub calls: Vec<PromptToolCall>,
}

/// The final response plus the full round history.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolLoopOutcome {
    pub response: AiResponse,
    pub rounds: Vec<ToolRound>,
}

impl ToolLoopOutcome {
    /// All tool calls across all rounds, preserving provider call order.
    #[must_use]
    pub fn flatten(&self) -> Vec<PromptToolCall> {
        self.rounds.iter().flat_map(|round| round.calls.clone()).collect()
    }
}

/// Drives a model call through as many tool rounds as it needs.
///
/// Each round: execute every requested call (capturing per-call errors),
/// append the results to the request history, and ask the provider again.
/// The loop ends when a response carries no tool calls; needing more than
/// `max_rounds` rounds is a protocol error.
pub fn execute_with_tools(
    mut request: AiRequest,
    tools: &[ToolBinding],
    registry: &ToolRegistry,
    root_dir: &Path,
    provider: &mut dyn AiProvider,
    max_rounds: usize,
) -> RunResult<ToolLoopOutcome> {
    let ctx = ToolContext {
        root_dir: root_dir.to_path_buf(),
    };
    let mut rounds: Vec<ToolRound> = Vec::new();
    let mut response = provider
        .execute(&request)
        .map_err(|e| RunError::resource(format!("provider error: {e}")))?;

    while !response.tool_calls.is_empty() {
        if rounds.len() == max_rounds {
            return Err(RunError::protocol(format!(
                "maximum tool-call rounds ({max_rounds}) exceeded"
            )));
        }
        let calls: Vec<PromptToolCall> = response
            .tool_calls
            .iter()
            .map(|call| run_tool_call(call, tools, registry, &ctx))
            .collect();
        for call in &calls {
            let args_json = Json::Object(call.args.clone()).to_compact_string();
            request
                .messages
                .push(ProviderMessage::new(Role::Assistant, format!("[tool] {}({args_json})", call.name)));
            let feedback = match (&call.result, &call.error) {
                (_, Some(error)) => format!("[error] {error}"),
                (Some(result), None) => format!("[result] {}", result.to_compact_string()),
                (None, None) => "[result] null".to_owned(),
            };
            request.messages.push(ProviderMessage::new(Role::Tool, feedback));
        }
        rounds.push(ToolRound { calls });
        response = provider
            .execute(&request)
            .map_err(|e| RunError::resource(format!("provider error: {e}")))?;
    }

    Ok(ToolLoopOutcome { response, rounds })
}

/// Resolves one provider-requested call: schema lookup, argument checks,
/// execution. Failures land in the `error` field, never in a panic or an
/// aborted loop.
fn run_tool_call(
    call: &ProviderToolCall,
    tools: &[ToolBinding],
    registry: &ToolRegistry,
    ctx: &ToolContext,
) -> PromptToolCall {
    let mut record = PromptToolCall {
        name: call.name.clone(),
        args: call.args.clone(),
        result: None,
        error: None,
    };
    let Some(binding) = tools.iter().find(|tool| tool.name == call.name) else {
        record.error = Some(format!("tool '{}' not found", call.name));
        return record;
    };
    if let Err(message) = check_args(binding, &call.args) {
        record.error = Some(message);
        return record;
    }
    match registry.execute(&call.name, &call.args, ctx) {
        Ok(result) => record.result = Some(result),
        Err(error) => record.error = Some(error),
    }
    record
}

/// Validates provider-supplied arguments against the declared schema.
pub fn check_args(binding: &ToolBinding, args: &IndexMap<String, Json>) -> Result<(), String> {
    for param in &binding.parameters {
        match args.get(&param.name) {
            Some(value) => {
                if !param.schema.kind.accepts(value) {
                    return Err(format!(
                        "argument '{}' of tool '{}' must be {}, got {}",
                        param.name,
                        binding.name,
                        param.schema.kind,
                        value.to_compact_string()
                    ));
                }
            }
            None if param.required => {
                return Err(format!(
                    "missing required argument '{}' for tool '{}'",
                    param.name, binding.name
                ));
            }
            None => {}
        }
    }
    Ok(())
}
