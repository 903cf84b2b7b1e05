//! Host capabilities.
//!
//! The interpreter never talks to a model, a user, or a host-language runtime
//! directly — it suspends, and the driver fulfills the request through one of
//! these traits. Keeping the traits narrow makes every suspension point a
//! serialization boundary and every test deterministic.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::{
    frame::{AiOperation, PromptToolCall},
    value::{Json, ModelConfig, ToolBinding, Value},
};

/// Message roles in a provider conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in the request history sent to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A model call assembled by the driver from a pending AI bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiRequest {
    pub operation: AiOperation,
    pub prompt: String,
    pub model: Option<ModelConfig>,
    /// Rendered context block (absent under `forget` mode).
    pub context_text: Option<String>,
    /// Tool schemas visible to the model for this call.
    pub tools: Vec<ToolBinding>,
    /// Conversation history, grown across tool rounds.
    pub messages: Vec<ProviderMessage>,
}

/// A tool invocation requested by the provider, before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderToolCall {
    pub name: String,
    pub args: IndexMap<String, Json>,
}

/// Token accounting reported by a provider. Preserved verbatim in the
/// interaction log; never synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A provider's answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Tool calls the model wants executed before it can finish. Empty means
    /// the response is final.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ProviderToolCall>,
}

impl AiResponse {
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            value: Value::Text(content.into()),
            usage: None,
            tool_calls: Vec::new(),
        }
    }

    #[must_use]
    pub fn tool_request(calls: Vec<ProviderToolCall>) -> Self {
        Self {
            value: Value::Null,
            usage: None,
            tool_calls: calls,
        }
    }
}

/// The LLM capability: model execution and user prompting.
///
/// `execute` serves both `do`-style and `vibe`-style invocations; the request
/// carries the operation tag. `ask_user` is plain input with no usage or tool
/// metadata.
pub trait AiProvider {
    fn execute(&mut self, request: &AiRequest) -> Result<AiResponse, String>;

    fn ask_user(&mut self, prompt: &str) -> Result<String, String>;
}

/// The host-language escape capability.
///
/// `bindings` are deep copies of the variables visible at the suspension
/// point; the evaluator must treat them as frozen.
pub trait TsEvaluator {
    /// Runs an inline escape block.
    fn evaluate(&mut self, code: &str, bindings: &IndexMap<String, Json>) -> Result<Value, String>;

    /// Calls a function exported by a registered host module.
    fn call_function(&mut self, module: &str, name: &str, args: &[Value]) -> Result<Value, String>;
}

/// One logged LLM interaction, recorded when interaction logging is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiInteraction {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub operation: AiOperation,
    pub prompt: String,
    pub response: Option<Value>,
    pub usage: Option<Usage>,
    pub tool_calls: Vec<PromptToolCall>,
}

impl AiInteraction {
    #[must_use]
    pub fn begin(operation: AiOperation, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            operation,
            prompt: prompt.into(),
            response: None,
            usage: None,
            tool_calls: Vec::new(),
        }
    }
}
