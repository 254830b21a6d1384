//! Provider-agnostic request/response shapes (§4.11). Every provider
//! adapter translates to and from these; nothing outside `providers/`
//! should see a provider's own wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// §4.11: two-tier model access. Fast serves Phase2's per-hop tool calls,
/// Deep serves the final synthesis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTier {
    Fast,
    Deep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Present on an assistant message that invoked a tool, and echoed
    /// back on the corresponding tool-result message.
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: Role::Tool, content: content.into(), tool_call_id: Some(tool_call_id.into()) }
    }
}

/// One entry of §4.12's tool catalog, described in the provider-neutral
/// shape every adapter turns into its own function/tool schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// A tool invocation the model asked for, with arguments already parsed
/// out of the provider's own wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub tier: ModelTier,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    /// When set, the provider is asked to constrain output to this JSON
    /// schema (§4.11's "schema-constrained JSON output").
    pub response_schema: Option<Value>,
    pub max_output_tokens: u32,
}

impl CompletionRequest {
    pub fn new(tier: ModelTier, messages: Vec<Message>) -> Self {
        Self { tier, messages, tools: Vec::new(), response_schema: None, max_output_tokens: 2048 }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}
