//! OpenAI-compatible Chat Completions adapter. Request/response shapes
//! mirror the `ChatCompletions` wire format (`messages`, `tools`,
//! `tool_calls`, `response_format`), translated to and from
//! `crate::types`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse, Message, ModelTier, Role, TokenUsage, ToolCall, ToolDefinition};

const FAST_MODEL: &str = "gpt-4o-mini";
const DEEP_MODEL: &str = "gpt-4o";
const ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self { http, api_key }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn to_chat_message(message: &Message) -> ChatMessage {
    ChatMessage {
        role: role_str(message.role).to_string(),
        content: Some(message.content.clone()),
        tool_call_id: message.tool_call_id.clone(),
        tool_calls: Vec::new(),
    }
}

fn to_chat_tool(tool: &ToolDefinition) -> ChatTool {
    ChatTool {
        kind: "function",
        function: ChatFunction { name: tool.name.clone(), description: tool.description.clone(), parameters: tool.parameters_schema.clone() },
    }
}

#[async_trait]
impl super::Provider for OpenAiProvider {
    async fn send(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let body = ChatRequest {
            model: self.model_name(request.tier).to_string(),
            messages: request.messages.iter().map(to_chat_message).collect(),
            max_tokens: request.max_output_tokens,
            tools: request.tools.iter().map(to_chat_tool).collect(),
            response_format: request
                .response_schema
                .clone()
                .map(|schema| ResponseFormat { kind: "json_schema", json_schema: schema }),
        };

        let response = self.http.post(ENDPOINT).bearer_auth(&self.api_key).json(&body).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response.headers().get("retry-after").and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok()).unwrap_or(5);
            return Err(LlmError::from_provider_status(status, retry_after).expect("429 maps to throttle"));
        }
        let parsed: ChatResponse = response.error_for_status()?.json().await?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| LlmError::SchemaValidation("no choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Null);
                ToolCall { id: tc.id, name: tc.function.name, arguments }
            })
            .collect();

        let usage = parsed.usage.map(|u| TokenUsage { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens }).unwrap_or(TokenUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        Ok(CompletionResponse { content: choice.message.content.unwrap_or_default(), tool_calls, usage })
    }

    fn model_name(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => FAST_MODEL,
            ModelTier::Deep => DEEP_MODEL,
        }
    }
}
