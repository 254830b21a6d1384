//! Gemini `generateContent` adapter. Gemini's wire format groups messages
//! into `contents` with `user`/`model` roles and folds system instructions
//! into a separate `systemInstruction` field, so translation here is a
//! little more involved than OpenAI's near-direct mapping.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse, Message, ModelTier, Role, TokenUsage, ToolCall, ToolDefinition};

const FAST_MODEL: &str = "gemini-1.5-flash";
const DEEP_MODEL: &str = "gemini-1.5-pro";

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self { http, api_key }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent?key={}", self.api_key)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    FunctionCall { #[serde(rename = "functionCall")] function_call: FunctionCall },
    FunctionResponse { #[serde(rename = "functionResponse")] function_response: FunctionResponse },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
struct GeminiTool {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}

fn to_content(message: &Message) -> Content {
    let role = match message.role {
        Role::Assistant => "model",
        Role::Tool => "function",
        _ => "user",
    };
    Content { role: role.to_string(), parts: vec![Part::Text { text: message.content.clone() }] }
}

fn to_declaration(tool: &ToolDefinition) -> FunctionDeclaration {
    FunctionDeclaration { name: tool.name.clone(), description: tool.description.clone(), parameters: tool.parameters_schema.clone() }
}

#[async_trait]
impl super::Provider for GeminiProvider {
    async fn send(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let system_instruction = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| Content { role: "system".to_string(), parts: vec![Part::Text { text: m.content.clone() }] });

        let contents: Vec<Content> = request.messages.iter().filter(|m| m.role != Role::System).map(to_content).collect();

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiTool { function_declarations: request.tools.iter().map(to_declaration).collect() }]
        };

        let body = GenerateRequest {
            contents,
            system_instruction,
            tools,
            generation_config: GenerationConfig {
                max_output_tokens: request.max_output_tokens,
                response_mime_type: request.response_schema.as_ref().map(|_| "application/json"),
                response_schema: request.response_schema.clone(),
            },
        };

        let model = self.model_name(request.tier).to_string();
        let response = self.http.post(self.endpoint(&model)).json(&body).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::from_provider_status(status, 5).expect("429 maps to throttle"));
        }
        let parsed: GenerateResponse = response.error_for_status()?.json().await?;

        let candidate = parsed.candidates.into_iter().next().ok_or_else(|| LlmError::SchemaValidation("no candidates in response".to_string()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for (i, part) in candidate.content.parts.into_iter().enumerate() {
            match part {
                Part::Text { text } => content.push_str(&text),
                Part::FunctionCall { function_call } => {
                    tool_calls.push(ToolCall { id: format!("call_{i}"), name: function_call.name, arguments: function_call.args })
                }
                Part::FunctionResponse { .. } => {}
            }
        }

        let usage = parsed
            .usage_metadata
            .map(|u| TokenUsage { prompt_tokens: u.prompt_token_count, completion_tokens: u.candidates_token_count })
            .unwrap_or(TokenUsage { prompt_tokens: 0, completion_tokens: 0 });

        Ok(CompletionResponse { content, tool_calls, usage })
    }

    fn model_name(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => FAST_MODEL,
            ModelTier::Deep => DEEP_MODEL,
        }
    }
}
