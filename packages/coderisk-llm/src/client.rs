//! Rate-limited LLM client (§4.11). `LlmClient` is the seam the
//! Investigation Orchestrator programs against; `RateLimitedClient` is the
//! one production implementation, wiring a `Provider` adapter through the
//! Redis token bucket and the throttle retry wrapper.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{LlmError, Result};
use crate::providers::Provider;
use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::retry::with_throttle_retry;
use crate::types::{CompletionRequest, CompletionResponse, Message, ModelTier, ToolDefinition};

/// §4.11 per-call hard timeout.
const LLM_CALL_TIMEOUT_SECS: u64 = 60;

/// A very rough heuristic: ~4 characters per token. Good enough to size
/// the rate limiter's TPM request; the provider's own usage figures (once
/// returned) are what actually gets billed against.
fn estimate_tokens(messages: &[Message]) -> u32 {
    let chars: usize = messages.iter().map(|m| m.content.len()).sum();
    ((chars / 4).max(1)) as u32
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, tier: ModelTier, messages: Vec<Message>) -> Result<CompletionResponse>;

    async fn complete_json(&self, tier: ModelTier, messages: Vec<Message>, schema: Value) -> Result<CompletionResponse>;

    async fn complete_with_tools(&self, tier: ModelTier, messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Result<CompletionResponse>;

    async fn complete_with_tools_and_history(
        &self,
        tier: ModelTier,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        history: Vec<Message>,
    ) -> Result<CompletionResponse>;
}

pub struct RateLimitedClient {
    provider: Box<dyn Provider>,
    limiter: RateLimiter,
}

impl RateLimitedClient {
    pub async fn connect(redis_url: &str, http: reqwest::Client, rate_limits: RateLimitConfig) -> Result<Self> {
        let provider = crate::providers::from_env(http)?;
        let limiter = RateLimiter::connect(redis_url, rate_limits).await?;
        Ok(Self { provider, limiter })
    }

    async fn send(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let tokens_requested = estimate_tokens(&request.messages);
        let tier = request.tier;

        with_throttle_retry(|| {
            let request = request.clone();
            async {
                let limiter_key = format!("{:?}", tier).to_lowercase();
                let admission = self.limiter.check_and_increment(&limiter_key, tokens_requested).await?;
                if admission.near_limit {
                    tracing::warn!(tier = ?tier, "llm rate limit above 90%, proceeding but near cap");
                }

                let call = self.provider.send(&request);
                tokio::time::timeout(std::time::Duration::from_secs(LLM_CALL_TIMEOUT_SECS), call)
                    .await
                    .map_err(|_| LlmError::Timeout(LLM_CALL_TIMEOUT_SECS))?
            }
        })
        .await
    }
}

#[async_trait]
impl LlmClient for RateLimitedClient {
    async fn complete(&self, tier: ModelTier, messages: Vec<Message>) -> Result<CompletionResponse> {
        self.send(CompletionRequest::new(tier, messages)).await
    }

    async fn complete_json(&self, tier: ModelTier, messages: Vec<Message>, schema: Value) -> Result<CompletionResponse> {
        self.send(CompletionRequest::new(tier, messages).with_response_schema(schema)).await
    }

    async fn complete_with_tools(&self, tier: ModelTier, messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Result<CompletionResponse> {
        self.send(CompletionRequest::new(tier, messages).with_tools(tools)).await
    }

    async fn complete_with_tools_and_history(
        &self,
        tier: ModelTier,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        history: Vec<Message>,
    ) -> Result<CompletionResponse> {
        let mut combined = history;
        combined.extend(messages);
        self.send(CompletionRequest::new(tier, combined).with_tools(tools)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_is_at_least_one() {
        assert_eq!(estimate_tokens(&[]), 1);
    }

    #[test]
    fn token_estimate_scales_with_content_length() {
        let messages = vec![Message::user("a".repeat(400))];
        assert_eq!(estimate_tokens(&messages), 100);
    }
}
