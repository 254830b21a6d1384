//! Provider adapters (§4.11, §6 `LLM_PROVIDER`). Each adapter owns its own
//! wire format and translates to/from the provider-neutral types in
//! `crate::types`; nothing above this module should need to know which
//! provider is configured.

pub mod gemini;
pub mod openai;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CompletionRequest, CompletionResponse, ModelTier};

#[async_trait]
pub trait Provider: Send + Sync {
    /// Performs one HTTP call against the provider and maps its response
    /// back onto the provider-neutral shape. Does not retry or rate-limit;
    /// that's `client::LlmClient`'s job.
    async fn send(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    fn model_name(&self, tier: ModelTier) -> &str;
}

/// Builds the configured provider from `LLM_PROVIDER` / `OPENAI_API_KEY` /
/// `GEMINI_API_KEY` (§6). BYOK: the key must already be present in the
/// environment, nothing is provisioned on the caller's behalf.
pub fn from_env(http: reqwest::Client) -> Result<Box<dyn Provider>> {
    let provider = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
    match provider.as_str() {
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| crate::error::LlmError::Configuration("OPENAI_API_KEY not set".to_string()))?;
            Ok(Box::new(openai::OpenAiProvider::new(http, key)))
        }
        "gemini" => {
            let key = std::env::var("GEMINI_API_KEY")
                .map_err(|_| crate::error::LlmError::Configuration("GEMINI_API_KEY not set".to_string()))?;
            Ok(Box::new(gemini::GeminiProvider::new(http, key)))
        }
        other => Err(crate::error::LlmError::Configuration(format!("unknown LLM_PROVIDER: {other}"))),
    }
}
