//! Rate-limited, provider-agnostic LLM access (§4.11). `coderisk-risk`'s
//! Investigation Orchestrator is the only consumer; everything here exists
//! to keep that orchestrator from ever touching a provider's wire format
//! or a Redis connection directly.

pub mod client;
pub mod error;
pub mod providers;
pub mod rate_limiter;
pub mod retry;
pub mod types;

pub use client::{LlmClient, RateLimitedClient};
pub use error::{LlmError, Result, ThrottledResource};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use types::{CompletionRequest, CompletionResponse, Message, ModelTier, Role, TokenUsage, ToolCall, ToolDefinition};
