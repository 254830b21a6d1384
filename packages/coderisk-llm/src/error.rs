use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("rate limited: {resource} throttled for {retry_after_secs}s")]
    Throttled { resource: ThrottledResource, retry_after_secs: u64 },

    #[error("daily quota exhausted for {0}")]
    DailyQuotaExhausted(String),

    #[error("provider request failed: {0}")]
    Provider(#[from] reqwest::Error),

    #[error("rate limiter backend error: {0}")]
    RateLimiterBackend(#[from] redis::RedisError),

    #[error("response failed schema validation: {0}")]
    SchemaValidation(String),

    #[error("missing configuration: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request exceeded {0}s deadline")]
    Timeout(u64),

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Which counter a throttle was raised against (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottledResource {
    RequestsPerMinute,
    TokensPerMinute,
    RequestsPerDay,
}

impl std::fmt::Display for ThrottledResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThrottledResource::RequestsPerMinute => "rpm",
            ThrottledResource::TokensPerMinute => "tpm",
            ThrottledResource::RequestsPerDay => "rpd",
        };
        write!(f, "{s}")
    }
}

impl LlmError {
    /// §7: provider 429s fold into the same throttle class as the local
    /// limiter's own proactive checks.
    pub fn from_provider_status(status: reqwest::StatusCode, retry_after_secs: u64) -> Option<Self> {
        if status.as_u16() == 429 {
            Some(LlmError::Throttled { resource: ThrottledResource::RequestsPerMinute, retry_after_secs })
        } else {
            None
        }
    }

    pub fn to_core_kind(&self) -> coderisk_core::ErrorKind {
        match self {
            LlmError::Throttled { .. } => coderisk_core::ErrorKind::Quota,
            LlmError::DailyQuotaExhausted(_) => coderisk_core::ErrorKind::Quota,
            LlmError::Provider(_) => coderisk_core::ErrorKind::TransientExternal,
            LlmError::RateLimiterBackend(_) => coderisk_core::ErrorKind::Cache,
            LlmError::SchemaValidation(_) => coderisk_core::ErrorKind::ValidationFailure,
            LlmError::Configuration(_) => coderisk_core::ErrorKind::Configuration,
            LlmError::Serialization(_) => coderisk_core::ErrorKind::ValidationFailure,
            LlmError::Timeout(_) => coderisk_core::ErrorKind::TransientExternal,
            LlmError::RetriesExhausted { .. } => coderisk_core::ErrorKind::TransientExternal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_429_maps_to_rpm_throttle() {
        let err = LlmError::from_provider_status(reqwest::StatusCode::TOO_MANY_REQUESTS, 5).unwrap();
        assert!(matches!(err, LlmError::Throttled { resource: ThrottledResource::RequestsPerMinute, retry_after_secs: 5 }));
    }

    #[test]
    fn non_429_status_has_no_throttle_mapping() {
        assert!(LlmError::from_provider_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, 5).is_none());
    }

    #[test]
    fn error_kinds_match_taxonomy() {
        assert_eq!(LlmError::DailyQuotaExhausted("rpd".into()).to_core_kind(), coderisk_core::ErrorKind::Quota);
        assert_eq!(LlmError::SchemaValidation("bad json".into()).to_core_kind(), coderisk_core::ErrorKind::ValidationFailure);
    }
}
