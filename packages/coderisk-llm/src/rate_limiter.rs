//! Redis-backed token bucket (§4.11). Three atomic counters per key - RPM,
//! TPM, RPD - checked and incremented by a single Lua script so that
//! concurrent callers across the process never race past a limit between
//! the check and the increment. The process-wide Redis client is the only
//! shared quota: every `LlmClient` in this process, regardless of which
//! repo it's working on, draws from the same counters.

use crate::error::{LlmError, Result, ThrottledResource};

const MINUTE_TTL_SECS: i64 = 70;
const DAY_TTL_SECS: i64 = 86_400;

const PROACTIVE_THROTTLE_RATIO: f64 = 0.9;

/// `KEYS = [rpm_key, tpm_key, rpd_key]`, `ARGV = [rpm_limit, tpm_limit,
/// rpd_limit, tokens_requested, minute_ttl, day_ttl]`.
///
/// Returns `{status, retry_after_secs}` where status is 0 (ok), 1 (rpm),
/// 2 (tpm), or 3 (rpd exhausted - hard, not proactive).
const CHECK_AND_INCREMENT_SCRIPT: &str = r#"
local rpm_key = KEYS[1]
local tpm_key = KEYS[2]
local rpd_key = KEYS[3]

local rpm_limit = tonumber(ARGV[1])
local tpm_limit = tonumber(ARGV[2])
local rpd_limit = tonumber(ARGV[3])
local tokens = tonumber(ARGV[4])
local minute_ttl = tonumber(ARGV[5])
local day_ttl = tonumber(ARGV[6])

local rpm = tonumber(redis.call('GET', rpm_key) or '0')
local tpm = tonumber(redis.call('GET', tpm_key) or '0')
local rpd = tonumber(redis.call('GET', rpd_key) or '0')

if rpd + 1 > rpd_limit then
  return {3, day_ttl}
end
if rpm + 1 > rpm_limit then
  return {1, minute_ttl}
end
if tpm + tokens > tpm_limit then
  return {2, minute_ttl}
end

redis.call('INCR', rpm_key)
redis.call('EXPIRE', rpm_key, minute_ttl)
redis.call('INCRBY', tpm_key, tokens)
redis.call('EXPIRE', tpm_key, minute_ttl)
redis.call('INCR', rpd_key)
redis.call('EXPIRE', rpd_key, day_ttl)

local soft = 0
if (rpm + 1) > math.floor(rpm_limit * 0.9) or (tpm + tokens) > math.floor(tpm_limit * 0.9) then
  soft = 1
end
return {0, soft}
"#;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub rpm_limit: u32,
    pub tpm_limit: u32,
    pub rpd_limit: u32,
}

impl RateLimitConfig {
    /// Conservative defaults for a BYOK tier-1 account; callers on a
    /// higher provider tier should override via configuration.
    pub fn default_tier1() -> Self {
        Self { rpm_limit: 500, tpm_limit: 200_000, rpd_limit: 10_000 }
    }
}

pub struct RateLimiter {
    conn: redis::aio::ConnectionManager,
    config: RateLimitConfig,
    script: redis::Script,
}

/// Outcome of a single rate-limit check: whether the caller should still
/// proceed, and whether it's running close enough to a limit that callers
/// may want to shed load proactively (§4.11's 90% threshold).
pub struct Admission {
    pub proceed: bool,
    pub near_limit: bool,
}

impl RateLimiter {
    pub async fn connect(redis_url: &str, config: RateLimitConfig) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(LlmError::RateLimiterBackend)?;
        let conn = client.get_connection_manager().await.map_err(LlmError::RateLimiterBackend)?;
        Ok(Self { conn, config, script: redis::Script::new(CHECK_AND_INCREMENT_SCRIPT) })
    }

    /// Checks and, if admitted, atomically increments all three counters
    /// for `key` (typically `{provider}:{tier}`). Returns a structured
    /// `LlmError::Throttled` naming the exhausted resource and how long to
    /// wait, per §4.11. RPD exhaustion is reported the same way here; the
    /// retry wrapper treats it as terminal.
    pub async fn check_and_increment(&self, key: &str, tokens_requested: u32) -> Result<Admission> {
        let rpm_key = format!("llm:rpm:{key}");
        let tpm_key = format!("llm:tpm:{key}");
        let rpd_key = format!("llm:rpd:{key}");

        let mut conn = self.conn.clone();
        let result: Vec<i64> = self
            .script
            .key(rpm_key)
            .key(tpm_key)
            .key(rpd_key)
            .arg(self.config.rpm_limit)
            .arg(self.config.tpm_limit)
            .arg(self.config.rpd_limit)
            .arg(tokens_requested)
            .arg(MINUTE_TTL_SECS)
            .arg(DAY_TTL_SECS)
            .invoke_async(&mut conn)
            .await
            .map_err(LlmError::RateLimiterBackend)?;

        match result.as_slice() {
            [0, soft] => Ok(Admission { proceed: true, near_limit: *soft == 1 }),
            [1, retry_after] => Err(LlmError::Throttled { resource: ThrottledResource::RequestsPerMinute, retry_after_secs: *retry_after as u64 }),
            [2, retry_after] => Err(LlmError::Throttled { resource: ThrottledResource::TokensPerMinute, retry_after_secs: *retry_after as u64 }),
            [3, retry_after] => Err(LlmError::Throttled { resource: ThrottledResource::RequestsPerDay, retry_after_secs: *retry_after as u64 }),
            other => Err(LlmError::RateLimiterBackend(redis::RedisError::from(std::io::Error::other(format!(
                "unexpected rate limiter script result: {other:?}"
            ))))),
        }
    }
}

pub fn is_near_limit_ratio(used: u32, limit: u32) -> bool {
    limit > 0 && (used as f64 / limit as f64) >= PROACTIVE_THROTTLE_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_limit_ratio_trips_at_90_percent() {
        assert!(!is_near_limit_ratio(89, 100));
        assert!(is_near_limit_ratio(90, 100));
        assert!(is_near_limit_ratio(100, 100));
    }

    #[test]
    fn default_tier1_has_nonzero_limits() {
        let config = RateLimitConfig::default_tier1();
        assert!(config.rpm_limit > 0 && config.tpm_limit > 0 && config.rpd_limit > 0);
    }
}
