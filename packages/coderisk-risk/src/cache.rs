//! Process-fronted Redis cache (§4.13). Holds serialized metric results
//! keyed `{metric}:{repo}:{canonical_path}`, not raw graph rows. Every read
//! degrades silently on a cache error - a miss, a corrupt entry, or Redis
//! being unreachable all just fall through to the graph store, logged and
//! never propagated as a hard failure. Writes are fire-and-forget: a
//! failed `SET` is logged and otherwise ignored.

use std::future::Future;

use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

/// Tier-1 metrics (coupling, co-change, test ratio) live for 15 minutes -
/// long enough to absorb repeated hook invocations across one commit
/// review, short enough that a freshly-ingested coupling edge shows up
/// within one Phase1 cycle.
const METRIC_TTL_SECS: u64 = 15 * 60;

pub struct MetricCache {
    conn: redis::aio::ConnectionManager,
}

impl MetricCache {
    pub async fn connect(redis_url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn key(metric: &str, repo_id: &str, canonical_path: &str) -> String {
        format!("{metric}:{repo_id}:{canonical_path}")
    }

    /// Reads `metric:repo:path` if present and parseable; otherwise calls
    /// `compute` and stores its result under that key before returning it.
    /// Any Redis error - on the read, the write, or the decode - is
    /// logged and treated as a cache miss; `compute` always runs in that
    /// case, so a broken cache never blocks a metric query. `compute`'s own
    /// errors (a real graph-store failure, not a cache miss) propagate
    /// unchanged - only the cache's own reliability is degraded silently.
    pub async fn get_or_compute<T, F, Fut>(&self, metric: &str, repo_id: &str, canonical_path: &str, compute: F) -> crate::error::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let key = Self::key(metric, repo_id, canonical_path);

        let mut conn = self.conn.clone();
        let cached: Option<String> = match conn.get(&key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%key, error = %err, "metric cache read failed, bypassing");
                None
            }
        };

        if let Some(raw) = cached {
            match serde_json::from_str::<T>(&raw) {
                Ok(value) => return Ok(value),
                Err(err) => tracing::warn!(%key, error = %err, "metric cache entry unparseable, recomputing"),
            }
        }

        let value = compute().await?;

        if let Ok(serialized) = serde_json::to_string(&value) {
            let mut conn = self.conn.clone();
            let _: Result<(), _> = conn.set_ex(&key, serialized, METRIC_TTL_SECS).await;
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_matches_spec() {
        assert_eq!(MetricCache::key("coupling", "repo1", "src/a.rs"), "coupling:repo1:src/a.rs");
    }
}
