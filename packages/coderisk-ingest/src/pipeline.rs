use crate::checkpoint::CheckpointManager;
use crate::dag::CacheKeyManager;
use crate::error::Result;
use crate::job::StageId;
use async_trait::async_trait;
use coderisk_core::RepoId;
use coderisk_storage::{GraphStore, StagingStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Stage context passed to handlers. Stages read raw records from the
/// Staging Store and write derived entities into the Graph Store — there
/// is no local filesystem checkout to walk; ingestion operates entirely
/// over data already landed by the Fetcher (§4.2).
#[derive(Clone)]
pub struct StageContext {
    pub job_id: Uuid,
    pub repo_id: RepoId,
    pub cache_keys: CacheKeyManager,
    pub checkpoint_mgr: Arc<CheckpointManager>,
    pub staging: Arc<dyn StagingStore>,
    pub graph: Arc<dyn GraphStore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub parallel_workers: usize,
    pub batch_size: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            parallel_workers: num_cpus::get() * 3 / 4,
            batch_size: 100,
        }
    }
}

/// Stage input: only the upstream stages' cached output and run config —
/// each stage pulls its own working set from the Staging/Graph Store via
/// `ctx`.
pub struct StageInput {
    pub cache: HashMap<String, Vec<u8>>,
    pub config: StageConfig,
}

pub struct StageOutput {
    pub cache_data: Vec<u8>,
    pub metrics: StageMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageMetrics {
    pub items_processed: usize,
    pub entities_created: usize,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

/// Pluggable ingestion stage (§4.3-§4.7).
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage_id(&self) -> StageId;

    async fn can_skip(&self, _ctx: &StageContext) -> bool {
        false
    }

    async fn execute(&self, input: StageInput, ctx: &mut StageContext) -> Result<StageOutput>;

    fn required_cache_keys(&self, _ctx: &StageContext) -> Vec<String> {
        vec![]
    }

    fn output_cache_key(&self, ctx: &StageContext) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointManager;
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn stage_config_default_has_positive_workers() {
        let config = StageConfig::default();
        assert!(config.parallel_workers > 0);
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn stage_metrics_default_is_zeroed() {
        let metrics = StageMetrics::default();
        assert_eq!(metrics.items_processed, 0);
        assert_eq!(metrics.errors.len(), 0);
    }

    struct MockStage {
        id: StageId,
    }

    #[async_trait]
    impl StageHandler for MockStage {
        fn stage_id(&self) -> StageId {
            self.id
        }

        async fn execute(&self, _input: StageInput, _ctx: &mut StageContext) -> Result<StageOutput> {
            Ok(StageOutput {
                cache_data: vec![1, 2, 3],
                metrics: StageMetrics { items_processed: 5, entities_created: 10, duration_ms: 100, errors: vec![] },
            })
        }

        fn output_cache_key(&self, ctx: &StageContext) -> String {
            ctx.cache_keys.key_for_stage(self.id)
        }
    }

    async fn test_ctx() -> StageContext {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let staging = coderisk_storage::staging::sql::SqlStagingStore::new(pool.clone());
        staging.migrate().await.unwrap();

        let graph_pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let graph = coderisk_storage::graph::sql::SqlGraphStore::new(graph_pool);
        graph.migrate().await.unwrap();

        let checkpoint_pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let checkpoint_mgr = Arc::new(CheckpointManager::new(checkpoint_pool));
        checkpoint_mgr.migrate().await.unwrap();

        StageContext {
            job_id: Uuid::new_v4(),
            repo_id: RepoId::from("repo1"),
            cache_keys: CacheKeyManager::new("repo1".to_string(), "run1".to_string()),
            checkpoint_mgr,
            staging: Arc::new(staging),
            graph: Arc::new(graph),
        }
    }

    #[tokio::test]
    async fn mock_stage_execution_reports_metrics() {
        let stage = MockStage { id: StageId::FileIdentityResolver };
        let mut ctx = test_ctx().await;

        let input = StageInput { cache: HashMap::new(), config: StageConfig::default() };
        let output = stage.execute(input, &mut ctx).await.unwrap();

        assert_eq!(output.metrics.items_processed, 5);
        assert_eq!(output.cache_data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stage_output_cache_key_uses_cache_key_manager() {
        let stage = MockStage { id: StageId::FileIdentityResolver };
        let ctx = test_ctx().await;

        let key = stage.output_cache_key(&ctx);
        assert_eq!(key, "file_identity_resolver:repo1:run1");
    }
}
