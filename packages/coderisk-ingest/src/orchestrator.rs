use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::dag::{CacheKeyManager, PipelineDAG, StageNode};
use crate::error::{ErrorCategory, OrchestratorError, Result};
use crate::job::{Job, JobState, JobStateMachine, StageId};
use crate::pipeline::{StageConfig, StageContext, StageHandler, StageInput, StageOutput};
use coderisk_core::RepoId;
use coderisk_storage::{GraphStore, StagingStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Aggregated metrics across a run's stages.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub items_processed: usize,
    pub entities_created: usize,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

impl PipelineResult {
    pub fn merge_metrics(&mut self, metrics: &crate::pipeline::StageMetrics) {
        self.items_processed += metrics.items_processed;
        self.entities_created += metrics.entities_created;
        self.duration_ms += metrics.duration_ms;
        self.errors.extend(metrics.errors.clone());
    }
}

/// Runs one ingestion job through the DAG, checkpointing each stage's
/// output so a crash mid-run resumes from the last completed phase
/// rather than restarting the whole pipeline.
pub struct PipelineOrchestrator {
    dag: Arc<PipelineDAG>,
    checkpoint_mgr: Arc<CheckpointManager>,
    staging: Arc<dyn StagingStore>,
    graph: Arc<dyn GraphStore>,
    stage_handlers: HashMap<StageId, Arc<dyn StageHandler>>,
    worker_id: String,
}

impl PipelineOrchestrator {
    pub fn new(checkpoint_mgr: Arc<CheckpointManager>, staging: Arc<dyn StagingStore>, graph: Arc<dyn GraphStore>) -> Result<Self> {
        let dag = PipelineDAG::default_pipeline()?;
        Ok(Self {
            dag: Arc::new(dag),
            checkpoint_mgr,
            staging,
            graph,
            stage_handlers: HashMap::new(),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        })
    }

    pub fn with_dag(dag: PipelineDAG, checkpoint_mgr: Arc<CheckpointManager>, staging: Arc<dyn StagingStore>, graph: Arc<dyn GraphStore>) -> Self {
        Self {
            dag: Arc::new(dag),
            checkpoint_mgr,
            staging,
            graph,
            stage_handlers: HashMap::new(),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn StageHandler>) {
        self.stage_handlers.insert(handler.stage_id(), handler);
    }

    /// Execute a job (main entry point).
    pub async fn execute_job(&self, mut job: Job) -> Result<(Job, PipelineResult)> {
        let job_id = job.id;
        let start_time = Instant::now();

        info!("Starting job {} for repo {}", job_id, job.repo_id);
        info!("Execution plan:\n{}", self.dag.execution_plan());

        let mut state_machine = JobStateMachine::new(job);
        state_machine.start(self.worker_id.clone(), StageId::FileIdentityResolver)?;
        job = state_machine.into_job();

        let completed = self.checkpoint_mgr.completed_stages(job_id).await?;
        if !completed.is_empty() {
            info!("Resuming from checkpoint - {} stages already completed: {:?}", completed.len(), completed);
        }

        let repo_id = RepoId::from(job.repo_id.clone());
        let result = self.run_dag(job_id, &repo_id, &completed).await;

        let elapsed = start_time.elapsed();

        let final_job = match result {
            Ok(mut pipeline_result) => {
                pipeline_result.duration_ms = elapsed.as_millis() as u64;
                info!(
                    "Job {} completed - processed {} items, created {} entities in {}ms",
                    job_id, pipeline_result.items_processed, pipeline_result.entities_created, pipeline_result.duration_ms
                );

                let mut sm = JobStateMachine::new(job);
                sm.complete(pipeline_result.items_processed)?;
                let completed_job = sm.into_job();

                self.checkpoint_mgr.delete_job_checkpoints(job_id).await?;

                (completed_job, pipeline_result)
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);

                let anyhow_err: anyhow::Error = e.into();
                let error_category = self.classify_error(&anyhow_err);
                let failed_stage = self.get_current_stage_from_error(&anyhow_err);

                let mut sm = JobStateMachine::new(job);
                let retry_count = match &sm.job().state {
                    JobState::Failed { retry_count, .. } => *retry_count + 1,
                    _ => 0,
                };

                sm.fail(anyhow_err.to_string(), error_category, failed_stage, retry_count)?;
                let failed_job = sm.into_job();

                let empty_result = PipelineResult { duration_ms: elapsed.as_millis() as u64, ..Default::default() };

                return Ok((failed_job, empty_result));
            }
        };

        Ok(final_job)
    }

    async fn run_dag(&self, job_id: Uuid, repo_id: &RepoId, completed: &HashSet<StageId>) -> Result<PipelineResult> {
        let ctx = StageContext {
            job_id,
            repo_id: repo_id.clone(),
            cache_keys: CacheKeyManager::new(repo_id.to_string(), job_id.to_string()),
            checkpoint_mgr: self.checkpoint_mgr.clone(),
            staging: self.staging.clone(),
            graph: self.graph.clone(),
        };

        let mut overall_result = PipelineResult::default();

        for (phase_idx, parallel_group) in self.dag.execution_order().iter().enumerate() {
            info!(
                "Job {}: Phase {} - {} stages{}",
                job_id,
                phase_idx + 1,
                parallel_group.len(),
                if parallel_group.len() > 1 { " (parallel)" } else { "" }
            );

            let to_execute: Vec<_> = parallel_group.iter().filter(|id| !completed.contains(id)).copied().collect();

            if to_execute.is_empty() {
                info!("Job {}: Phase {} already completed, skipping", job_id, phase_idx + 1);
                continue;
            }

            let mut tasks = Vec::new();
            for stage_id in &to_execute {
                let stage = self.dag.get_stage(*stage_id).ok_or_else(|| OrchestratorError::StageNotFound(format!("{:?}", stage_id)))?;

                let handler = self
                    .stage_handlers
                    .get(stage_id)
                    .ok_or_else(|| OrchestratorError::Config(format!("No handler registered for stage {:?}", stage_id)))?
                    .clone();

                let stage_ctx = ctx.clone();
                let stage_node = stage.clone();

                tasks.push(tokio::spawn(async move { Self::execute_stage(handler, stage_node, stage_ctx).await }));
            }

            let results = futures::future::join_all(tasks).await;

            for (i, task_result) in results.into_iter().enumerate() {
                let stage_id = to_execute[i];

                match task_result {
                    Ok(Ok(output)) => {
                        let cache_key = ctx.cache_keys.key_for_stage(stage_id);
                        let checkpoint = Checkpoint::new(job_id, stage_id, cache_key, output.cache_data.clone());
                        self.checkpoint_mgr.save_checkpoint(checkpoint).await?;

                        overall_result.merge_metrics(&output.metrics);

                        info!(
                            "Job {}: Stage {:?} completed - {} items, {} entities in {}ms",
                            job_id, stage_id, output.metrics.items_processed, output.metrics.entities_created, output.metrics.duration_ms
                        );
                    }
                    Ok(Err(e)) => {
                        error!("Job {}: Stage {:?} failed: {}", job_id, stage_id, e);
                        return Err(OrchestratorError::StageExecutionFailed(format!("Stage {:?}: {}", stage_id, e)).into());
                    }
                    Err(join_err) => {
                        error!("Job {}: Stage {:?} panicked: {}", job_id, stage_id, join_err);
                        return Err(OrchestratorError::StageExecutionFailed(format!("Stage {:?} panicked: {}", stage_id, join_err)).into());
                    }
                }
            }
        }

        Ok(overall_result)
    }

    async fn execute_stage(handler: Arc<dyn StageHandler>, stage_node: StageNode, mut ctx: StageContext) -> Result<StageOutput> {
        let stage_id = stage_node.id;
        info!("Executing stage: {} ({:?})", stage_node.name, stage_id);

        if handler.can_skip(&ctx).await {
            info!("Stage {:?} skipped (cache hit)", stage_id);
            return Ok(StageOutput { cache_data: vec![], metrics: Default::default() });
        }

        let mut cache = HashMap::new();
        for dep_id in &stage_node.dependencies {
            let cache_key = ctx.cache_keys.key_for_stage(*dep_id);
            if let Some(data) = ctx.checkpoint_mgr.load_checkpoint(&cache_key).await? {
                cache.insert(cache_key.clone(), data);
                info!("Loaded dependency cache for {:?} ({} bytes)", dep_id, cache[&cache_key].len());
            } else {
                warn!("Missing required cache: {} (dependency {:?})", cache_key, dep_id);
                return Err(OrchestratorError::MissingDependency(format!("Cache not found for dependency {:?}: {}", dep_id, cache_key)).into());
            }
        }

        let input = StageInput { cache, config: StageConfig::default() };

        let timeout = tokio::time::Duration::from_millis(stage_node.timeout_ms);
        let result = tokio::time::timeout(timeout, handler.execute(input, &mut ctx)).await;

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(OrchestratorError::Timeout(format!("Stage {:?} timed out after {}ms", stage_id, stage_node.timeout_ms)).into()),
        }
    }

    /// Classify error for retry logic (§7 propagation policy).
    fn classify_error(&self, error: &anyhow::Error) -> ErrorCategory {
        let error_str = error.to_string();

        if error_str.contains("integrity") || error_str.contains("duplicate canonical path") {
            ErrorCategory::Permanent
        } else if error_str.contains("timeout") || error_str.contains("connection") {
            ErrorCategory::Transient
        } else if error_str.contains("OOM") || error_str.contains("out of memory") {
            ErrorCategory::Infrastructure
        } else if error_str.contains("parse error") || error_str.contains("invalid") {
            ErrorCategory::Permanent
        } else {
            ErrorCategory::Transient
        }
    }

    fn get_current_stage_from_error(&self, error: &anyhow::Error) -> StageId {
        let error_str = error.to_string();

        if error_str.contains("FileIdentityResolver") || error_str.contains("file_identity_resolver") {
            StageId::FileIdentityResolver
        } else if error_str.contains("Topologizer") || error_str.contains("topologizer") {
            StageId::Topologizer
        } else if error_str.contains("Atomizer") || error_str.contains("atomizer") {
            StageId::Atomizer
        } else if error_str.contains("ReferenceExtractor") || error_str.contains("reference_extractor") {
            StageId::ReferenceExtractor
        } else if error_str.contains("CouplingSynthesizer") || error_str.contains("coupling_synthesizer") {
            StageId::CouplingSynthesizer
        } else {
            StageId::FileIdentityResolver
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageMetrics;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;

    struct MockHandler {
        id: StageId,
        should_fail: bool,
    }

    #[async_trait]
    impl StageHandler for MockHandler {
        fn stage_id(&self) -> StageId {
            self.id
        }

        async fn execute(&self, _input: StageInput, _ctx: &mut StageContext) -> Result<StageOutput> {
            if self.should_fail {
                return Err(OrchestratorError::StageExecutionFailed("Mock failure".to_string()).into());
            }

            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

            Ok(StageOutput {
                cache_data: bincode::serialize(&vec![1u8, 2, 3]).unwrap(),
                metrics: StageMetrics { items_processed: 3, entities_created: 6, duration_ms: 10, errors: vec![] },
            })
        }

        fn output_cache_key(&self, ctx: &StageContext) -> String {
            ctx.cache_keys.key_for_stage(self.id)
        }
    }

    async fn test_orchestrator() -> PipelineOrchestrator {
        let checkpoint_pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let checkpoint_mgr = Arc::new(CheckpointManager::new(checkpoint_pool));
        checkpoint_mgr.migrate().await.unwrap();

        let staging_pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let staging = coderisk_storage::staging::sql::SqlStagingStore::new(staging_pool);
        staging.migrate().await.unwrap();

        let graph_pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let graph = coderisk_storage::graph::sql::SqlGraphStore::new(graph_pool);
        graph.migrate().await.unwrap();

        PipelineOrchestrator::new(checkpoint_mgr, Arc::new(staging), Arc::new(graph)).unwrap()
    }

    #[tokio::test]
    async fn orchestrator_creation_succeeds() {
        let _orch = test_orchestrator().await;
    }

    #[tokio::test]
    async fn error_classification_matches_propagation_policy() {
        let orch = test_orchestrator().await;

        let timeout_err = anyhow::anyhow!("timeout occurred");
        assert_eq!(orch.classify_error(&timeout_err), ErrorCategory::Transient);

        let oom_err = anyhow::anyhow!("OOM: out of memory");
        assert_eq!(orch.classify_error(&oom_err), ErrorCategory::Infrastructure);

        let integrity_err = anyhow::anyhow!("integrity violation: duplicate canonical path");
        assert_eq!(orch.classify_error(&integrity_err), ErrorCategory::Permanent);
    }

    #[tokio::test]
    async fn execute_stage_success_returns_metrics() {
        let handler = Arc::new(MockHandler { id: StageId::FileIdentityResolver, should_fail: false });

        let checkpoint_pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let checkpoint_mgr = Arc::new(CheckpointManager::new(checkpoint_pool));
        checkpoint_mgr.migrate().await.unwrap();

        let staging_pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let staging = coderisk_storage::staging::sql::SqlStagingStore::new(staging_pool);
        staging.migrate().await.unwrap();

        let graph_pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let graph = coderisk_storage::graph::sql::SqlGraphStore::new(graph_pool);
        graph.migrate().await.unwrap();

        let ctx = StageContext {
            job_id: Uuid::new_v4(),
            repo_id: RepoId::from("test"),
            cache_keys: CacheKeyManager::new("test".to_string(), "run1".to_string()),
            checkpoint_mgr,
            staging: Arc::new(staging),
            graph: Arc::new(graph),
        };

        let stage_node = StageNode::new(StageId::FileIdentityResolver, "Test", vec![], false, 5000);

        let result = PipelineOrchestrator::execute_stage(handler, stage_node, ctx).await;
        assert!(result.is_ok());
        assert_eq!(result.unwrap().metrics.items_processed, 3);
    }

    #[tokio::test]
    async fn pipeline_result_merge_accumulates_metrics() {
        let mut result = PipelineResult::default();

        let metrics = StageMetrics { items_processed: 10, entities_created: 20, duration_ms: 1000, errors: vec!["error1".to_string()] };

        result.merge_metrics(&metrics);

        assert_eq!(result.items_processed, 10);
        assert_eq!(result.entities_created, 20);
        assert_eq!(result.duration_ms, 1000);
        assert_eq!(result.errors.len(), 1);
    }
}
