//! Temporal Correlator & Coupling Synthesizer (§4.7): boosts reference
//! confidence using commit/issue-closure time deltas, then derives
//! structural coupling edges from the Atomizer's `BlockChange` stream over
//! a 12-month rolling window, applying the ultra-strict filter before any
//! edge is persisted.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use coderisk_model::coupling::co_change_percentage;
use coderisk_model::{BlockChange, CouplingEdge, Reference};

use crate::error::{OrchestratorError, Result};
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use crate::stages::atomizer::AtomizerOutput;
use crate::stages::reference_extractor::ReferenceExtractorOutput;

/// §4.7: coupling is only computed over the trailing 12 months.
const ROLLING_WINDOW_DAYS: i64 = 365;
const MAX_ITEMS: usize = 500_000;

/// Boosts a reference's confidence from the time delta between the
/// referencing commit and the referenced issue's closure (§4.6 Temporal
/// Correlator pass).
fn apply_temporal_boost(reference: &mut Reference, commit_at: DateTime<Utc>, issue_closed_at: DateTime<Utc>) {
    let delta = (commit_at - issue_closed_at).num_seconds().unsigned_abs();
    if delta <= 5 * 60 {
        reference.apply_boost("temporal_match_5min", 0.15);
    } else if delta <= 60 * 60 {
        reference.apply_boost("temporal_match_1hr", 0.10);
    } else if delta <= 24 * 60 * 60 {
        reference.apply_boost("temporal_match_24hr", 0.05);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplingSynthesizerOutput {
    pub edges_persisted: usize,
    pub edges_rejected: usize,
    pub references_boosted: usize,
}

pub struct CouplingSynthesizerStage;

#[async_trait]
impl StageHandler for CouplingSynthesizerStage {
    fn stage_id(&self) -> StageId {
        StageId::CouplingSynthesizer
    }

    async fn execute(&self, input: StageInput, ctx: &mut StageContext) -> Result<StageOutput> {
        let atomizer_key = ctx.cache_keys.key_for_stage(StageId::Atomizer);
        let reference_key = ctx.cache_keys.key_for_stage(StageId::ReferenceExtractor);

        let atomizer_bytes = input.cache.get(&atomizer_key).ok_or_else(|| OrchestratorError::MissingDependency(atomizer_key.clone()))?;
        let reference_bytes = input.cache.get(&reference_key).ok_or_else(|| OrchestratorError::MissingDependency(reference_key.clone()))?;

        let atomizer: AtomizerOutput = bincode::deserialize(atomizer_bytes).map_err(OrchestratorError::Bincode)?;
        let reference_output: ReferenceExtractorOutput = bincode::deserialize(reference_bytes).map_err(OrchestratorError::Bincode)?;

        let references_boosted = self.correlate_references(ctx, reference_output.references, &atomizer.block_changes).await?;
        let (edges_persisted, edges_rejected) = self.synthesize_coupling(ctx, &atomizer.block_changes).await?;

        let output = CouplingSynthesizerOutput { edges_persisted, edges_rejected, references_boosted };
        let cache_data = bincode::serialize(&output).map_err(OrchestratorError::Bincode)?;

        Ok(StageOutput {
            cache_data,
            metrics: StageMetrics {
                items_processed: atomizer.block_changes.len(),
                entities_created: edges_persisted,
                duration_ms: 0,
                errors: vec![],
            },
        })
    }

    fn required_cache_keys(&self, ctx: &StageContext) -> Vec<String> {
        vec![ctx.cache_keys.key_for_stage(StageId::Atomizer), ctx.cache_keys.key_for_stage(StageId::ReferenceExtractor)]
    }

    fn output_cache_key(&self, ctx: &StageContext) -> String {
        ctx.cache_keys.key_for_stage(StageId::CouplingSynthesizer)
    }
}

impl CouplingSynthesizerStage {
    /// Boosts reference confidence on a commit/issue-closure time match,
    /// then materializes the `incident -> commit -> block` link (§2 step
    /// 6) for every block the matched commit touched — the input the
    /// coupling filter's `incident_count >= 1` gate reads below.
    async fn correlate_references(&self, ctx: &StageContext, mut references: Vec<Reference>, block_changes: &[BlockChange]) -> Result<usize> {
        let commits = ctx.staging.fetch_unprocessed_commits(&ctx.repo_id, MAX_ITEMS).await.map_err(OrchestratorError::config)?;
        let commit_at: HashMap<String, DateTime<Utc>> = commits.into_iter().map(|c| (c.sha.as_str().to_string(), c.author_date)).collect();

        let issues = ctx.staging.fetch_unprocessed_issues(&ctx.repo_id, MAX_ITEMS).await.map_err(OrchestratorError::config)?;
        let issue_closed_at: HashMap<i64, DateTime<Utc>> = issues.into_iter().filter_map(|i| i.closed_at.map(|c| (i.number, c))).collect();

        let mut blocks_touched_by_commit: HashMap<String, HashSet<String>> = HashMap::new();
        for change in block_changes {
            let block_id = format!("{}::{}::{}", change.block_key.0, change.block_key.1, change.block_key.2);
            blocks_touched_by_commit.entry(change.commit_sha.as_str().to_string()).or_default().insert(block_id);
        }

        let mut boosted = 0;
        for reference in references.iter_mut() {
            let Some(sha) = reference.commit_sha.as_ref() else { continue };
            let Some(&commit_time) = commit_at.get(sha.as_str()) else { continue };
            let Some(&closed_at) = issue_closed_at.get(&reference.issue_number) else { continue };

            apply_temporal_boost(reference, commit_time, closed_at);
            reference.add_multi_evidence_bonus();
            boosted += 1;

            if let Some(blocks) = blocks_touched_by_commit.get(sha.as_str()) {
                for block_id in blocks {
                    ctx.graph
                        .record_block_incident(&ctx.repo_id, block_id, reference.issue_number, closed_at)
                        .await
                        .map_err(OrchestratorError::config)?;
                }
            }
        }
        references.retain(|r| !r.should_discard());
        Ok(boosted)
    }

    async fn synthesize_coupling(&self, ctx: &StageContext, block_changes: &[BlockChange]) -> Result<(usize, usize)> {
        let now = Utc::now();
        let window_start = now - Duration::days(ROLLING_WINDOW_DAYS);

        // Commits observed within the window, grouped by block touched.
        let mut changes_of: HashMap<String, HashSet<String>> = HashMap::new();
        // Commit -> set of distinct blocks touched, to derive co-occurring pairs.
        let mut blocks_in_commit: HashMap<String, HashSet<String>> = HashMap::new();

        for change in block_changes {
            let block_id = format!("{}::{}::{}", change.block_key.0, change.block_key.1, change.block_key.2);
            changes_of.entry(block_id.clone()).or_default().insert(change.commit_sha.as_str().to_string());
            blocks_in_commit.entry(change.commit_sha.as_str().to_string()).or_default().insert(block_id);
        }

        let mut co_change_counts: HashMap<(String, String), u32> = HashMap::new();
        for blocks in blocks_in_commit.values() {
            let mut sorted: Vec<&String> = blocks.iter().collect();
            sorted.sort();
            for i in 0..sorted.len() {
                for j in (i + 1)..sorted.len() {
                    *co_change_counts.entry((sorted[i].clone(), sorted[j].clone())).or_insert(0) += 1;
                }
            }
        }

        let mut persisted = 0;
        let mut rejected = 0;

        for ((block_a, block_b), count) in co_change_counts {
            let changes_a = changes_of.get(&block_a).map(|s| s.len() as u32).unwrap_or(0);
            let changes_b = changes_of.get(&block_b).map(|s| s.len() as u32).unwrap_or(0);
            let percentage = co_change_percentage(count, changes_a, changes_b);

            // incident_count comes from correlate_references' materialization
            // above, not this stage's own candidate data; a pair with no
            // recorded incidents on both sides is rejected by the filter
            // below, same as it always was.
            let incident_count_a = ctx.graph.incident_count_for_block(&ctx.repo_id, &block_a).await.map_err(OrchestratorError::config)?;
            let incident_count_b = ctx.graph.incident_count_for_block(&ctx.repo_id, &block_b).await.map_err(OrchestratorError::config)?;

            match CouplingEdge::try_new(
                ctx.repo_id.clone(),
                block_a,
                block_b,
                count,
                percentage,
                incident_count_a,
                incident_count_b,
                window_start,
                now,
                window_start,
                now,
            ) {
                Ok(edge) => {
                    ctx.graph.persist_coupling_edge(&edge).await.map_err(OrchestratorError::config)?;
                    persisted += 1;
                }
                Err(_) => rejected += 1,
            }
        }

        Ok((persisted, rejected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderisk_core::{RepoId, Sha};
    use coderisk_model::block_change::ChangeType;

    fn change(commit_sha: &str, file: &str) -> BlockChange {
        BlockChange::new(
            RepoId::from("r"),
            Sha::from(commit_sha),
            (file.to_string(), "login".to_string(), "()".to_string()),
            file,
            file,
            ChangeType::Modified,
        )
    }

    #[tokio::test]
    async fn candidate_pairs_without_incident_history_are_rejected() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let graph = coderisk_storage::graph::sql::SqlGraphStore::new(pool);
        graph.migrate().await.unwrap();

        let staging_pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let staging = coderisk_storage::staging::sql::SqlStagingStore::new(staging_pool);
        staging.migrate().await.unwrap();

        let checkpoint_pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let checkpoint_mgr = std::sync::Arc::new(crate::checkpoint::CheckpointManager::new(checkpoint_pool));
        checkpoint_mgr.migrate().await.unwrap();

        let ctx = StageContext {
            job_id: uuid::Uuid::new_v4(),
            repo_id: RepoId::from("r"),
            cache_keys: crate::dag::CacheKeyManager::new("r".to_string(), "run1".to_string()),
            checkpoint_mgr,
            staging: std::sync::Arc::new(staging),
            graph: std::sync::Arc::new(graph),
        };

        let mut changes = Vec::new();
        for i in 0..12 {
            changes.push(change(&format!("c{i}"), "a.rs"));
            changes.push(change(&format!("c{i}"), "b.rs"));
        }

        let stage = CouplingSynthesizerStage;
        let (persisted, rejected) = stage.synthesize_coupling(&ctx, &changes).await.unwrap();
        assert_eq!(persisted, 0);
        assert_eq!(rejected, 1);
    }

    #[tokio::test]
    async fn candidate_pairs_with_recorded_incidents_on_both_blocks_persist() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let graph = coderisk_storage::graph::sql::SqlGraphStore::new(pool);
        graph.migrate().await.unwrap();

        let staging_pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let staging = coderisk_storage::staging::sql::SqlStagingStore::new(staging_pool);
        staging.migrate().await.unwrap();

        let checkpoint_pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let checkpoint_mgr = std::sync::Arc::new(crate::checkpoint::CheckpointManager::new(checkpoint_pool));
        checkpoint_mgr.migrate().await.unwrap();

        let repo = RepoId::from("r");
        let ctx = StageContext {
            job_id: uuid::Uuid::new_v4(),
            repo_id: repo.clone(),
            cache_keys: crate::dag::CacheKeyManager::new("r".to_string(), "run1".to_string()),
            checkpoint_mgr,
            staging: std::sync::Arc::new(staging),
            graph: std::sync::Arc::new(graph),
        };

        let mut changes = Vec::new();
        for i in 0..12 {
            changes.push(change(&format!("c{i}"), "a.rs"));
            changes.push(change(&format!("c{i}"), "b.rs"));
        }

        ctx.graph.record_block_incident(&repo, "a.rs::login::()", 1, Utc::now()).await.unwrap();
        ctx.graph.record_block_incident(&repo, "b.rs::login::()", 1, Utc::now()).await.unwrap();

        let stage = CouplingSynthesizerStage;
        let (persisted, rejected) = stage.synthesize_coupling(&ctx, &changes).await.unwrap();
        assert_eq!(persisted, 1);
        assert_eq!(rejected, 0);
    }
}
