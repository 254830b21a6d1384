//! File Identity Resolver (§4.3): traces renames backward across a repo's
//! staged commit history and produces the canonical-path mapping every
//! downstream stage queries by historical path.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use coderisk_core::Sha;
use coderisk_model::{FileIdentity, FileStatus};
use coderisk_storage::FileChangeKind;

use crate::error::{OrchestratorError, Result};
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};

/// Ceiling on commits pulled per run. The Fetcher already bounds history to
/// the retention window (§4.2); this just guards against an unbounded scan.
const MAX_COMMITS: usize = 500_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIdentityResolverOutput {
    pub identities: Vec<FileIdentity>,
    /// Every path a file was ever known by, including the canonical one,
    /// mapped to its current canonical path. The production deployment
    /// backs this with a GIN-indexed lookup table (§4.3); in-process this
    /// is the equivalent O(1) map the other stages consult.
    pub historical_to_canonical: HashMap<String, String>,
}

pub struct FileIdentityResolverStage;

#[async_trait]
impl StageHandler for FileIdentityResolverStage {
    fn stage_id(&self) -> StageId {
        StageId::FileIdentityResolver
    }

    async fn execute(&self, _input: StageInput, ctx: &mut StageContext) -> Result<StageOutput> {
        let commits = ctx.staging.fetch_unprocessed_commits(&ctx.repo_id, MAX_COMMITS).await.map_err(OrchestratorError::config)?;

        // identities keyed by their *current* canonical path.
        let mut identities: HashMap<String, FileIdentity> = HashMap::new();
        // every path ever seen -> the canonical path it currently resolves to.
        let mut path_index: HashMap<String, String> = HashMap::new();

        let mut diffs_seen = 0usize;

        for commit in &commits {
            let diffs = ctx.staging.fetch_file_diffs(&ctx.repo_id, commit.sha.as_str()).await.map_err(OrchestratorError::config)?;

            for diff in &diffs {
                diffs_seen += 1;

                match diff.change_kind {
                    FileChangeKind::Added => {
                        if path_index.contains_key(&diff.path) {
                            // Path reused after a prior deletion; treat as a fresh identity.
                            path_index.remove(&diff.path);
                        }
                        let identity = FileIdentity::new(
                            ctx.repo_id.clone(),
                            diff.path.clone(),
                            commit.sha.clone(),
                            commit.sha.clone(),
                            commit.author_date,
                        );
                        path_index.insert(diff.path.clone(), diff.path.clone());
                        identities.insert(diff.path.clone(), identity);
                    }
                    FileChangeKind::Modified => {
                        if let Some(canonical) = path_index.get(&diff.path).cloned() {
                            if let Some(identity) = identities.get_mut(&canonical) {
                                identity.last_modified_commit = commit.sha.clone();
                                identity.last_modified_at = commit.author_date;
                            }
                        } else {
                            // Modified without a prior Added in the retention
                            // window (history predates the fetch) - synthesize
                            // an identity starting at this commit.
                            let identity = FileIdentity::new(
                                ctx.repo_id.clone(),
                                diff.path.clone(),
                                commit.sha.clone(),
                                commit.sha.clone(),
                                commit.author_date,
                            );
                            path_index.insert(diff.path.clone(), diff.path.clone());
                            identities.insert(diff.path.clone(), identity);
                        }
                    }
                    FileChangeKind::Deleted => {
                        if let Some(canonical) = path_index.get(&diff.path).cloned() {
                            if let Some(identity) = identities.get_mut(&canonical) {
                                identity.status = FileStatus::Deleted;
                                identity.last_modified_commit = commit.sha.clone();
                                identity.last_modified_at = commit.author_date;
                            }
                        }
                    }
                    FileChangeKind::Renamed => {
                        let old_path = diff.previous_path.clone().unwrap_or_else(|| diff.path.clone());
                        let canonical = path_index.get(&old_path).cloned().unwrap_or_else(|| old_path.clone());

                        if let Some(mut identity) = identities.remove(&canonical) {
                            identity.historical_paths.push(diff.path.clone());
                            identity.canonical_path = diff.path.clone();
                            identity.status = FileStatus::Active;
                            identity.last_modified_commit = commit.sha.clone();
                            identity.last_modified_at = commit.author_date;

                            for historical in identity.historical_paths.clone() {
                                path_index.insert(historical, diff.path.clone());
                            }
                            path_index.insert(diff.path.clone(), diff.path.clone());
                            identities.insert(diff.path.clone(), identity);
                        } else {
                            // No prior record of the old path either - the
                            // rename's source predates the fetch window.
                            let mut identity = FileIdentity::new(
                                ctx.repo_id.clone(),
                                diff.path.clone(),
                                commit.sha.clone(),
                                commit.sha.clone(),
                                commit.author_date,
                            );
                            identity.prepend_historical_path(old_path.clone());
                            path_index.insert(old_path, diff.path.clone());
                            path_index.insert(diff.path.clone(), diff.path.clone());
                            identities.insert(diff.path.clone(), identity);
                        }
                    }
                }
            }
        }

        for identity in identities.values() {
            if !identity.holds_invariant() {
                return Err(OrchestratorError::StageExecutionFailed(format!(
                    "integrity violation: duplicate canonical path detected for {}",
                    identity.canonical_path
                ))
                .into());
            }
        }

        let identities: Vec<FileIdentity> = identities.into_values().collect();

        let output = FileIdentityResolverOutput { identities, historical_to_canonical: path_index };
        let cache_data = bincode::serialize(&output).map_err(OrchestratorError::Bincode)?;

        Ok(StageOutput {
            cache_data,
            metrics: StageMetrics {
                items_processed: diffs_seen,
                entities_created: output.identities.len(),
                duration_ms: 0,
                errors: vec![],
            },
        })
    }

    fn output_cache_key(&self, ctx: &StageContext) -> String {
        ctx.cache_keys.key_for_stage(StageId::FileIdentityResolver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coderisk_core::RepoId;
    use coderisk_model::Commit;
    use coderisk_storage::{FileDiffRecord, StagingStore};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    async fn ctx_with_history() -> (StageContext, std::collections::HashMap<String, String>) {
        let staging_pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let staging = coderisk_storage::staging::sql::SqlStagingStore::new(staging_pool);
        staging.migrate().await.unwrap();

        let graph_pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let graph = coderisk_storage::graph::sql::SqlGraphStore::new(graph_pool);
        graph.migrate().await.unwrap();

        let checkpoint_pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let checkpoint_mgr = Arc::new(crate::checkpoint::CheckpointManager::new(checkpoint_pool));
        checkpoint_mgr.migrate().await.unwrap();

        let repo = RepoId::from("acme/widgets");

        let c1 = Commit::new(repo.clone(), coderisk_core::Sha::from("c1"), "alice", "alice@example.com", Utc::now(), "add login.rs", vec![], "t1");
        staging.store_commit(&c1).await.unwrap();
        staging
            .store_file_diffs(
                &repo,
                "c1",
                &[FileDiffRecord {
                    repo_id: repo.clone(),
                    commit_sha: "c1".into(),
                    path: "login.rs".into(),
                    previous_path: None,
                    change_kind: FileChangeKind::Added,
                    size_bytes: 100,
                    lines_added: 20,
                    lines_deleted: 0,
                    patch: None,
                }],
            )
            .await
            .unwrap();

        let c2 = Commit::new(
            repo.clone(),
            coderisk_core::Sha::from("c2"),
            "alice",
            "alice@example.com",
            Utc::now() + chrono::Duration::seconds(1),
            "move into src/auth",
            vec![coderisk_core::Sha::from("c1")],
            "t2",
        );
        staging.store_commit(&c2).await.unwrap();
        staging
            .store_file_diffs(
                &repo,
                "c2",
                &[FileDiffRecord {
                    repo_id: repo.clone(),
                    commit_sha: "c2".into(),
                    path: "src/auth/login.rs".into(),
                    previous_path: Some("login.rs".into()),
                    change_kind: FileChangeKind::Renamed,
                    size_bytes: 110,
                    lines_added: 2,
                    lines_deleted: 1,
                    patch: None,
                }],
            )
            .await
            .unwrap();

        let ctx = StageContext {
            job_id: uuid::Uuid::new_v4(),
            repo_id: repo,
            cache_keys: crate::dag::CacheKeyManager::new("acme/widgets".to_string(), "run1".to_string()),
            checkpoint_mgr,
            staging: Arc::new(staging),
            graph: Arc::new(graph),
        };

        (ctx, HashMap::new())
    }

    #[tokio::test]
    async fn resolves_a_rename_into_a_single_canonical_identity() {
        let (mut ctx, _) = ctx_with_history().await;
        let stage = FileIdentityResolverStage;

        let input = StageInput { cache: HashMap::new(), config: Default::default() };
        let output = stage.execute(input, &mut ctx).await.unwrap();

        let decoded: FileIdentityResolverOutput = bincode::deserialize(&output.cache_data).unwrap();
        assert_eq!(decoded.identities.len(), 1);

        let identity = &decoded.identities[0];
        assert_eq!(identity.canonical_path, "src/auth/login.rs");
        assert_eq!(identity.historical_paths, vec!["login.rs", "src/auth/login.rs"]);
        assert!(identity.holds_invariant());

        assert_eq!(decoded.historical_to_canonical.get("login.rs").unwrap(), "src/auth/login.rs");
        assert_eq!(decoded.historical_to_canonical.get("src/auth/login.rs").unwrap(), "src/auth/login.rs");
    }
}
