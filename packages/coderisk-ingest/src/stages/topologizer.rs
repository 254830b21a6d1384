//! Topologizer (§4.4): orders a repo's staged commits via Kahn's algorithm
//! (ascending `author_date` as the tie-breaker among ready nodes) and
//! detects force-pushes by recomputing each commit's parent-set hash
//! against whatever this stage last assigned it.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};

const MAX_COMMITS: usize = 500_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologizerOutput {
    /// Commit shas in ascending topological order.
    pub ordered_shas: Vec<String>,
    pub topological_index: HashMap<String, i64>,
    /// Hash of each commit's sorted parent set, carried forward so a
    /// resumed or re-run job can detect a force-push (§4.4).
    pub parent_shas_hash: HashMap<String, u64>,
}

fn hash_parents(parents: &[String]) -> u64 {
    let mut sorted = parents.to_vec();
    sorted.sort();
    let mut hasher = DefaultHasher::new();
    sorted.hash(&mut hasher);
    hasher.finish()
}

pub struct TopologizerStage;

#[async_trait]
impl StageHandler for TopologizerStage {
    fn stage_id(&self) -> StageId {
        StageId::Topologizer
    }

    async fn execute(&self, _input: StageInput, ctx: &mut StageContext) -> Result<StageOutput> {
        let commits = ctx.staging.fetch_unprocessed_commits(&ctx.repo_id, MAX_COMMITS).await.map_err(OrchestratorError::config)?;

        let own_cache_key = ctx.cache_keys.key_for_stage(StageId::Topologizer);
        let previous: Option<TopologizerOutput> = ctx
            .checkpoint_mgr
            .load_checkpoint(&own_cache_key)
            .await?
            .and_then(|bytes| bincode::deserialize(&bytes).ok());

        let mut known: HashSet<String> = HashSet::new();
        let mut parents_of: HashMap<String, Vec<String>> = HashMap::new();
        let mut author_date_of: HashMap<String, chrono::DateTime<chrono::Utc>> = HashMap::new();
        let mut children_of: HashMap<String, Vec<String>> = HashMap::new();

        for commit in &commits {
            let sha = commit.sha.as_str().to_string();
            known.insert(sha.clone());
            let parents: Vec<String> = commit.parent_shas.iter().map(|s| s.as_str().to_string()).collect();
            parents_of.insert(sha.clone(), parents);
            author_date_of.insert(sha.clone(), commit.author_date);
        }

        for (sha, parents) in &parents_of {
            for parent in parents {
                if known.contains(parent) {
                    children_of.entry(parent.clone()).or_default().push(sha.clone());
                }
            }
        }

        if let Some(prev) = &previous {
            for (sha, parents) in &parents_of {
                if let Some(prev_hash) = prev.parent_shas_hash.get(sha) {
                    let recomputed = hash_parents(parents);
                    if *prev_hash != recomputed {
                        return Err(OrchestratorError::StageExecutionFailed(format!(
                            "integrity violation: force-push detected, parent set of {sha} changed since last ingestion"
                        ))
                        .into());
                    }
                }
            }
        }

        // Kahn's algorithm: in-degree counts only parents known to this batch.
        let mut in_degree: HashMap<String, usize> =
            parents_of.iter().map(|(sha, parents)| (sha.clone(), parents.iter().filter(|p| known.contains(*p)).count())).collect();

        let mut ready: Vec<String> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(sha, _)| sha.clone()).collect();
        ready.sort_by(|a, b| author_date_of[a].cmp(&author_date_of[b]).then_with(|| a.cmp(b)));
        let mut queue: VecDeque<String> = ready.into();

        let mut ordered_shas = Vec::with_capacity(known.len());
        let mut topological_index = HashMap::with_capacity(known.len());

        while let Some(sha) = queue.pop_front() {
            topological_index.insert(sha.clone(), ordered_shas.len() as i64);
            ordered_shas.push(sha.clone());

            if let Some(children) = children_of.get(&sha) {
                let mut newly_ready = Vec::new();
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            newly_ready.push(child.clone());
                        }
                    }
                }
                newly_ready.sort_by(|a, b| author_date_of[a].cmp(&author_date_of[b]).then_with(|| a.cmp(b)));
                for child in newly_ready {
                    queue.push_back(child);
                }
            }
        }

        if ordered_shas.len() != known.len() {
            return Err(OrchestratorError::StageExecutionFailed("integrity violation: cycle detected in commit parent graph".to_string()).into());
        }

        let parent_shas_hash: HashMap<String, u64> = parents_of.iter().map(|(sha, parents)| (sha.clone(), hash_parents(parents))).collect();

        let output = TopologizerOutput { ordered_shas, topological_index, parent_shas_hash };
        let cache_data = bincode::serialize(&output).map_err(OrchestratorError::Bincode)?;

        Ok(StageOutput {
            cache_data,
            metrics: StageMetrics { items_processed: commits.len(), entities_created: 0, duration_ms: 0, errors: vec![] },
        })
    }

    fn output_cache_key(&self, ctx: &StageContext) -> String {
        ctx.cache_keys.key_for_stage(StageId::Topologizer)
    }
}
