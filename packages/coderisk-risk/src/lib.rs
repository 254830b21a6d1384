//! Phase1/Phase2 risk evaluation (§4.9-§4.13). `RiskEngine` is the crate's
//! single entry point: it runs the Metric Engine over a file's tier-1
//! signals (cached per §4.13), and escalates to the Investigation
//! Orchestrator (§4.12) only when Phase1 evidence calls for it.

pub mod cache;
pub mod domain_selector;
pub mod error;
pub mod investigation;
pub mod metrics;

use std::sync::Arc;

use coderisk_core::RepoId;
use coderisk_llm::LlmClient;
use coderisk_model::ConfigProfile;
use coderisk_storage::GraphStore;

pub use cache::MetricCache;
pub use domain_selector::{select_profile, Domain, RepoMetadata, SelectionResult};
pub use error::{Result, RiskError};
pub use investigation::{Factor, InvestigationOrchestrator, Verdict};
pub use metrics::{score_file, MetricReport, MetricSignal, Severity};

pub struct RiskEngine {
    graph: Arc<dyn GraphStore>,
    cache: Option<MetricCache>,
    investigator: Option<InvestigationOrchestrator>,
}

impl RiskEngine {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph, cache: None, investigator: None }
    }

    pub fn with_cache(mut self, cache: MetricCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Wires in Phase2. Absent this, `evaluate` never escalates past the
    /// Metric Engine - matching `PHASE2_ENABLED=false` (§6).
    pub fn with_investigator(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.investigator = Some(InvestigationOrchestrator::new(llm, self.graph.clone()));
        self
    }

    /// Runs the Metric Engine for one file, going through the cache when
    /// configured. Each of the three tier-1 reads is cached independently
    /// under its own `{metric}:{repo}:{path}` key (§4.13).
    pub async fn score_file(&self, repo_id: &RepoId, profile: &ConfigProfile, canonical_path: &str, historical_paths: &[String]) -> Result<MetricReport> {
        let (coupling_count, co_change, test_ratio) = match &self.cache {
            Some(cache) => {
                let repo_key = repo_id.as_str();
                let coupling = cache
                    .get_or_compute("coupling", repo_key, canonical_path, || async {
                        self.graph.coupling_for_file(repo_id, historical_paths).await.map_err(RiskError::Graph)
                    })
                    .await?;
                let co_change: Vec<coderisk_storage::graph::CoChangeEntry> = cache
                    .get_or_compute("co_change", repo_key, canonical_path, || async {
                        self.graph.co_change_for_file(repo_id, historical_paths).await.map_err(RiskError::Graph)
                    })
                    .await?;
                let test_ratio = cache
                    .get_or_compute("test_ratio", repo_key, canonical_path, || async {
                        self.graph.test_ratio(repo_id, historical_paths).await.map_err(RiskError::Graph)
                    })
                    .await?;
                (coupling, co_change, test_ratio)
            }
            None => {
                let coupling = self.graph.coupling_for_file(repo_id, historical_paths).await.map_err(RiskError::Graph)?;
                let co_change = self.graph.co_change_for_file(repo_id, historical_paths).await.map_err(RiskError::Graph)?;
                let test_ratio = self.graph.test_ratio(repo_id, historical_paths).await.map_err(RiskError::Graph)?;
                (coupling, co_change, test_ratio)
            }
        };

        Ok(score_file(profile, coupling_count, &co_change, test_ratio))
    }

    /// Full Phase1 + conditional Phase2 evaluation. Only calls the
    /// Investigation Orchestrator when Phase1's `escalate` fired and Phase2
    /// is actually wired in; otherwise returns a verdict built straight
    /// from Phase1 evidence, same shape either way.
    pub async fn evaluate(
        &self,
        repo_id: &RepoId,
        profile: &ConfigProfile,
        canonical_path: &str,
        historical_paths: &[String],
        diff_context: &str,
    ) -> Result<Verdict> {
        let report = self.score_file(repo_id, profile, canonical_path, historical_paths).await?;

        match (&report.escalate, &self.investigator) {
            (true, Some(investigator)) => investigator.investigate(repo_id, canonical_path, historical_paths, diff_context, &report).await,
            _ => Ok(Verdict {
                risk_level: report.aggregate,
                top_factors: report
                    .escalation_reasons
                    .iter()
                    .take(3)
                    .map(|reason| Factor { description: reason.clone(), evidence: "phase1 metric engine".to_string() })
                    .collect(),
                suggestions: Vec::new(),
                degraded: false,
            }),
        }
    }
}
