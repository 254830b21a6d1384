//! The Graph Store (§4.8): a queryable property-graph projection of
//! canonical entities and edges. Every query takes the full historical
//! path set (§4.3), not just the current path, so rename-induced history
//! gaps are invisible to callers.

pub mod adjacency;
#[cfg(feature = "sql")]
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coderisk_core::RepoId;
use coderisk_model::CouplingEdge;

use crate::error::Result;

/// One partner in a file's co-change neighborhood (§4.8 co-change query).
/// `Serialize`/`Deserialize` so §4.13's cache layer can hold this as a
/// serialized result object rather than raw graph rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoChangeEntry {
    pub partner_path: String,
    pub cochange_count: u32,
    pub frequency: f64,
}

/// Tier-2 ownership churn, invoked on demand by the investigation
/// orchestrator (§4.8).
#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipChurn {
    pub distinct_authors: Vec<String>,
    pub commit_counts: std::collections::HashMap<String, u32>,
    pub current_owner: Option<String>,
    pub previous_owner: Option<String>,
    pub days_since_transition: Option<i64>,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// `coupling_count` = number of distinct neighbors over IMPORTS/CALLS
    /// edges, unioned across every historical path.
    async fn coupling_for_file(&self, repo_id: &RepoId, historical_paths: &[String]) -> Result<usize>;

    /// Aggregated CO_CHANGED edges, ordered by count descending, top 20.
    async fn co_change_for_file(&self, repo_id: &RepoId, historical_paths: &[String]) -> Result<Vec<CoChangeEntry>>;

    /// `(test_loc + 1) / (source_loc + 1)`, smoothed to avoid division by
    /// zero for a file with zero source LOC (§8 boundary behavior).
    async fn test_ratio(&self, repo_id: &RepoId, historical_paths: &[String]) -> Result<f64>;

    async fn ownership_churn(&self, repo_id: &RepoId, historical_paths: &[String], window_days: i64, now: DateTime<Utc>) -> Result<OwnershipChurn>;

    /// Persists an already-filtered coupling edge (§4.7's ultra-strict
    /// filter has already run by the time this is called — there is no
    /// path that persists an edge without going through
    /// `CouplingEdge::try_new` first).
    async fn persist_coupling_edge(&self, edge: &CouplingEdge) -> Result<()>;

    async fn record_structural_edge(&self, repo_id: &RepoId, from_path: &str, to_path: &str) -> Result<()>;

    /// One commit's touch of one file, feeding both `ownership_churn` and
    /// the co-change candidate count (§4.7 step 1 operates on blocks; this
    /// is the file-level projection `ownership_churn` needs).
    #[allow(clippy::too_many_arguments)]
    async fn record_file_commit(
        &self,
        repo_id: &RepoId,
        path: &str,
        author: &str,
        commit_sha: &str,
        at: DateTime<Utc>,
        lines_added: u32,
        lines_deleted: u32,
    ) -> Result<()>;

    /// Latest known LOC snapshot for a file, feeding `test_ratio`. A file
    /// is classified as test-or-source by [`looks_like_test_file`]; the
    /// atomizer records whichever side this file's LOC belongs to.
    async fn record_loc(&self, repo_id: &RepoId, path: &str, source_loc: u64, test_loc: u64) -> Result<()>;

    /// Records that `block_id` was touched by a commit tied to
    /// `issue_number`, i.e. the `incident -> commit -> block` link §4.7
    /// needs to populate `CodeBlock.incident_count`. Idempotent per
    /// `(repo_id, block_id, issue_number)` — a boosted reference observed
    /// again does not double-count.
    async fn record_block_incident(&self, repo_id: &RepoId, block_id: &str, issue_number: i64, detected_at: DateTime<Utc>) -> Result<()>;

    /// Distinct incident count materialized against a block, the quantity
    /// the coupling filter's `incident_count >= 1` gate reads (§4.7).
    async fn incident_count_for_block(&self, repo_id: &RepoId, block_id: &str) -> Result<u32>;
}

/// `(test_loc+1)/(source_loc+1)` — never a division by zero even when
/// `source_loc == 0` (§8).
pub fn smoothed_test_ratio(test_loc: u64, source_loc: u64) -> f64 {
    (test_loc as f64 + 1.0) / (source_loc as f64 + 1.0)
}

/// Language-specific naming convention used to locate test files absent an
/// explicit TESTS edge (§4.8).
pub fn looks_like_test_file(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.contains("/test/")
        || lower.contains("/tests/")
        || lower.contains("_test.")
        || lower.ends_with("_test.go")
        || lower.ends_with(".test.ts")
        || lower.ends_with(".test.js")
        || lower.ends_with(".spec.ts")
        || lower.starts_with("test_")
        || lower.contains("/test_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_source_loc_does_not_divide_by_zero() {
        // spec scenario: file with zero source LOC, test_loc = N ->
        // test_ratio = N + 1.
        assert_eq!(smoothed_test_ratio(5, 0), 6.0);
    }

    #[test]
    fn zero_both_yields_one() {
        assert_eq!(smoothed_test_ratio(0, 0), 1.0);
    }

    #[test]
    fn recognizes_common_test_naming_conventions() {
        assert!(looks_like_test_file("src/auth_test.py"));
        assert!(looks_like_test_file("internal/auth/handler_test.go"));
        assert!(looks_like_test_file("src/components/Button.test.ts"));
        assert!(looks_like_test_file("tests/test_login.py"));
        assert!(!looks_like_test_file("src/auth.py"));
    }
}
