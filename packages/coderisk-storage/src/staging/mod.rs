//! The Staging Store (§4.1): a durable landing zone for raw GitHub records,
//! decoupled from graph schema evolution. All writes carry the full raw
//! record as an opaque blob plus extracted indexed fields; this is the sole
//! authority for "did we already fetch this?".

#[cfg(feature = "sql")]
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coderisk_core::RepoId;
use coderisk_model::{Commit, Issue, IssueComment, PullRequest, TimelineEvent};

use crate::error::Result;

/// A branch observed at fetch time. Not a graph entity (§3 has no Branch
/// type) — staging-only, matching the Fetcher's raw output list (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRecord {
    pub repo_id: RepoId,
    pub name: String,
    pub head_sha: String,
    pub is_default: bool,
}

/// A contributor observed at fetch time. Staging-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributorRecord {
    pub repo_id: RepoId,
    pub login: String,
    pub commit_count: u32,
}

/// Per-language byte counts as reported by the provider. Staging-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguagesRecord {
    pub repo_id: RepoId,
    pub language: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// Per-commit, per-file detail from the Fetcher's "files, stats" payload
/// (§4.2) — the Atomizer's Stage 1 pre-filter and Stage 2 extractor both
/// operate on these, never on `Commit` itself (which only carries
/// aggregate totals). Staging-only: discarded once atomized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiffRecord {
    pub repo_id: RepoId,
    pub commit_sha: String,
    pub path: String,
    pub previous_path: Option<String>,
    pub change_kind: FileChangeKind,
    pub size_bytes: u64,
    pub lines_added: u32,
    pub lines_deleted: u32,
    /// Unified diff text, absent when the Fetcher truncated a huge file.
    pub patch: Option<String>,
}

/// Powers the Fetcher's selective re-run policy (§4.2): "if a data class
/// has non-zero rows for this repo, skip it; otherwise fetch."
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataCounts {
    pub commits: u64,
    pub issues: u64,
    pub pull_requests: u64,
    pub branches: u64,
    pub timeline_events: u64,
    pub contributors: u64,
    pub languages: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataClass {
    Commit,
    Issue,
    PullRequest,
    TimelineEvent,
}

/// The natural key a staging row is upserted on, by data class. Used by
/// `mark_processed` to stamp exactly one row without a round trip to
/// re-fetch it first.
#[derive(Debug, Clone)]
pub enum NaturalKey {
    Commit { sha: String },
    Issue { number: i64 },
    PullRequest { number: i64 },
    TimelineEvent { id: uuid::Uuid },
}

/// identity: natural key per data class. §4.1 Staging Store.
///
/// Guarantees: per-record insert failures are logged and counted but do not
/// abort a batch (§4.1 failure semantics) — implementations return
/// `Vec<StorageError>` for partial failures in batch operations rather than
/// failing the whole call, and only return `Err` for an error that affects
/// the entire batch (e.g. the connection is gone).
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn store_repository_status(&self, repo_id: &RepoId, status: coderisk_model::IngestionStatus) -> Result<()>;

    /// Append-or-upsert-by-sha. Idempotent under retry.
    async fn store_commit(&self, commit: &Commit) -> Result<()>;
    async fn store_commits(&self, commits: &[Commit]) -> Result<Vec<StorageError>>;

    async fn store_issue(&self, issue: &Issue) -> Result<()>;
    async fn store_pull_request(&self, pr: &PullRequest) -> Result<()>;
    async fn store_branch(&self, branch: &BranchRecord) -> Result<()>;
    async fn store_timeline_event(&self, event: &TimelineEvent) -> Result<()>;
    async fn store_contributor(&self, contributor: &ContributorRecord) -> Result<()>;
    async fn store_languages(&self, languages: &[LanguagesRecord]) -> Result<()>;
    async fn store_issue_comment(&self, comment: &IssueComment) -> Result<()>;

    /// `v_unprocessed_commits`-equivalent: rows with `processed_at IS NULL`.
    async fn fetch_unprocessed_commits(&self, repo_id: &RepoId, limit: usize) -> Result<Vec<Commit>>;
    async fn fetch_unprocessed_issues(&self, repo_id: &RepoId, limit: usize) -> Result<Vec<Issue>>;
    async fn fetch_unprocessed_pull_requests(&self, repo_id: &RepoId, limit: usize) -> Result<Vec<PullRequest>>;

    async fn fetch_unprocessed_timeline_events(&self, repo_id: &RepoId, limit: usize) -> Result<Vec<TimelineEvent>>;

    /// Every staged comment on one issue or PR, oldest first.
    async fn fetch_issue_comments(&self, repo_id: &RepoId, issue_number: i64) -> Result<Vec<IssueComment>>;

    async fn mark_processed(&self, repo_id: &RepoId, class: DataClass, key: NaturalKey, processed_at: DateTime<Utc>) -> Result<()>;

    async fn get_data_counts(&self, repo_id: &RepoId) -> Result<DataCounts>;

    /// Stages one commit's per-file change list. Idempotent: re-staging
    /// the same commit replaces its prior rows.
    async fn store_file_diffs(&self, repo_id: &RepoId, commit_sha: &str, diffs: &[FileDiffRecord]) -> Result<()>;

    async fn fetch_file_diffs(&self, repo_id: &RepoId, commit_sha: &str) -> Result<Vec<FileDiffRecord>>;
}

pub use crate::error::StorageError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_counts_default_to_zero() {
        let counts = DataCounts::default();
        assert_eq!(counts.commits, 0);
        assert_eq!(counts.languages, 0);
    }
}
