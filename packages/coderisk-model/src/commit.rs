use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coderisk_core::{RepoId, Sha};

/// identity: (repo, sha). §3 Commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub repo_id: RepoId,
    pub sha: Sha,
    pub author_name: String,
    pub author_email: String,
    pub author_date: DateTime<Utc>,
    pub message: String,
    pub additions: u32,
    pub deletions: u32,
    pub total: u32,
    pub files_changed: u32,
    /// Ordered parent SHAs; empty for a root commit.
    pub parent_shas: Vec<Sha>,
    pub tree_sha: String,
    /// Monotonically increasing along parent→child edges; not required to
    /// be dense. Assigned by the topologizer (§4.4), absent until then.
    pub topological_index: Option<i64>,
    pub diff_chunks_processed: u32,
    pub diff_chunks_skipped: u32,
    pub diff_truncation_reason: Option<String>,
}

impl Commit {
    pub fn new(
        repo_id: RepoId,
        sha: Sha,
        author_name: impl Into<String>,
        author_email: impl Into<String>,
        author_date: DateTime<Utc>,
        message: impl Into<String>,
        parent_shas: Vec<Sha>,
        tree_sha: impl Into<String>,
    ) -> Self {
        Self {
            repo_id,
            sha,
            author_name: author_name.into(),
            author_email: author_email.into(),
            author_date,
            message: message.into(),
            additions: 0,
            deletions: 0,
            total: 0,
            files_changed: 0,
            parent_shas,
            tree_sha: tree_sha.into(),
            topological_index: None,
            diff_chunks_processed: 0,
            diff_chunks_skipped: 0,
            diff_truncation_reason: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_shas.is_empty()
    }

    /// Marks this commit as auto-skipped for atomization because its
    /// changed-file count exceeds the mass-reformat threshold (§8 boundary
    /// behavior: >1000 changed files).
    pub fn mark_truncated(&mut self, reason: impl Into<String>) {
        self.diff_truncation_reason = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(parents: Vec<Sha>) -> Commit {
        Commit::new(
            RepoId::from("r"),
            Sha::from("deadbeef"),
            "a",
            "a@example.com",
            Utc::now(),
            "msg",
            parents,
            "treesha",
        )
    }

    #[test]
    fn no_parents_is_root() {
        assert!(commit(vec![]).is_root());
    }

    #[test]
    fn with_parents_is_not_root() {
        assert!(!commit(vec![Sha::from("p1")]).is_root());
    }

    #[test]
    fn truncation_reason_recorded() {
        let mut c = commit(vec![]);
        c.mark_truncated("more than 1000 files changed");
        assert!(c.diff_truncation_reason.is_some());
    }
}
