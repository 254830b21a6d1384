use serde::{Deserialize, Serialize};

use coderisk_core::{RepoId, Sha};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// identity: (repo, commit, block). §3 BlockChange.
///
/// Created append-only; never mutated. The atomizer only ever constructs
/// new rows, it does not edit ones already persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockChange {
    pub repo_id: RepoId,
    pub commit_sha: Sha,
    /// Identity key of the CodeBlock this change applies to, i.e.
    /// `(canonical_file_path, block_name, signature)`.
    pub block_key: (String, String, String),
    pub canonical_file_path: String,
    /// The path the file had at commit time (may predate a later rename).
    pub commit_time_path: String,
    pub change_type: ChangeType,
    pub old_name: Option<String>,
    pub lines_added: u32,
    pub lines_deleted: u32,
    pub complexity_delta: Option<f64>,
    pub change_summary: Option<String>,
}

impl BlockChange {
    pub fn new(
        repo_id: RepoId,
        commit_sha: Sha,
        block_key: (String, String, String),
        canonical_file_path: impl Into<String>,
        commit_time_path: impl Into<String>,
        change_type: ChangeType,
    ) -> Self {
        Self {
            repo_id,
            commit_sha,
            block_key,
            canonical_file_path: canonical_file_path.into(),
            commit_time_path: commit_time_path.into(),
            change_type,
            old_name: None,
            lines_added: 0,
            lines_deleted: 0,
            complexity_delta: None,
            change_summary: None,
        }
    }

    /// A `renamed` change must carry `old_name`; this is the shape the
    /// atomizer is required to emit (§4.5).
    pub fn renamed(
        repo_id: RepoId,
        commit_sha: Sha,
        block_key: (String, String, String),
        canonical_file_path: impl Into<String>,
        commit_time_path: impl Into<String>,
        old_name: impl Into<String>,
    ) -> Self {
        let mut change = Self::new(
            repo_id,
            commit_sha,
            block_key,
            canonical_file_path,
            commit_time_path,
            ChangeType::Renamed,
        );
        change.old_name = Some(old_name.into());
        change
    }
}
