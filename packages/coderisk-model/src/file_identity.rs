use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coderisk_core::{RepoId, Sha};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Active,
    Deleted,
    Renamed,
}

/// identity: (repo, canonical_path). §3 File identity / §4.3.
///
/// Invariant: `canonical_path` equals the last element of
/// `historical_paths`; every other historical path maps to exactly one
/// canonical_path within a repo (enforced by the resolver, not by this
/// struct in isolation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIdentity {
    pub repo_id: RepoId,
    pub canonical_path: String,
    /// Ordered chronologically, terminated by `canonical_path`.
    pub historical_paths: Vec<String>,
    pub first_seen_commit: Sha,
    pub last_modified_commit: Sha,
    pub last_modified_at: DateTime<Utc>,
    pub status: FileStatus,
    pub language: Option<String>,
    pub file_type: Option<String>,
}

impl FileIdentity {
    pub fn new(
        repo_id: RepoId,
        canonical_path: impl Into<String>,
        first_seen_commit: Sha,
        last_modified_commit: Sha,
        last_modified_at: DateTime<Utc>,
    ) -> Self {
        let canonical_path = canonical_path.into();
        Self {
            repo_id,
            historical_paths: vec![canonical_path.clone()],
            canonical_path,
            first_seen_commit,
            last_modified_commit,
            last_modified_at,
            status: FileStatus::Active,
            language: None,
            file_type: None,
        }
    }

    /// Prepends an older path discovered while tracing rename history
    /// backward. `historical_paths` stays chronological with
    /// `canonical_path` as the last element.
    pub fn prepend_historical_path(&mut self, older_path: impl Into<String>) {
        self.historical_paths.insert(0, older_path.into());
    }

    pub fn holds_invariant(&self) -> bool {
        self.historical_paths.last().map(String::as_str) == Some(self.canonical_path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> FileIdentity {
        FileIdentity::new(
            RepoId::from("r"),
            "src/auth/login.rs",
            Sha::from("c1"),
            Sha::from("c2"),
            Utc::now(),
        )
    }

    #[test]
    fn fresh_identity_satisfies_invariant() {
        assert!(identity().holds_invariant());
    }

    #[test]
    fn renamed_file_keeps_canonical_as_last_element() {
        let mut id = identity();
        id.prepend_historical_path("src/login.rs");
        id.prepend_historical_path("login.rs");
        assert!(id.holds_invariant());
        assert_eq!(
            id.historical_paths,
            vec!["login.rs", "src/login.rs", "src/auth/login.rs"]
        );
    }
}
