use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use coderisk_core::RepoId;

/// Ingestion lifecycle of a repository (§3 Repository).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// identity: external repo id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub ingestion_status: IngestionStatus,
    /// Stable digest over the ordered parent SHAs of the latest N commits.
    /// A mismatch on a later run forces full re-ingestion (force-push
    /// detection, §4.4).
    pub parent_shas_hash: Option<String>,
    pub local_clone_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    /// Created on first ingestion.
    pub fn new(id: RepoId, owner: impl Into<String>, name: impl Into<String>, default_branch: impl Into<String>) -> Self {
        Self {
            id,
            owner: owner.into(),
            name: name.into(),
            default_branch: default_branch.into(),
            ingestion_status: IngestionStatus::Pending,
            parent_shas_hash: None,
            local_clone_path: None,
            created_at: Utc::now(),
        }
    }

    /// Updates `parent_shas_hash` on a successful pipeline run and returns
    /// whether this is a force-push (mismatch against the prior hash).
    /// A repository with no prior hash is never a force-push.
    pub fn record_parent_shas_hash(&mut self, new_hash: String) -> bool {
        let is_force_push = matches!(&self.parent_shas_hash, Some(prev) if *prev != new_hash);
        self.parent_shas_hash = Some(new_hash);
        is_force_push
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_repository_is_pending() {
        let repo = Repository::new(RepoId::from("acme/widgets"), "acme", "widgets", "main");
        assert_eq!(repo.ingestion_status, IngestionStatus::Pending);
        assert!(repo.parent_shas_hash.is_none());
    }

    #[test]
    fn first_hash_is_not_a_force_push() {
        let mut repo = Repository::new(RepoId::from("acme/widgets"), "acme", "widgets", "main");
        assert!(!repo.record_parent_shas_hash("abc".into()));
    }

    #[test]
    fn changed_hash_is_a_force_push() {
        let mut repo = Repository::new(RepoId::from("acme/widgets"), "acme", "widgets", "main");
        repo.record_parent_shas_hash("abc".into());
        assert!(repo.record_parent_shas_hash("def".into()));
    }

    #[test]
    fn unchanged_hash_is_not_a_force_push() {
        let mut repo = Repository::new(RepoId::from("acme/widgets"), "acme", "widgets", "main");
        repo.record_parent_shas_hash("abc".into());
        assert!(!repo.record_parent_shas_hash("abc".into()));
    }
}
