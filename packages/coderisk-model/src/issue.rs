use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coderisk_core::{window, RepoId, Sha};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Open,
    Closed,
}

/// identity: (repo, number). §3 Issue / PullRequest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub repo_id: RepoId,
    pub number: i64,
    pub state: ItemState,
    pub author: String,
    pub body: String,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Kept iff open OR closed within 90 days of the ingestion run.
    pub fn within_retention_window(&self, now: DateTime<Utc>) -> bool {
        window::within_retention(self.closed_at, now)
    }
}

/// identity: (repo, number). Same numbering space as Issue on GitHub, a
/// PullRequest additionally tracks merge state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub repo_id: RepoId,
    pub number: i64,
    pub state: ItemState,
    pub author: String,
    pub body: String,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged: bool,
    pub merged_at: Option<DateTime<Utc>>,
    pub merge_commit_sha: Option<Sha>,
    pub head_ref: String,
    pub base_ref: String,
}

impl PullRequest {
    pub fn within_retention_window(&self, now: DateTime<Utc>) -> bool {
        window::within_retention(self.closed_at, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Pr,
    Issue,
}

/// §4.6 comment-enriched extraction: the commenter's relationship to the
/// repo, each carrying its own evidence tag and confidence boost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommenterRole {
    Owner,
    Collaborator,
    Bot,
    Contributor,
}

impl CommenterRole {
    pub fn evidence_tag(&self) -> &'static str {
        match self {
            CommenterRole::Owner => "owner_comment",
            CommenterRole::Collaborator => "collaborator_comment",
            CommenterRole::Bot => "bot_comment",
            CommenterRole::Contributor => "contributor_comment",
        }
    }

    pub fn boost(&self) -> f64 {
        match self {
            CommenterRole::Owner => 0.10,
            CommenterRole::Collaborator => 0.08,
            CommenterRole::Bot => 0.05,
            CommenterRole::Contributor => 0.03,
        }
    }
}

/// identity: auto (uuid). §3/§4.6: a comment on an issue or PR, scanned by
/// the comment-enriched reference pass and boosted by the commenter's role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: Uuid,
    pub repo_id: RepoId,
    pub issue_number: i64,
    pub author: String,
    pub author_role: CommenterRole,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl IssueComment {
    pub fn new(repo_id: RepoId, issue_number: i64, author: impl Into<String>, author_role: CommenterRole, body: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self { id: Uuid::new_v4(), repo_id, issue_number, author: author.into(), author_role, body: body.into(), created_at }
    }
}

/// identity: auto (uuid). §3 TimelineEvent. `event_type` is free text in
/// the upstream API but the three values below are the ones the temporal
/// correlator and reference extractor act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: Uuid,
    pub repo_id: RepoId,
    pub issue_number: i64,
    pub event_type: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub source_type: Option<SourceType>,
    pub source_number: Option<i64>,
    pub source_title: Option<String>,
    pub source_body: Option<String>,
    pub source_state: Option<String>,
    pub source_merged_at: Option<DateTime<Utc>>,
}

impl TimelineEvent {
    pub const CROSS_REFERENCED: &'static str = "cross-referenced";
    pub const CLOSED: &'static str = "closed";
    pub const MERGED: &'static str = "merged";

    pub fn new(
        repo_id: RepoId,
        issue_number: i64,
        event_type: impl Into<String>,
        actor: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            repo_id,
            issue_number,
            event_type: event_type.into(),
            actor: actor.into(),
            created_at,
            source_type: None,
            source_number: None,
            source_title: None,
            source_body: None,
            source_state: None,
            source_merged_at: None,
        }
    }

    pub fn is_cross_reference(&self) -> bool {
        self.event_type == Self::CROSS_REFERENCED
    }
}
