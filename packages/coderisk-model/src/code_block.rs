use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coderisk_core::{RepoId, Sha};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Function,
    Class,
    Method,
}

/// identity: (repo, canonical_file_path, block_name, signature). §3 CodeBlock.
///
/// Any CodeBlock reachable by renaming is the same entity: its id (the
/// identity tuple) does not change when its name or file path changes —
/// callers rename in place via [`CodeBlock::rename`] rather than
/// constructing a new block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeBlock {
    pub repo_id: RepoId,
    pub canonical_file_path: String,
    pub block_name: String,
    /// Normalized parameter list, enabling overloads to coexist under the
    /// same name.
    pub signature: String,
    pub block_type: BlockType,
    pub path_at_creation: String,
    pub first_seen_commit: Sha,
    pub last_modified_commit: Sha,
    pub last_modified_date: DateTime<Utc>,
    pub complexity_estimate: f64,
    pub historical_block_names: Vec<String>,

    // Risk signals, materialized onto the block. Static: never updated on
    // read. Dynamic multipliers (staleness, recency) are computed at query
    // time by the metric engine, not stored here.
    pub incident_count: u32,
    pub last_incident_date: Option<DateTime<Utc>>,
    pub temporal_summary: Option<String>,
    pub original_author: String,
    pub last_modifier: String,
    pub familiarity_map: HashMap<String, u32>,
    pub co_change_count: u32,
    pub avg_coupling_rate: f64,
    pub risk_score: f64,
}

impl CodeBlock {
    pub fn new(
        repo_id: RepoId,
        canonical_file_path: impl Into<String>,
        block_name: impl Into<String>,
        signature: impl Into<String>,
        block_type: BlockType,
        first_seen_commit: Sha,
        author: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let canonical_file_path = canonical_file_path.into();
        let block_name = block_name.into();
        let author = author.into();
        Self {
            repo_id,
            path_at_creation: canonical_file_path.clone(),
            canonical_file_path,
            historical_block_names: vec![block_name.clone()],
            block_name,
            signature: signature.into(),
            block_type,
            first_seen_commit: first_seen_commit.clone(),
            last_modified_commit: first_seen_commit,
            last_modified_date: created_at,
            complexity_estimate: 0.0,
            incident_count: 0,
            last_incident_date: None,
            temporal_summary: None,
            last_modifier: author.clone(),
            original_author: author,
            familiarity_map: HashMap::new(),
            co_change_count: 0,
            avg_coupling_rate: 0.0,
            risk_score: 0.0,
        }
    }

    /// Identity tuple this block is keyed on. Two blocks with equal keys
    /// are the same entity regardless of how they arrived here.
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.canonical_file_path, &self.block_name, &self.signature)
    }

    /// Renames the block in place (old name recorded), preserving identity.
    pub fn rename(&mut self, new_name: impl Into<String>, commit: Sha, at: DateTime<Utc>) {
        self.block_name = new_name.into();
        self.historical_block_names.push(self.block_name.clone());
        self.last_modified_commit = commit;
        self.last_modified_date = at;
    }

    pub fn record_incident(&mut self, at: DateTime<Utc>) {
        self.incident_count += 1;
        self.last_incident_date = match self.last_incident_date {
            Some(prev) if prev >= at => Some(prev),
            _ => Some(at),
        };
    }

    pub fn record_touch(&mut self, author: impl Into<String>) {
        *self.familiarity_map.entry(author.into()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> CodeBlock {
        CodeBlock::new(
            RepoId::from("r"),
            "src/auth.rs",
            "login",
            "(user: &str)",
            BlockType::Function,
            Sha::from("c1"),
            "alice",
            Utc::now(),
        )
    }

    #[test]
    fn rename_preserves_identity_key_file_and_signature() {
        let mut b = block();
        let (file_before, _, sig_before) = b.key();
        let (file_before, sig_before) = (file_before.to_string(), sig_before.to_string());
        b.rename("authenticate", Sha::from("c2"), Utc::now());
        assert_eq!(b.canonical_file_path, file_before);
        assert_eq!(b.signature, sig_before);
        assert_eq!(b.block_name, "authenticate");
        assert_eq!(b.historical_block_names, vec!["login", "authenticate"]);
    }

    #[test]
    fn incidents_accumulate_and_track_latest_date() {
        let mut b = block();
        let t1 = Utc::now() - chrono::Duration::days(10);
        let t2 = Utc::now();
        b.record_incident(t1);
        b.record_incident(t2);
        assert_eq!(b.incident_count, 2);
        assert_eq!(b.last_incident_date, Some(t2));
    }

    #[test]
    fn out_of_order_incident_does_not_regress_last_incident_date() {
        let mut b = block();
        let newer = Utc::now();
        let older = newer - chrono::Duration::days(5);
        b.record_incident(newer);
        b.record_incident(older);
        assert_eq!(b.last_incident_date, Some(newer));
    }
}
