use serde::{Deserialize, Serialize};

use coderisk_core::{RepoId, Sha};

/// Confidence never stored at exactly 1.0; multi-evidence fusion caps at
/// this value (§3 Reference invariant).
pub const MAX_CONFIDENCE: f64 = 0.98;
/// References dropping below this after validation penalty are discarded
/// (§4.6).
pub const MIN_CONFIDENCE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceAction {
    Fixes,
    Closes,
    Resolves,
    Mentions,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    IssueBody,
    PrBody,
    CommitMessage,
    IssueTimeline,
}

/// identity: (repo, issue_number, commit_sha?, pr_number?, detection_method).
/// §3 Reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub repo_id: RepoId,
    pub issue_number: i64,
    pub commit_sha: Option<Sha>,
    pub pr_number: Option<i64>,
    pub detection_method: String,
    pub action: ReferenceAction,
    confidence: f64,
    pub evidence_tags: Vec<String>,
    pub extraction_source: ExtractionSource,
}

impl Reference {
    /// Clamps `confidence` into `[0, 0.98]` on construction — the cap is
    /// normative (§9 open question resolution), not a best-effort clamp
    /// applied only at fusion time.
    pub fn new(
        repo_id: RepoId,
        issue_number: i64,
        commit_sha: Option<Sha>,
        pr_number: Option<i64>,
        detection_method: impl Into<String>,
        action: ReferenceAction,
        confidence: f64,
        extraction_source: ExtractionSource,
    ) -> Self {
        Self {
            repo_id,
            issue_number,
            commit_sha,
            pr_number,
            detection_method: detection_method.into(),
            action,
            confidence: confidence.clamp(0.0, MAX_CONFIDENCE),
            evidence_tags: Vec::new(),
            extraction_source,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Adds an evidence tag and applies the corresponding boost, capped at
    /// `MAX_CONFIDENCE`. Each distinct tag beyond the first also adds the
    /// flat +0.03 multi-evidence bonus (§4.6), applied by the caller via
    /// [`Reference::add_multi_evidence_bonus`] once all tags are known.
    pub fn apply_boost(&mut self, tag: impl Into<String>, boost: f64) {
        let tag = tag.into();
        if !self.evidence_tags.contains(&tag) {
            self.evidence_tags.push(tag);
            self.confidence = (self.confidence + boost).min(MAX_CONFIDENCE);
        }
    }

    /// +0.03 per additional distinct evidence tag beyond the first,
    /// capped at `MAX_CONFIDENCE` (§4.6 confidence combination).
    pub fn add_multi_evidence_bonus(&mut self) {
        let extra_tags = self.evidence_tags.len().saturating_sub(1);
        if extra_tags > 0 {
            self.confidence = (self.confidence + 0.03 * extra_tags as f64).min(MAX_CONFIDENCE);
        }
    }

    /// Applies the validator's hallucination penalty: multiply confidence
    /// by 0.3 if the target token was not found in the source text.
    pub fn apply_validation_penalty(&mut self) {
        self.confidence = (self.confidence * 0.3).clamp(0.0, MAX_CONFIDENCE);
    }

    pub fn should_discard(&self) -> bool {
        self.confidence < MIN_CONFIDENCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(confidence: f64) -> Reference {
        Reference::new(
            RepoId::from("r"),
            123,
            Some(Sha::from("c1")),
            None,
            "commit_extraction",
            ReferenceAction::Fixes,
            confidence,
            ExtractionSource::CommitMessage,
        )
    }

    #[test]
    fn confidence_is_clamped_at_construction() {
        let r = reference(1.0);
        assert_eq!(r.confidence(), MAX_CONFIDENCE);
    }

    #[test]
    fn boost_caps_at_max_confidence() {
        let mut r = reference(0.95);
        r.apply_boost("temporal_match_5min", 0.15);
        assert_eq!(r.confidence(), MAX_CONFIDENCE);
    }

    #[test]
    fn validation_penalty_scenario_from_spec() {
        // commit message "Fix login", LLM returns confidence 0.9, no
        // matching token found in source text -> 0.9 * 0.3 = 0.27, kept.
        let mut r = reference(0.9);
        r.apply_validation_penalty();
        assert!((r.confidence() - 0.27).abs() < 1e-9);
        assert!(!r.should_discard());
    }

    #[test]
    fn validation_penalty_drops_low_confidence_reference() {
        // same scenario but LLM confidence 0.5 -> 0.15, discarded.
        let mut r = reference(0.5);
        r.apply_validation_penalty();
        assert!((r.confidence() - 0.15).abs() < 1e-9);
        assert!(r.should_discard());
    }

    #[test]
    fn multi_evidence_bonus_applies_per_extra_tag() {
        let mut r = reference(0.5);
        r.evidence_tags.push("explicit".into());
        r.evidence_tags.push("owner_comment".into());
        r.evidence_tags.push("semantic_high".into());
        r.add_multi_evidence_bonus();
        assert!((r.confidence() - 0.56).abs() < 1e-9);
    }
}
