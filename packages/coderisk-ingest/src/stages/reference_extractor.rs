//! Reference Extractor (§4.6): five passes looking for an issue/PR
//! reference and the action implied around it — commit messages, issue
//! bodies, PR bodies, issue timelines, and issue/PR comments.
//!
//! §4.6 runs the text-scanning passes through an LLM and validates each hit
//! by checking the referenced token is actually present in the source text
//! (applying a ×0.3 penalty when it isn't). `coderisk-llm` doesn't exist yet
//! for this extraction path, so this stage extracts references by direct
//! pattern match instead of an LLM call — the match is the validation, so
//! there is nothing to penalize. The `Reference` shape, evidence tags, and
//! confidence model are identical either way, so swapping in an LLM-backed
//! pass later is a change to `scan_text` alone. The timeline pass needs no
//! LLM at all: a timeline cross-reference event is already a structured
//! fact, not free text to interpret.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use coderisk_core::Sha;
use coderisk_model::reference::{ExtractionSource, Reference, ReferenceAction};
use coderisk_model::SourceType;

use crate::error::{OrchestratorError, Result};
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};

const MAX_ITEMS: usize = 500_000;
/// §4.6: timeline cross-references carry this fixed confidence rather than
/// going through `base_confidence` — they're a structured fact, not a
/// pattern match with a keyword/bare-mention split.
const TIMELINE_CROSS_REFERENCE_CONFIDENCE: f64 = 0.85;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceExtractorOutput {
    pub references: Vec<Reference>,
}

/// A single "#NNN" occurrence together with whichever action keyword (if
/// any) immediately preceded it.
struct RawMention {
    issue_number: i64,
    action: ReferenceAction,
}

fn keyword_action(word: &str) -> Option<ReferenceAction> {
    match word.to_ascii_lowercase().as_str() {
        "fix" | "fixes" | "fixed" => Some(ReferenceAction::Fixes),
        "close" | "closes" | "closed" => Some(ReferenceAction::Closes),
        "resolve" | "resolves" | "resolved" => Some(ReferenceAction::Resolves),
        "duplicate" => Some(ReferenceAction::Duplicate),
        _ => None,
    }
}

/// Scans free text for "#NNN" references. The word immediately before a
/// reference, if a recognized keyword, sets its action; otherwise it's a
/// bare mention.
fn scan_text(text: &str) -> Vec<RawMention> {
    let mut mentions = Vec::new();
    let words: Vec<&str> = text.split_whitespace().collect();

    for (i, word) in words.iter().enumerate() {
        let Some(hash_pos) = word.find('#') else { continue };
        let digits: String = word[hash_pos + 1..].chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }
        let Ok(issue_number) = digits.parse::<i64>() else { continue };

        let action = if i > 0 {
            let prev = words[i - 1].trim_matches(|c: char| !c.is_ascii_alphabetic());
            keyword_action(prev).unwrap_or(ReferenceAction::Mentions)
        } else {
            ReferenceAction::Mentions
        };

        mentions.push(RawMention { issue_number, action });
    }

    mentions
}

/// Baseline confidence before evidence-tag boosts (§4.6): an explicit
/// keyword ("fixes #123") is stronger signal than a bare mention.
fn base_confidence(action: ReferenceAction) -> f64 {
    match action {
        ReferenceAction::Mentions => 0.4,
        _ => 0.65,
    }
}

/// §3's closed evidence-tag vocabulary only has one tag for a keyword
/// match ("explicit"); a bare mention earns no tag at all, so there's
/// nothing to boost here.
fn apply_explicit_tag(reference: &mut Reference, action: ReferenceAction) {
    if action != ReferenceAction::Mentions {
        reference.apply_boost("explicit", 0.0);
    }
}

pub struct ReferenceExtractorStage;

#[async_trait]
impl StageHandler for ReferenceExtractorStage {
    fn stage_id(&self) -> StageId {
        StageId::ReferenceExtractor
    }

    async fn execute(&self, _input: StageInput, ctx: &mut StageContext) -> Result<StageOutput> {
        let mut references = Vec::new();

        let commits = ctx.staging.fetch_unprocessed_commits(&ctx.repo_id, MAX_ITEMS).await.map_err(OrchestratorError::config)?;
        for commit in &commits {
            for mention in scan_text(&commit.message) {
                let mut reference = Reference::new(
                    ctx.repo_id.clone(),
                    mention.issue_number,
                    Some(Sha::from(commit.sha.as_str())),
                    None,
                    "commit_message_pattern",
                    mention.action,
                    base_confidence(mention.action),
                    ExtractionSource::CommitMessage,
                );
                apply_explicit_tag(&mut reference, mention.action);
                reference.add_multi_evidence_bonus();
                references.push(reference);
            }
        }

        let issues = ctx.staging.fetch_unprocessed_issues(&ctx.repo_id, MAX_ITEMS).await.map_err(OrchestratorError::config)?;
        for issue in &issues {
            for mention in scan_text(&issue.body) {
                if mention.issue_number == issue.number {
                    continue;
                }
                let mut reference = Reference::new(
                    ctx.repo_id.clone(),
                    mention.issue_number,
                    None,
                    None,
                    "issue_body_pattern",
                    mention.action,
                    base_confidence(mention.action),
                    ExtractionSource::IssueBody,
                );
                apply_explicit_tag(&mut reference, mention.action);
                reference.add_multi_evidence_bonus();
                references.push(reference);
            }

            let comments = ctx.staging.fetch_issue_comments(&ctx.repo_id, issue.number).await.map_err(OrchestratorError::config)?;
            for comment in &comments {
                for mention in scan_text(&comment.body) {
                    if mention.issue_number == issue.number {
                        continue;
                    }
                    let mut reference = Reference::new(
                        ctx.repo_id.clone(),
                        mention.issue_number,
                        None,
                        None,
                        "issue_comment_pattern",
                        mention.action,
                        base_confidence(mention.action),
                        ExtractionSource::IssueBody,
                    );
                    apply_explicit_tag(&mut reference, mention.action);
                    reference.apply_boost(comment.author_role.evidence_tag(), comment.author_role.boost());
                    reference.add_multi_evidence_bonus();
                    references.push(reference);
                }
            }
        }

        let prs = ctx.staging.fetch_unprocessed_pull_requests(&ctx.repo_id, MAX_ITEMS).await.map_err(OrchestratorError::config)?;
        for pr in &prs {
            for mention in scan_text(&pr.body) {
                let mut reference = Reference::new(
                    ctx.repo_id.clone(),
                    mention.issue_number,
                    pr.merge_commit_sha.clone(),
                    Some(pr.number),
                    "pr_body_pattern",
                    mention.action,
                    base_confidence(mention.action),
                    ExtractionSource::PrBody,
                );
                apply_explicit_tag(&mut reference, mention.action);
                reference.add_multi_evidence_bonus();
                references.push(reference);
            }
        }

        let timeline_events = ctx.staging.fetch_unprocessed_timeline_events(&ctx.repo_id, MAX_ITEMS).await.map_err(OrchestratorError::config)?;
        let mut timeline_cross_references = 0usize;
        for event in &timeline_events {
            if !event.is_cross_reference() || event.source_number == Some(event.issue_number) {
                continue;
            }
            let pr_number = match event.source_type {
                Some(SourceType::Pr) => event.source_number,
                _ => None,
            };
            references.push(Reference::new(
                ctx.repo_id.clone(),
                event.issue_number,
                None,
                pr_number,
                "timeline_extraction",
                ReferenceAction::Mentions,
                TIMELINE_CROSS_REFERENCE_CONFIDENCE,
                ExtractionSource::IssueTimeline,
            ));
            timeline_cross_references += 1;
        }

        references.retain(|r| !r.should_discard());

        let items_processed = commits.len() + issues.len() + prs.len() + timeline_cross_references;
        let output = ReferenceExtractorOutput { references };
        let cache_data = bincode::serialize(&output).map_err(OrchestratorError::Bincode)?;

        Ok(StageOutput {
            cache_data,
            metrics: StageMetrics { items_processed, entities_created: output.references.len(), duration_ms: 0, errors: vec![] },
        })
    }

    fn output_cache_key(&self, ctx: &StageContext) -> String {
        ctx.cache_keys.key_for_stage(StageId::ReferenceExtractor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_explicit_fixes_keyword() {
        let mentions = scan_text("Fixes #123 in the login flow");
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].issue_number, 123);
        assert_eq!(mentions[0].action, ReferenceAction::Fixes);
    }

    #[test]
    fn bare_mention_without_keyword() {
        let mentions = scan_text("see #456 for context");
        assert_eq!(mentions[0].action, ReferenceAction::Mentions);
    }

    #[test]
    fn multiple_references_in_one_message() {
        let mentions = scan_text("Closes #1, relates to #2 and #3");
        assert_eq!(mentions.len(), 3);
        assert_eq!(mentions[0].action, ReferenceAction::Closes);
        assert_eq!(mentions[1].action, ReferenceAction::Mentions);
    }

    #[test]
    fn bare_mention_confidence_stays_above_discard_threshold() {
        let r = Reference::new(
            coderisk_core::RepoId::from("r"),
            1,
            None,
            None,
            "issue_body_pattern",
            ReferenceAction::Mentions,
            base_confidence(ReferenceAction::Mentions),
            ExtractionSource::IssueBody,
        );
        assert!(!r.should_discard());
    }

    #[test]
    fn explicit_tag_applied_only_to_keyword_matches() {
        let mut keyword = Reference::new(
            coderisk_core::RepoId::from("r"),
            1,
            None,
            None,
            "commit_message_pattern",
            ReferenceAction::Fixes,
            base_confidence(ReferenceAction::Fixes),
            ExtractionSource::CommitMessage,
        );
        apply_explicit_tag(&mut keyword, ReferenceAction::Fixes);
        assert_eq!(keyword.evidence_tags, vec!["explicit".to_string()]);

        let mut bare = Reference::new(
            coderisk_core::RepoId::from("r"),
            1,
            None,
            None,
            "commit_message_pattern",
            ReferenceAction::Mentions,
            base_confidence(ReferenceAction::Mentions),
            ExtractionSource::CommitMessage,
        );
        apply_explicit_tag(&mut bare, ReferenceAction::Mentions);
        assert!(bare.evidence_tags.is_empty());
    }

    async fn stage_context(staging: coderisk_storage::staging::sql::SqlStagingStore, graph: coderisk_storage::graph::sql::SqlGraphStore) -> StageContext {
        let checkpoint_pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let checkpoint_mgr = std::sync::Arc::new(crate::checkpoint::CheckpointManager::new(checkpoint_pool));
        checkpoint_mgr.migrate().await.unwrap();

        StageContext {
            job_id: uuid::Uuid::new_v4(),
            repo_id: coderisk_core::RepoId::from("r"),
            cache_keys: crate::dag::CacheKeyManager::new("r".to_string(), "run1".to_string()),
            checkpoint_mgr,
            staging: std::sync::Arc::new(staging),
            graph: std::sync::Arc::new(graph),
        }
    }

    async fn new_stores() -> (coderisk_storage::staging::sql::SqlStagingStore, coderisk_storage::graph::sql::SqlGraphStore) {
        let staging_pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let staging = coderisk_storage::staging::sql::SqlStagingStore::new(staging_pool);
        staging.migrate().await.unwrap();

        let graph_pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let graph = coderisk_storage::graph::sql::SqlGraphStore::new(graph_pool);
        graph.migrate().await.unwrap();

        (staging, graph)
    }

    #[tokio::test]
    async fn timeline_cross_reference_pass_emits_a_mentions_reference() {
        let (staging, graph) = new_stores().await;
        let repo = coderisk_core::RepoId::from("r");

        let mut event = coderisk_model::TimelineEvent::new(repo.clone(), 10, coderisk_model::TimelineEvent::CROSS_REFERENCED, "bot", chrono::Utc::now());
        event.source_type = Some(SourceType::Pr);
        event.source_number = Some(42);
        staging.store_timeline_event(&event).await.unwrap();

        let mut ctx = stage_context(staging, graph).await;
        let stage = ReferenceExtractorStage;
        let output = stage.execute(StageInput::default(), &mut ctx).await.unwrap();
        let parsed: ReferenceExtractorOutput = bincode::deserialize(&output.cache_data).unwrap();

        assert_eq!(parsed.references.len(), 1);
        assert_eq!(parsed.references[0].issue_number, 10);
        assert_eq!(parsed.references[0].pr_number, Some(42));
        assert_eq!(parsed.references[0].detection_method, "timeline_extraction");
        assert_eq!(parsed.references[0].action, ReferenceAction::Mentions);
    }

    #[tokio::test]
    async fn comment_enriched_pass_applies_the_commenters_role_boost() {
        let (staging, graph) = new_stores().await;
        let repo = coderisk_core::RepoId::from("r");

        let issue = coderisk_model::Issue {
            repo_id: repo.clone(),
            number: 5,
            state: coderisk_model::ItemState::Open,
            author: "alice".into(),
            body: "investigating a regression".into(),
            labels: vec![],
            created_at: chrono::Utc::now(),
            closed_at: None,
        };
        staging.store_issue(&issue).await.unwrap();

        let comment = coderisk_model::IssueComment::new(repo.clone(), 5, "maintainer", coderisk_model::CommenterRole::Owner, "this looks related to #99", chrono::Utc::now());
        staging.store_issue_comment(&comment).await.unwrap();

        let mut ctx = stage_context(staging, graph).await;
        let stage = ReferenceExtractorStage;
        let output = stage.execute(StageInput::default(), &mut ctx).await.unwrap();
        let parsed: ReferenceExtractorOutput = bincode::deserialize(&output.cache_data).unwrap();

        let r = parsed.references.iter().find(|r| r.issue_number == 99).expect("comment reference present");
        assert!(r.evidence_tags.contains(&"owner_comment".to_string()));
    }
}
