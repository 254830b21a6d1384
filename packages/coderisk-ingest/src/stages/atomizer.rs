//! Atomizer (§4.5): walks a repo's commits in topological order and turns
//! each commit's file diffs into `BlockChange` events.
//!
//! §4.5 is a two-stage LLM pipeline: a cheap heuristic pre-filter skips
//! files with nothing worth atomizing, then a primary extractor maps the
//! survivors' hunks onto function/class/method-level blocks via
//! `coderisk-llm`. A file the LLM can't usefully parse (no patch text, a
//! malformed response, a provider error) falls back to the same
//! file-granularity `BlockChange` this stage used before the LLM was wired
//! in - construct with `with_llm` to get block-level extraction, or `new`
//! to run file-granularity only (e.g. in a build without an LLM budget).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use coderisk_core::Sha;
use coderisk_llm::{LlmClient, Message, ModelTier};
use coderisk_model::block_change::ChangeType;
use coderisk_model::BlockChange;
use coderisk_storage::{FileChangeKind, FileDiffRecord};

use crate::error::{OrchestratorError, Result};
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use crate::stages::file_identity_resolver::FileIdentityResolverOutput;
use crate::stages::topologizer::TopologizerOutput;

/// §8 boundary behavior: a commit touching more than this many files is a
/// mass reformat, auto-skipped rather than sent through atomization.
const MASS_REFORMAT_THRESHOLD: usize = 1000;
/// §4.5 pre-filter: files above this size are skipped rather than atomized.
const MAX_FILE_SIZE_BYTES: u64 = 50_000;

const DOC_AND_CONFIG_EXTENSIONS: &[&str] = &[
    "md", "txt", "rst", "json", "yaml", "yml", "toml", "lock", "svg", "png", "jpg", "jpeg", "gif", "ico", "pdf", "csv", "sum", "mod", "sh", "sql",
];

const DOC_AND_CONFIG_BASENAMES: &[&str] = &["Dockerfile", "Makefile", ".gitignore"];

const GENERATED_PATH_MARKERS: &[&str] = &["/vendor/", "/node_modules/", "/dist/", "/build/", "/generated/", ".generated."];

/// Generalized generated-file patterns (§4.5): `_generated.*`, `*.pb.*`,
/// `*.min.*`, matched as substrings rather than fixed suffixes so any
/// extension after the marker still counts (`.pb.go`, `.pb.ts`, `.min.css`).
const GENERATED_SUBSTRING_MARKERS: &[&str] = &["_generated.", ".pb.", ".min."];

fn looks_generated_or_vendored(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    GENERATED_PATH_MARKERS.iter().any(|marker| lower.contains(marker)) || GENERATED_SUBSTRING_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn has_doc_or_config_extension(path: &str) -> bool {
    let basename = path.rsplit('/').next().unwrap_or(path);
    if DOC_AND_CONFIG_BASENAMES.iter().any(|name| name.eq_ignore_ascii_case(basename)) {
        return true;
    }
    path.rsplit('.').next().map(|ext| DOC_AND_CONFIG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())).unwrap_or(false)
}

/// §4.5 Stage 1 pre-filter, heuristic fallback rules.
fn should_skip_prefilter(diff: &FileDiffRecord) -> bool {
    diff.change_kind == FileChangeKind::Deleted
        || diff.size_bytes > MAX_FILE_SIZE_BYTES
        || has_doc_or_config_extension(&diff.path)
        || looks_generated_or_vendored(&diff.path)
}

fn change_type_for(kind: FileChangeKind) -> ChangeType {
    match kind {
        FileChangeKind::Added => ChangeType::Created,
        FileChangeKind::Modified => ChangeType::Modified,
        FileChangeKind::Deleted => ChangeType::Deleted,
        FileChangeKind::Renamed => ChangeType::Renamed,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomizerOutput {
    pub block_changes: Vec<BlockChange>,
}

/// One function/class/method-level block event, as the Stage 2 LLM
/// extractor returns it (§4.5).
#[derive(Debug, Deserialize)]
struct RawBlockEvent {
    block_name: String,
    signature: String,
    change_type: String,
    #[serde(default)]
    old_name: Option<String>,
    #[serde(default)]
    lines_added: u32,
    #[serde(default)]
    lines_deleted: u32,
    #[serde(default)]
    complexity_delta: Option<f64>,
    #[serde(default)]
    change_summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBlockEvents {
    #[serde(default)]
    blocks: Vec<RawBlockEvent>,
}

fn block_extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "blocks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "block_name": {"type": "string"},
                        "signature": {"type": "string"},
                        "change_type": {"type": "string", "enum": ["created", "modified", "deleted", "renamed"]},
                        "old_name": {"type": "string"},
                        "lines_added": {"type": "integer"},
                        "lines_deleted": {"type": "integer"},
                        "complexity_delta": {"type": "number"},
                        "change_summary": {"type": "string"}
                    },
                    "required": ["block_name", "signature", "change_type"]
                }
            }
        },
        "required": ["blocks"]
    })
}

fn parse_change_type(raw: &str) -> ChangeType {
    match raw.to_ascii_lowercase().as_str() {
        "created" => ChangeType::Created,
        "deleted" => ChangeType::Deleted,
        "renamed" => ChangeType::Renamed,
        _ => ChangeType::Modified,
    }
}

pub struct AtomizerStage {
    llm: Option<Arc<dyn LlmClient>>,
}

impl AtomizerStage {
    /// File-granularity only: no LLM wired in, every file atomizes at
    /// whole-file identity.
    pub fn new() -> Self {
        Self { llm: None }
    }

    /// Block-level extraction via `coderisk-llm`'s Stage 2 extractor,
    /// falling back to file granularity per file when the LLM can't
    /// usefully parse it.
    pub fn with_llm(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm: Some(llm) }
    }

    /// File-granularity fallback extraction: one `BlockChange` per surviving
    /// diff, keyed on the file's own canonical path as its block identity
    /// (block_name = file basename, signature = "file").
    fn heuristic_block_change(repo_id: &coderisk_core::RepoId, commit_sha: &Sha, canonical_path: &str, diff: &FileDiffRecord) -> BlockChange {
        let block_name = canonical_path.rsplit('/').next().unwrap_or(canonical_path).to_string();
        let block_key = (canonical_path.to_string(), block_name, "file".to_string());

        let mut change = if diff.change_kind == FileChangeKind::Renamed {
            let old_path = diff.previous_path.clone().unwrap_or_default();
            let old_name = old_path.rsplit('/').next().unwrap_or(&old_path).to_string();
            BlockChange::renamed(repo_id.clone(), commit_sha.clone(), block_key, canonical_path, diff.path.clone(), old_name)
        } else {
            BlockChange::new(repo_id.clone(), commit_sha.clone(), block_key, canonical_path, diff.path.clone(), change_type_for(diff.change_kind))
        };

        change.lines_added = diff.lines_added;
        change.lines_deleted = diff.lines_deleted;
        change
    }

    fn block_change_from_event(
        repo_id: &coderisk_core::RepoId,
        commit_sha: &Sha,
        canonical_path: &str,
        diff: &FileDiffRecord,
        event: RawBlockEvent,
    ) -> BlockChange {
        let block_key = (canonical_path.to_string(), event.block_name, event.signature);
        let change_type = parse_change_type(&event.change_type);

        let mut change = match (change_type, event.old_name) {
            (ChangeType::Renamed, Some(old_name)) => {
                BlockChange::renamed(repo_id.clone(), commit_sha.clone(), block_key, canonical_path, diff.path.clone(), old_name)
            }
            _ => BlockChange::new(repo_id.clone(), commit_sha.clone(), block_key, canonical_path, diff.path.clone(), change_type),
        };

        change.lines_added = event.lines_added;
        change.lines_deleted = event.lines_deleted;
        change.complexity_delta = event.complexity_delta;
        change.change_summary = event.change_summary;
        change
    }

    /// §4.5 Stage 2: maps one file's diff onto its touched blocks via a
    /// JSON-mode LLM call. Falls back to [`Self::heuristic_block_change`]
    /// (a single file-granularity event) when there's no LLM wired in, no
    /// patch text to extract from, or the LLM call itself fails.
    async fn extract_block_changes(&self, repo_id: &coderisk_core::RepoId, commit_sha: &Sha, canonical_path: &str, diff: &FileDiffRecord) -> Vec<BlockChange> {
        let fallback = || vec![Self::heuristic_block_change(repo_id, commit_sha, canonical_path, diff)];

        let Some(llm) = &self.llm else { return fallback() };
        let Some(patch) = &diff.patch else { return fallback() };

        match Self::llm_extract(llm.as_ref(), canonical_path, patch).await {
            Ok(events) if !events.is_empty() => {
                events.into_iter().map(|event| Self::block_change_from_event(repo_id, commit_sha, canonical_path, diff, event)).collect()
            }
            Ok(_) => fallback(),
            Err(err) => {
                tracing::warn!(path = canonical_path, error = %err, "llm block extraction failed, falling back to file-level heuristic");
                fallback()
            }
        }
    }

    async fn llm_extract(llm: &dyn LlmClient, canonical_path: &str, patch: &str) -> Result<Vec<RawBlockEvent>> {
        let messages = vec![
            Message::system(
                "You extract function/class/method-level block changes from a unified diff. \
                 Identify each distinct code block (function, method, class) the diff touches.",
            ),
            Message::user(format!(
                "File: {canonical_path}\n\nDiff:\n{patch}\n\nReturn every touched block as a `blocks` array entry."
            )),
        ];
        let response = llm.complete_json(ModelTier::Fast, messages, block_extraction_schema()).await.map_err(OrchestratorError::config)?;
        let parsed: RawBlockEvents = serde_json::from_str(&response.content).map_err(OrchestratorError::serialization)?;
        Ok(parsed.blocks)
    }
}

impl Default for AtomizerStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageHandler for AtomizerStage {
    fn stage_id(&self) -> StageId {
        StageId::Atomizer
    }

    async fn execute(&self, input: StageInput, ctx: &mut StageContext) -> Result<StageOutput> {
        let fir_key = ctx.cache_keys.key_for_stage(StageId::FileIdentityResolver);
        let topo_key = ctx.cache_keys.key_for_stage(StageId::Topologizer);

        let fir_bytes = input.cache.get(&fir_key).ok_or_else(|| OrchestratorError::MissingDependency(fir_key.clone()))?;
        let topo_bytes = input.cache.get(&topo_key).ok_or_else(|| OrchestratorError::MissingDependency(topo_key.clone()))?;

        let fir: FileIdentityResolverOutput = bincode::deserialize(fir_bytes).map_err(OrchestratorError::Bincode)?;
        let topo: TopologizerOutput = bincode::deserialize(topo_bytes).map_err(OrchestratorError::Bincode)?;

        let commits = ctx.staging.fetch_unprocessed_commits(&ctx.repo_id, 500_000).await.map_err(OrchestratorError::config)?;
        let commit_by_sha: HashMap<String, (String, chrono::DateTime<chrono::Utc>)> =
            commits.into_iter().map(|c| (c.sha.as_str().to_string(), (c.author_name, c.author_date))).collect();

        let mut loc_by_path: HashMap<String, (u64, u64)> = HashMap::new();
        let mut block_changes = Vec::new();
        let mut files_processed = 0usize;
        let mut commits_skipped = 0usize;

        for sha in &topo.ordered_shas {
            let diffs = ctx.staging.fetch_file_diffs(&ctx.repo_id, sha).await.map_err(OrchestratorError::config)?;

            if diffs.len() > MASS_REFORMAT_THRESHOLD {
                commits_skipped += 1;
                continue;
            }

            let commit_sha = Sha::from(sha.as_str());
            let (author_name, author_date) =
                commit_by_sha.get(sha).cloned().unwrap_or_else(|| ("unknown".to_string(), chrono::Utc::now()));

            for diff in &diffs {
                if should_skip_prefilter(diff) {
                    continue;
                }
                files_processed += 1;

                let canonical_path = fir.historical_to_canonical.get(&diff.path).cloned().unwrap_or_else(|| diff.path.clone());

                let is_test = coderisk_storage::graph::looks_like_test_file(&canonical_path);
                let entry = loc_by_path.entry(canonical_path.clone()).or_insert((0, 0));
                let delta = diff.lines_added as i64 - diff.lines_deleted as i64;
                if is_test {
                    entry.1 = (entry.1 as i64 + delta).max(0) as u64;
                } else {
                    entry.0 = (entry.0 as i64 + delta).max(0) as u64;
                }

                ctx.graph
                    .record_file_commit(&ctx.repo_id, &canonical_path, &author_name, sha, author_date, diff.lines_added, diff.lines_deleted)
                    .await
                    .map_err(OrchestratorError::config)?;
                ctx.graph.record_loc(&ctx.repo_id, &canonical_path, entry.0, entry.1).await.map_err(OrchestratorError::config)?;

                if diff.change_kind == FileChangeKind::Renamed {
                    if let Some(prev) = &diff.previous_path {
                        ctx.graph.record_structural_edge(&ctx.repo_id, prev, &canonical_path).await.map_err(OrchestratorError::config)?;
                    }
                }

                block_changes.extend(self.extract_block_changes(&ctx.repo_id, &commit_sha, &canonical_path, diff).await);
            }
        }

        let output = AtomizerOutput { block_changes };
        let cache_data = bincode::serialize(&output).map_err(OrchestratorError::Bincode)?;

        Ok(StageOutput {
            cache_data,
            metrics: StageMetrics {
                items_processed: files_processed,
                entities_created: output.block_changes.len(),
                duration_ms: 0,
                errors: if commits_skipped > 0 { vec![format!("{commits_skipped} commits auto-skipped (mass reformat)")] } else { vec![] },
            },
        })
    }

    fn required_cache_keys(&self, ctx: &StageContext) -> Vec<String> {
        vec![ctx.cache_keys.key_for_stage(StageId::FileIdentityResolver), ctx.cache_keys.key_for_stage(StageId::Topologizer)]
    }

    fn output_cache_key(&self, ctx: &StageContext) -> String {
        ctx.cache_keys.key_for_stage(StageId::Atomizer)
    }
}
