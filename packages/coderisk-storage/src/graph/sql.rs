//! sqlx-backed `GraphStore`. The structural adjacency index lives in
//! memory ([`super::adjacency::AdjacencyIndex`]); everything derived from
//! commit history (co-change, LOC, ownership) is persisted so it survives
//! a restart between ingestion runs.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

use coderisk_core::RepoId;
use coderisk_model::CouplingEdge;

use crate::error::{Result, StorageError};

use super::{looks_like_test_file, smoothed_test_ratio, adjacency::AdjacencyIndex, CoChangeEntry, GraphStore, OwnershipChurn};

pub struct SqlGraphStore {
    pool: SqlitePool,
    adjacency: AdjacencyIndex,
}

impl SqlGraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            adjacency: AdjacencyIndex::new(),
        }
    }

    /// Creates the graph-derived tables. Structural edges are not
    /// persisted here — they are rebuilt into the in-memory adjacency
    /// index on ingest, per file, and never queried across a restart
    /// boundary within a single run.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS code_block_coupling (
                repo_id TEXT NOT NULL,
                block_a_id TEXT NOT NULL,
                block_b_id TEXT NOT NULL,
                co_change_count INTEGER NOT NULL,
                co_change_percentage REAL NOT NULL,
                first_co_change TEXT NOT NULL,
                last_co_change TEXT NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                computed_at TEXT NOT NULL,
                PRIMARY KEY (repo_id, block_a_id, block_b_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_commits (
                repo_id TEXT NOT NULL,
                path TEXT NOT NULL,
                author TEXT NOT NULL,
                commit_sha TEXT NOT NULL,
                committed_at TEXT NOT NULL,
                lines_added INTEGER NOT NULL,
                lines_deleted INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_file_commits_path ON file_commits(repo_id, path)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_loc (
                repo_id TEXT NOT NULL,
                path TEXT NOT NULL,
                source_loc INTEGER NOT NULL,
                test_loc INTEGER NOT NULL,
                PRIMARY KEY (repo_id, path)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS code_block_incidents (
                repo_id TEXT NOT NULL,
                block_id TEXT NOT NULL,
                issue_number INTEGER NOT NULL,
                detected_at TEXT NOT NULL,
                PRIMARY KEY (repo_id, block_id, issue_number)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_code_block_incidents_block ON code_block_incidents(repo_id, block_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl GraphStore for SqlGraphStore {
    async fn coupling_for_file(&self, _repo_id: &RepoId, historical_paths: &[String]) -> Result<usize> {
        Ok(self.adjacency.coupling_count(historical_paths))
    }

    async fn co_change_for_file(&self, repo_id: &RepoId, historical_paths: &[String]) -> Result<Vec<CoChangeEntry>> {
        let mut by_partner: HashMap<String, (u32, f64)> = HashMap::new();

        for path in historical_paths {
            let rows = sqlx::query(
                "SELECT block_a_id, block_b_id, co_change_count, co_change_percentage \
                 FROM code_block_coupling WHERE repo_id = ? AND (block_a_id LIKE ? OR block_b_id LIKE ?)",
            )
            .bind(repo_id.as_str())
            .bind(format!("{path}::%"))
            .bind(format!("{path}::%"))
            .fetch_all(&self.pool)
            .await?;

            for row in rows {
                let a: String = row.get("block_a_id");
                let b: String = row.get("block_b_id");
                let count: i64 = row.get("co_change_count");
                let pct: f64 = row.get("co_change_percentage");

                let partner = if a.starts_with(&format!("{path}::")) { b } else { a };
                let entry = by_partner.entry(partner).or_insert((0, 0.0));
                entry.0 += count as u32;
                entry.1 = entry.1.max(pct);
            }
        }

        let mut entries: Vec<CoChangeEntry> = by_partner
            .into_iter()
            .map(|(partner_path, (cochange_count, frequency))| CoChangeEntry {
                partner_path,
                cochange_count,
                frequency,
            })
            .collect();
        entries.sort_by(|a, b| b.cochange_count.cmp(&a.cochange_count));
        entries.truncate(20);
        Ok(entries)
    }

    async fn test_ratio(&self, repo_id: &RepoId, historical_paths: &[String]) -> Result<f64> {
        let mut source_loc = 0u64;
        let mut test_loc = 0u64;

        for path in historical_paths {
            let row = sqlx::query("SELECT source_loc, test_loc FROM file_loc WHERE repo_id = ? AND path = ?")
                .bind(repo_id.as_str())
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                let s: i64 = row.get("source_loc");
                let t: i64 = row.get("test_loc");
                if looks_like_test_file(path) {
                    test_loc += t as u64 + s.max(0) as u64;
                } else {
                    source_loc += s as u64;
                    test_loc += t as u64;
                }
            }
        }

        Ok(smoothed_test_ratio(test_loc, source_loc))
    }

    async fn ownership_churn(
        &self,
        repo_id: &RepoId,
        historical_paths: &[String],
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<OwnershipChurn> {
        let cutoff = now - Duration::days(window_days);
        let split = now - Duration::days(30);

        let mut commit_counts: HashMap<String, u32> = HashMap::new();
        let mut last_30_authors: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut prior_authors: HashMap<String, DateTime<Utc>> = HashMap::new();

        for path in historical_paths {
            let rows = sqlx::query(
                "SELECT author, committed_at FROM file_commits \
                 WHERE repo_id = ? AND path = ? AND committed_at >= ? ORDER BY committed_at ASC",
            )
            .bind(repo_id.as_str())
            .bind(path)
            .bind(cutoff.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;

            for row in rows {
                let author: String = row.get("author");
                let committed_at_raw: String = row.get("committed_at");
                let committed_at = DateTime::parse_from_rfc3339(&committed_at_raw)
                    .map_err(|e| StorageError::database(format!("bad timestamp: {e}")))?
                    .with_timezone(&Utc);

                *commit_counts.entry(author.clone()).or_insert(0) += 1;

                if committed_at >= split {
                    last_30_authors
                        .entry(author.clone())
                        .and_modify(|latest| *latest = (*latest).max(committed_at))
                        .or_insert(committed_at);
                } else {
                    prior_authors
                        .entry(author)
                        .and_modify(|latest| *latest = (*latest).max(committed_at))
                        .or_insert(committed_at);
                }
            }
        }

        let current_owner = last_30_authors
            .iter()
            .max_by_key(|(_, at)| **at)
            .map(|(author, _)| author.clone());
        let previous_owner = prior_authors
            .iter()
            .max_by_key(|(_, at)| **at)
            .map(|(author, _)| author.clone())
            .filter(|author| Some(author) != current_owner.as_ref());

        let days_since_transition = match (&current_owner, &previous_owner) {
            (Some(cur), Some(_)) => last_30_authors.get(cur).map(|at| (now - *at).num_days()),
            _ => None,
        };

        let mut distinct_authors: Vec<String> = commit_counts.keys().cloned().collect();
        distinct_authors.sort();

        Ok(OwnershipChurn {
            distinct_authors,
            commit_counts,
            current_owner,
            previous_owner,
            days_since_transition,
        })
    }

    async fn persist_coupling_edge(&self, edge: &CouplingEdge) -> Result<()> {
        sqlx::query(
            "INSERT INTO code_block_coupling \
             (repo_id, block_a_id, block_b_id, co_change_count, co_change_percentage, first_co_change, last_co_change, window_start, window_end, computed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(repo_id, block_a_id, block_b_id) DO UPDATE SET \
             co_change_count = excluded.co_change_count, \
             co_change_percentage = excluded.co_change_percentage, \
             last_co_change = excluded.last_co_change, \
             window_start = excluded.window_start, \
             window_end = excluded.window_end, \
             computed_at = excluded.computed_at",
        )
        .bind(edge.repo_id.as_str())
        .bind(&edge.block_a_id)
        .bind(&edge.block_b_id)
        .bind(edge.co_change_count as i64)
        .bind(edge.co_change_percentage)
        .bind(edge.first_co_change.to_rfc3339())
        .bind(edge.last_co_change.to_rfc3339())
        .bind(edge.window_start.to_rfc3339())
        .bind(edge.window_end.to_rfc3339())
        .bind(edge.computed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_structural_edge(&self, _repo_id: &RepoId, from_path: &str, to_path: &str) -> Result<()> {
        self.adjacency.add_edge(from_path, to_path);
        Ok(())
    }

    async fn record_file_commit(
        &self,
        repo_id: &RepoId,
        path: &str,
        author: &str,
        commit_sha: &str,
        at: DateTime<Utc>,
        lines_added: u32,
        lines_deleted: u32,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO file_commits (repo_id, path, author, commit_sha, committed_at, lines_added, lines_deleted) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(repo_id.as_str())
        .bind(path)
        .bind(author)
        .bind(commit_sha)
        .bind(at.to_rfc3339())
        .bind(lines_added as i64)
        .bind(lines_deleted as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_loc(&self, repo_id: &RepoId, path: &str, source_loc: u64, test_loc: u64) -> Result<()> {
        sqlx::query(
            "INSERT INTO file_loc (repo_id, path, source_loc, test_loc) VALUES (?, ?, ?, ?) \
             ON CONFLICT(repo_id, path) DO UPDATE SET source_loc = excluded.source_loc, test_loc = excluded.test_loc",
        )
        .bind(repo_id.as_str())
        .bind(path)
        .bind(source_loc as i64)
        .bind(test_loc as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_block_incident(&self, repo_id: &RepoId, block_id: &str, issue_number: i64, detected_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO code_block_incidents (repo_id, block_id, issue_number, detected_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(repo_id, block_id, issue_number) DO UPDATE SET detected_at = excluded.detected_at",
        )
        .bind(repo_id.as_str())
        .bind(block_id)
        .bind(issue_number)
        .bind(detected_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn incident_count_for_block(&self, repo_id: &RepoId, block_id: &str) -> Result<u32> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM code_block_incidents WHERE repo_id = ? AND block_id = ?")
            .bind(repo_id.as_str())
            .bind(block_id)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        Ok(count as u32)
    }
}
