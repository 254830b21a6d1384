//! `sqlx`-backed Staging Store. Tested here against SQLite (via
//! `sqlx::SqlitePool`); the same statements run unmodified against
//! PostgreSQL in production, which is the pooled-connection deployment
//! target §5 describes — SQLite is the embedded/test-fixture backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use coderisk_core::{RepoId, Sha};
use coderisk_model::{commit::Commit, Issue, IssueComment, PullRequest, TimelineEvent};

use super::{BranchRecord, ContributorRecord, DataClass, DataCounts, FileChangeKind, FileDiffRecord, LanguagesRecord, NaturalKey, StagingStore};
use crate::error::{Result, StorageError};

pub struct SqlStagingStore {
    pool: SqlitePool,
}

impl SqlStagingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the staging tables if absent. Table names are normative
    /// (§6): `github_repositories`, `github_commits`, `github_issues`,
    /// `github_pull_requests`, `github_issue_timeline`, `github_branches`,
    /// `github_contributors`, plus a `github_languages` table for the
    /// per-language byte counts the Fetcher also emits.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS github_repositories (
                repo_id TEXT PRIMARY KEY,
                ingestion_status TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS github_commits (
                repo_id TEXT NOT NULL,
                sha TEXT NOT NULL,
                raw_json TEXT NOT NULL,
                author_date TEXT NOT NULL,
                processed_at TEXT,
                PRIMARY KEY (repo_id, sha)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS github_issues (
                repo_id TEXT NOT NULL,
                number INTEGER NOT NULL,
                raw_json TEXT NOT NULL,
                closed_at TEXT,
                processed_at TEXT,
                PRIMARY KEY (repo_id, number)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS github_pull_requests (
                repo_id TEXT NOT NULL,
                number INTEGER NOT NULL,
                raw_json TEXT NOT NULL,
                processed_at TEXT,
                PRIMARY KEY (repo_id, number)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS github_issue_timeline (
                id TEXT PRIMARY KEY,
                repo_id TEXT NOT NULL,
                issue_number INTEGER NOT NULL,
                raw_json TEXT NOT NULL,
                processed_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS github_branches (
                repo_id TEXT NOT NULL,
                name TEXT NOT NULL,
                raw_json TEXT NOT NULL,
                PRIMARY KEY (repo_id, name)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS github_contributors (
                repo_id TEXT NOT NULL,
                login TEXT NOT NULL,
                raw_json TEXT NOT NULL,
                PRIMARY KEY (repo_id, login)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS github_languages (
                repo_id TEXT NOT NULL,
                language TEXT NOT NULL,
                bytes INTEGER NOT NULL,
                PRIMARY KEY (repo_id, language)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS github_issue_comments (
                id TEXT PRIMARY KEY,
                repo_id TEXT NOT NULL,
                issue_number INTEGER NOT NULL,
                raw_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_github_issue_comments_issue ON github_issue_comments(repo_id, issue_number)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS github_commit_files (
                repo_id TEXT NOT NULL,
                commit_sha TEXT NOT NULL,
                path TEXT NOT NULL,
                previous_path TEXT,
                change_kind TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                lines_added INTEGER NOT NULL,
                lines_deleted INTEGER NOT NULL,
                patch TEXT,
                PRIMARY KEY (repo_id, commit_sha, path)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn change_kind_str(kind: FileChangeKind) -> &'static str {
    match kind {
        FileChangeKind::Added => "added",
        FileChangeKind::Modified => "modified",
        FileChangeKind::Deleted => "deleted",
        FileChangeKind::Renamed => "renamed",
    }
}

fn change_kind_from_str(s: &str) -> Result<FileChangeKind> {
    match s {
        "added" => Ok(FileChangeKind::Added),
        "modified" => Ok(FileChangeKind::Modified),
        "deleted" => Ok(FileChangeKind::Deleted),
        "renamed" => Ok(FileChangeKind::Renamed),
        other => Err(StorageError::serialization(format!("unknown file change kind: {other}"))),
    }
}

fn row_to_commit(raw_json: &str) -> Result<Commit> {
    serde_json::from_str(raw_json).map_err(StorageError::from)
}

#[async_trait]
impl StagingStore for SqlStagingStore {
    async fn store_repository_status(&self, repo_id: &RepoId, status: coderisk_model::IngestionStatus) -> Result<()> {
        let status_str = serde_json::to_string(&status)?;
        sqlx::query(
            "INSERT INTO github_repositories (repo_id, ingestion_status) VALUES (?, ?)
             ON CONFLICT(repo_id) DO UPDATE SET ingestion_status = excluded.ingestion_status",
        )
        .bind(repo_id.as_str())
        .bind(status_str)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_commit(&self, commit: &Commit) -> Result<()> {
        let raw = serde_json::to_string(commit)?;
        sqlx::query(
            "INSERT INTO github_commits (repo_id, sha, raw_json, author_date, processed_at)
             VALUES (?, ?, ?, ?, NULL)
             ON CONFLICT(repo_id, sha) DO UPDATE SET raw_json = excluded.raw_json",
        )
        .bind(commit.repo_id.as_str())
        .bind(commit.sha.as_str())
        .bind(raw)
        .bind(commit.author_date.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_commits(&self, commits: &[Commit]) -> Result<Vec<StorageError>> {
        let mut failures = Vec::new();
        for commit in commits {
            if let Err(e) = self.store_commit(commit).await {
                tracing::warn!(sha = %commit.sha, error = %e, "failed to stage commit, continuing batch");
                failures.push(e);
            }
        }
        Ok(failures)
    }

    async fn store_issue(&self, issue: &Issue) -> Result<()> {
        let raw = serde_json::to_string(issue)?;
        sqlx::query(
            "INSERT INTO github_issues (repo_id, number, raw_json, closed_at, processed_at)
             VALUES (?, ?, ?, ?, NULL)
             ON CONFLICT(repo_id, number) DO UPDATE SET raw_json = excluded.raw_json, closed_at = excluded.closed_at",
        )
        .bind(issue.repo_id.as_str())
        .bind(issue.number)
        .bind(raw)
        .bind(issue.closed_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_pull_request(&self, pr: &PullRequest) -> Result<()> {
        let raw = serde_json::to_string(pr)?;
        sqlx::query(
            "INSERT INTO github_pull_requests (repo_id, number, raw_json, processed_at)
             VALUES (?, ?, ?, NULL)
             ON CONFLICT(repo_id, number) DO UPDATE SET raw_json = excluded.raw_json",
        )
        .bind(pr.repo_id.as_str())
        .bind(pr.number)
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_branch(&self, branch: &BranchRecord) -> Result<()> {
        let raw = serde_json::to_string(branch)?;
        sqlx::query(
            "INSERT INTO github_branches (repo_id, name, raw_json) VALUES (?, ?, ?)
             ON CONFLICT(repo_id, name) DO UPDATE SET raw_json = excluded.raw_json",
        )
        .bind(branch.repo_id.as_str())
        .bind(&branch.name)
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_timeline_event(&self, event: &TimelineEvent) -> Result<()> {
        let raw = serde_json::to_string(event)?;
        sqlx::query(
            "INSERT INTO github_issue_timeline (id, repo_id, issue_number, raw_json, processed_at)
             VALUES (?, ?, ?, ?, NULL)
             ON CONFLICT(id) DO UPDATE SET raw_json = excluded.raw_json",
        )
        .bind(event.id.to_string())
        .bind(event.repo_id.as_str())
        .bind(event.issue_number)
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_issue_comment(&self, comment: &IssueComment) -> Result<()> {
        let raw = serde_json::to_string(comment)?;
        sqlx::query(
            "INSERT INTO github_issue_comments (id, repo_id, issue_number, raw_json, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET raw_json = excluded.raw_json",
        )
        .bind(comment.id.to_string())
        .bind(comment.repo_id.as_str())
        .bind(comment.issue_number)
        .bind(raw)
        .bind(comment.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_contributor(&self, contributor: &ContributorRecord) -> Result<()> {
        let raw = serde_json::to_string(contributor)?;
        sqlx::query(
            "INSERT INTO github_contributors (repo_id, login, raw_json) VALUES (?, ?, ?)
             ON CONFLICT(repo_id, login) DO UPDATE SET raw_json = excluded.raw_json",
        )
        .bind(contributor.repo_id.as_str())
        .bind(&contributor.login)
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_languages(&self, languages: &[LanguagesRecord]) -> Result<()> {
        for lang in languages {
            sqlx::query(
                "INSERT INTO github_languages (repo_id, language, bytes) VALUES (?, ?, ?)
                 ON CONFLICT(repo_id, language) DO UPDATE SET bytes = excluded.bytes",
            )
            .bind(lang.repo_id.as_str())
            .bind(&lang.language)
            .bind(lang.bytes as i64)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn fetch_unprocessed_commits(&self, repo_id: &RepoId, limit: usize) -> Result<Vec<Commit>> {
        let rows = sqlx::query(
            "SELECT raw_json FROM github_commits WHERE repo_id = ? AND processed_at IS NULL ORDER BY author_date ASC LIMIT ?",
        )
        .bind(repo_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row_to_commit(row.get::<String, _>("raw_json").as_str()))
            .collect()
    }

    async fn fetch_unprocessed_issues(&self, repo_id: &RepoId, limit: usize) -> Result<Vec<Issue>> {
        let rows = sqlx::query("SELECT raw_json FROM github_issues WHERE repo_id = ? AND processed_at IS NULL LIMIT ?")
            .bind(repo_id.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| serde_json::from_str::<Issue>(row.get::<String, _>("raw_json").as_str()).map_err(StorageError::from))
            .collect()
    }

    async fn fetch_unprocessed_pull_requests(&self, repo_id: &RepoId, limit: usize) -> Result<Vec<PullRequest>> {
        let rows = sqlx::query("SELECT raw_json FROM github_pull_requests WHERE repo_id = ? AND processed_at IS NULL LIMIT ?")
            .bind(repo_id.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| serde_json::from_str::<PullRequest>(row.get::<String, _>("raw_json").as_str()).map_err(StorageError::from))
            .collect()
    }

    async fn fetch_unprocessed_timeline_events(&self, repo_id: &RepoId, limit: usize) -> Result<Vec<TimelineEvent>> {
        let rows = sqlx::query("SELECT raw_json FROM github_issue_timeline WHERE repo_id = ? AND processed_at IS NULL LIMIT ?")
            .bind(repo_id.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| serde_json::from_str::<TimelineEvent>(row.get::<String, _>("raw_json").as_str()).map_err(StorageError::from))
            .collect()
    }

    async fn fetch_issue_comments(&self, repo_id: &RepoId, issue_number: i64) -> Result<Vec<IssueComment>> {
        let rows = sqlx::query(
            "SELECT raw_json FROM github_issue_comments WHERE repo_id = ? AND issue_number = ? ORDER BY created_at ASC",
        )
        .bind(repo_id.as_str())
        .bind(issue_number)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| serde_json::from_str::<IssueComment>(row.get::<String, _>("raw_json").as_str()).map_err(StorageError::from))
            .collect()
    }

    async fn mark_processed(&self, repo_id: &RepoId, class: DataClass, key: NaturalKey, processed_at: DateTime<Utc>) -> Result<()> {
        let ts = processed_at.to_rfc3339();
        match (class, key) {
            (DataClass::Commit, NaturalKey::Commit { sha }) => {
                sqlx::query("UPDATE github_commits SET processed_at = ? WHERE repo_id = ? AND sha = ?")
                    .bind(ts)
                    .bind(repo_id.as_str())
                    .bind(sha)
                    .execute(&self.pool)
                    .await?;
            }
            (DataClass::Issue, NaturalKey::Issue { number }) => {
                sqlx::query("UPDATE github_issues SET processed_at = ? WHERE repo_id = ? AND number = ?")
                    .bind(ts)
                    .bind(repo_id.as_str())
                    .bind(number)
                    .execute(&self.pool)
                    .await?;
            }
            (DataClass::PullRequest, NaturalKey::PullRequest { number }) => {
                sqlx::query("UPDATE github_pull_requests SET processed_at = ? WHERE repo_id = ? AND number = ?")
                    .bind(ts)
                    .bind(repo_id.as_str())
                    .bind(number)
                    .execute(&self.pool)
                    .await?;
            }
            (DataClass::TimelineEvent, NaturalKey::TimelineEvent { id }) => {
                sqlx::query("UPDATE github_issue_timeline SET processed_at = ? WHERE id = ?")
                    .bind(ts)
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await?;
            }
            (class, key) => {
                return Err(StorageError::new(
                    crate::error::ErrorKind::Config,
                    format!("natural key does not match data class {class:?}/{key:?}"),
                ))
            }
        }
        Ok(())
    }

    async fn get_data_counts(&self, repo_id: &RepoId) -> Result<DataCounts> {
        async fn count(pool: &SqlitePool, table: &str, repo_id: &str) -> Result<u64> {
            let row = sqlx::query(&format!("SELECT COUNT(*) as n FROM {table} WHERE repo_id = ?"))
                .bind(repo_id)
                .fetch_one(pool)
                .await?;
            Ok(row.get::<i64, _>("n") as u64)
        }

        Ok(DataCounts {
            commits: count(&self.pool, "github_commits", repo_id.as_str()).await?,
            issues: count(&self.pool, "github_issues", repo_id.as_str()).await?,
            pull_requests: count(&self.pool, "github_pull_requests", repo_id.as_str()).await?,
            branches: count(&self.pool, "github_branches", repo_id.as_str()).await?,
            timeline_events: count(&self.pool, "github_issue_timeline", repo_id.as_str()).await?,
            contributors: count(&self.pool, "github_contributors", repo_id.as_str()).await?,
            languages: count(&self.pool, "github_languages", repo_id.as_str()).await?,
        })
    }

    async fn store_file_diffs(&self, repo_id: &RepoId, commit_sha: &str, diffs: &[FileDiffRecord]) -> Result<()> {
        sqlx::query("DELETE FROM github_commit_files WHERE repo_id = ? AND commit_sha = ?")
            .bind(repo_id.as_str())
            .bind(commit_sha)
            .execute(&self.pool)
            .await?;

        for diff in diffs {
            sqlx::query(
                "INSERT INTO github_commit_files
                 (repo_id, commit_sha, path, previous_path, change_kind, size_bytes, lines_added, lines_deleted, patch)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(repo_id, commit_sha, path) DO UPDATE SET
                    previous_path = excluded.previous_path,
                    change_kind = excluded.change_kind,
                    size_bytes = excluded.size_bytes,
                    lines_added = excluded.lines_added,
                    lines_deleted = excluded.lines_deleted,
                    patch = excluded.patch",
            )
            .bind(repo_id.as_str())
            .bind(commit_sha)
            .bind(&diff.path)
            .bind(&diff.previous_path)
            .bind(change_kind_str(diff.change_kind))
            .bind(diff.size_bytes as i64)
            .bind(diff.lines_added as i64)
            .bind(diff.lines_deleted as i64)
            .bind(&diff.patch)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn fetch_file_diffs(&self, repo_id: &RepoId, commit_sha: &str) -> Result<Vec<FileDiffRecord>> {
        let rows = sqlx::query(
            "SELECT path, previous_path, change_kind, size_bytes, lines_added, lines_deleted, patch
             FROM github_commit_files WHERE repo_id = ? AND commit_sha = ? ORDER BY path ASC",
        )
        .bind(repo_id.as_str())
        .bind(commit_sha)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(FileDiffRecord {
                    repo_id: repo_id.clone(),
                    commit_sha: commit_sha.to_string(),
                    path: row.get::<String, _>("path"),
                    previous_path: row.get::<Option<String>, _>("previous_path"),
                    change_kind: change_kind_from_str(row.get::<String, _>("change_kind").as_str())?,
                    size_bytes: row.get::<i64, _>("size_bytes") as u64,
                    lines_added: row.get::<i64, _>("lines_added") as u32,
                    lines_deleted: row.get::<i64, _>("lines_deleted") as u32,
                    patch: row.get::<Option<String>, _>("patch"),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use coderisk_model::issue::ItemState;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqlStagingStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let store = SqlStagingStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    fn commit(repo: &RepoId, sha: &str) -> Commit {
        Commit::new(
            repo.clone(),
            Sha::from(sha),
            "alice",
            "alice@example.com",
            Utc::now(),
            "msg",
            vec![],
            "tree",
        )
    }

    #[tokio::test]
    async fn store_and_fetch_unprocessed_commit_roundtrips() {
        let store = memory_store().await;
        let repo = RepoId::from("acme/widgets");
        store.store_commit(&commit(&repo, "abc123")).await.unwrap();

        let unprocessed = store.fetch_unprocessed_commits(&repo, 10).await.unwrap();
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].sha.as_str(), "abc123");
    }

    #[tokio::test]
    async fn mark_processed_removes_commit_from_unprocessed_view() {
        let store = memory_store().await;
        let repo = RepoId::from("acme/widgets");
        store.store_commit(&commit(&repo, "abc123")).await.unwrap();

        store
            .mark_processed(&repo, DataClass::Commit, NaturalKey::Commit { sha: "abc123".into() }, Utc::now())
            .await
            .unwrap();

        let unprocessed = store.fetch_unprocessed_commits(&repo, 10).await.unwrap();
        assert!(unprocessed.is_empty());
    }

    #[tokio::test]
    async fn repeated_store_of_same_commit_is_idempotent() {
        let store = memory_store().await;
        let repo = RepoId::from("acme/widgets");
        store.store_commit(&commit(&repo, "abc123")).await.unwrap();
        store.store_commit(&commit(&repo, "abc123")).await.unwrap();

        let counts = store.get_data_counts(&repo).await.unwrap();
        assert_eq!(counts.commits, 1);
    }

    #[tokio::test]
    async fn data_counts_power_selective_refetch_policy() {
        let store = memory_store().await;
        let repo = RepoId::from("acme/widgets");
        let counts = store.get_data_counts(&repo).await.unwrap();
        assert_eq!(counts.commits, 0);

        store.store_commit(&commit(&repo, "abc123")).await.unwrap();
        let counts = store.get_data_counts(&repo).await.unwrap();
        assert_eq!(counts.commits, 1);
    }

    #[tokio::test]
    async fn store_issue_respects_retention_relevant_closed_at() {
        let store = memory_store().await;
        let repo = RepoId::from("acme/widgets");
        let issue = Issue {
            repo_id: repo.clone(),
            number: 42,
            state: ItemState::Closed,
            author: "bob".into(),
            body: "body".into(),
            labels: vec![],
            created_at: Utc::now() - Duration::days(100),
            closed_at: Some(Utc::now() - Duration::days(95)),
        };
        store.store_issue(&issue).await.unwrap();
        let unprocessed = store.fetch_unprocessed_issues(&repo, 10).await.unwrap();
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].number, 42);
    }

    #[tokio::test]
    async fn batch_store_commits_continues_past_partial_failures() {
        let store = memory_store().await;
        let repo = RepoId::from("acme/widgets");
        let commits = vec![commit(&repo, "a1"), commit(&repo, "a2")];
        let failures = store.store_commits(&commits).await.unwrap();
        assert!(failures.is_empty());
        let counts = store.get_data_counts(&repo).await.unwrap();
        assert_eq!(counts.commits, 2);
    }

    #[tokio::test]
    async fn store_and_fetch_file_diffs_roundtrips() {
        let store = memory_store().await;
        let repo = RepoId::from("acme/widgets");
        let diffs = vec![
            FileDiffRecord {
                repo_id: repo.clone(),
                commit_sha: "abc123".into(),
                path: "src/lib.rs".into(),
                previous_path: None,
                change_kind: FileChangeKind::Modified,
                size_bytes: 4096,
                lines_added: 12,
                lines_deleted: 3,
                patch: Some("@@ -1,3 +1,12 @@".into()),
            },
            FileDiffRecord {
                repo_id: repo.clone(),
                commit_sha: "abc123".into(),
                path: "src/new_name.rs".into(),
                previous_path: Some("src/old_name.rs".into()),
                change_kind: FileChangeKind::Renamed,
                size_bytes: 256,
                lines_added: 0,
                lines_deleted: 0,
                patch: None,
            },
        ];
        store.store_file_diffs(&repo, "abc123", &diffs).await.unwrap();

        let fetched = store.fetch_file_diffs(&repo, "abc123").await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].path, "src/lib.rs");
        assert_eq!(fetched[0].change_kind, FileChangeKind::Modified);
        assert_eq!(fetched[1].previous_path.as_deref(), Some("src/old_name.rs"));
        assert_eq!(fetched[1].change_kind, FileChangeKind::Renamed);
    }

    #[tokio::test]
    async fn restaging_a_commit_replaces_its_prior_diff_rows() {
        let store = memory_store().await;
        let repo = RepoId::from("acme/widgets");
        let first = vec![FileDiffRecord {
            repo_id: repo.clone(),
            commit_sha: "abc123".into(),
            path: "src/a.rs".into(),
            previous_path: None,
            change_kind: FileChangeKind::Added,
            size_bytes: 10,
            lines_added: 10,
            lines_deleted: 0,
            patch: None,
        }];
        store.store_file_diffs(&repo, "abc123", &first).await.unwrap();

        let second = vec![FileDiffRecord {
            repo_id: repo.clone(),
            commit_sha: "abc123".into(),
            path: "src/b.rs".into(),
            previous_path: None,
            change_kind: FileChangeKind::Added,
            size_bytes: 20,
            lines_added: 20,
            lines_deleted: 0,
            patch: None,
        }];
        store.store_file_diffs(&repo, "abc123", &second).await.unwrap();

        let fetched = store.fetch_file_diffs(&repo, "abc123").await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].path, "src/b.rs");
    }

    #[tokio::test]
    async fn fetch_file_diffs_is_empty_for_unstaged_commit() {
        let store = memory_store().await;
        let repo = RepoId::from("acme/widgets");
        let fetched = store.fetch_file_diffs(&repo, "nonexistent").await.unwrap();
        assert!(fetched.is_empty());
    }

    #[tokio::test]
    async fn store_and_fetch_unprocessed_timeline_events_roundtrips() {
        let store = memory_store().await;
        let repo = RepoId::from("acme/widgets");
        let event = TimelineEvent::new(repo.clone(), 7, TimelineEvent::CROSS_REFERENCED, "alice", Utc::now());
        store.store_timeline_event(&event).await.unwrap();

        let fetched = store.fetch_unprocessed_timeline_events(&repo, 10).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].issue_number, 7);
        assert!(fetched[0].is_cross_reference());
    }

    #[tokio::test]
    async fn store_and_fetch_issue_comments_orders_oldest_first() {
        let store = memory_store().await;
        let repo = RepoId::from("acme/widgets");
        let now = Utc::now();
        let first = IssueComment::new(repo.clone(), 9, "alice", coderisk_model::CommenterRole::Owner, "fixes #9", now - Duration::days(1));
        let second = IssueComment::new(repo.clone(), 9, "bob", coderisk_model::CommenterRole::Contributor, "+1", now);
        store.store_issue_comment(&second).await.unwrap();
        store.store_issue_comment(&first).await.unwrap();

        let fetched = store.fetch_issue_comments(&repo, 9).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].author, "alice");
        assert_eq!(fetched[1].author, "bob");
    }
}
