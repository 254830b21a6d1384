use crate::error::{OrchestratorError, Result};
use crate::job::StageId;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

/// One stage's serialized output for one job, keyed by cache key so a
/// resumed run can skip stages whose checkpoint already exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub job_id: Uuid,
    pub stage: StageId,
    pub cache_key: String,
    pub cache_data: Vec<u8>,
}

impl Checkpoint {
    pub fn new(job_id: Uuid, stage: StageId, cache_key: String, cache_data: Vec<u8>) -> Self {
        Self { id: Uuid::new_v4(), job_id, stage, cache_key, cache_data }
    }
}

/// SQLite-backed checkpoint store. A job resumed after a crash replays
/// `completed_stages` to find what to skip, rather than re-running the
/// whole DAG from scratch.
pub struct CheckpointManager {
    pool: SqlitePool,
}

impl CheckpointManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ingestion_checkpoints (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                cache_key TEXT NOT NULL,
                cache_data BLOB NOT NULL,
                UNIQUE(job_id, stage)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;
        Ok(())
    }

    pub async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        sqlx::query(
            "INSERT INTO ingestion_checkpoints (id, job_id, stage, cache_key, cache_data) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(job_id, stage) DO UPDATE SET cache_key = excluded.cache_key, cache_data = excluded.cache_data",
        )
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.job_id.to_string())
        .bind(checkpoint.stage.as_str())
        .bind(&checkpoint.cache_key)
        .bind(&checkpoint.cache_data)
        .execute(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;
        Ok(())
    }

    pub async fn load_checkpoint(&self, cache_key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT cache_data FROM ingestion_checkpoints WHERE cache_key = ?")
            .bind(cache_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(OrchestratorError::Database)?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("cache_data")))
    }

    pub async fn completed_stages(&self, job_id: Uuid) -> Result<HashSet<StageId>> {
        let rows = sqlx::query("SELECT stage FROM ingestion_checkpoints WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(OrchestratorError::Database)?;

        rows.into_iter()
            .map(|row| StageId::from_str(row.get::<String, _>("stage").as_str()))
            .collect()
    }

    pub async fn delete_job_checkpoints(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM ingestion_checkpoints WHERE job_id = ?")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(OrchestratorError::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn manager() -> CheckpointManager {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let mgr = CheckpointManager::new(pool);
        mgr.migrate().await.unwrap();
        mgr
    }

    #[tokio::test]
    async fn save_and_load_checkpoint() {
        let mgr = manager().await;
        let job_id = Uuid::new_v4();

        let cp = Checkpoint::new(job_id, StageId::FileIdentityResolver, "fir:repo1:run1".to_string(), vec![1, 2, 3, 4]);
        mgr.save_checkpoint(cp).await.unwrap();

        let loaded = mgr.load_checkpoint("fir:repo1:run1").await.unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn save_checkpoint_replaces_existing_for_same_job_and_stage() {
        let mgr = manager().await;
        let job_id = Uuid::new_v4();

        let cp1 = Checkpoint::new(job_id, StageId::FileIdentityResolver, "fir:repo1:run1".to_string(), vec![1, 2, 3]);
        mgr.save_checkpoint(cp1).await.unwrap();

        let cp2 = Checkpoint::new(job_id, StageId::FileIdentityResolver, "fir:repo1:run1".to_string(), vec![4, 5, 6]);
        mgr.save_checkpoint(cp2).await.unwrap();

        let loaded = mgr.load_checkpoint("fir:repo1:run1").await.unwrap();
        assert_eq!(loaded, Some(vec![4, 5, 6]));
    }

    #[tokio::test]
    async fn completed_stages_reflects_saved_checkpoints() {
        let mgr = manager().await;
        let job_id = Uuid::new_v4();

        mgr.save_checkpoint(Checkpoint::new(job_id, StageId::FileIdentityResolver, "fir:repo1:run1".to_string(), vec![1]))
            .await
            .unwrap();
        mgr.save_checkpoint(Checkpoint::new(job_id, StageId::Topologizer, "topo:repo1:run1".to_string(), vec![2]))
            .await
            .unwrap();

        let completed = mgr.completed_stages(job_id).await.unwrap();
        assert_eq!(completed.len(), 2);
        assert!(completed.contains(&StageId::FileIdentityResolver));
        assert!(completed.contains(&StageId::Topologizer));
    }

    #[tokio::test]
    async fn delete_job_checkpoints_clears_resume_state() {
        let mgr = manager().await;
        let job_id = Uuid::new_v4();

        mgr.save_checkpoint(Checkpoint::new(job_id, StageId::FileIdentityResolver, "fir:repo1:run1".to_string(), vec![1]))
            .await
            .unwrap();
        mgr.delete_job_checkpoints(job_id).await.unwrap();

        let completed = mgr.completed_stages(job_id).await.unwrap();
        assert_eq!(completed.len(), 0);
    }

    #[tokio::test]
    async fn load_nonexistent_checkpoint_is_none() {
        let mgr = manager().await;
        let loaded = mgr.load_checkpoint("nonexistent").await.unwrap();
        assert_eq!(loaded, None);
    }
}
