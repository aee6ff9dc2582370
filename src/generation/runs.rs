/// Generation run persistence
use crate::{
    error::{AppError, AppResult},
    generation::{GeneratedAsset, GenerationRun, RunError, RunStatus, RunTrigger, Scenario},
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

pub struct RunStore {
    db: SqlitePool,
}

impl RunStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert a pending run for `scenario`
    pub async fn create(&self, scenario: &Scenario, trigger: RunTrigger) -> AppResult<GenerationRun> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO generation_run (id, owner_id, scenario_id, kind, trigger_kind, status, requested_count,
                prompt, ai_model, started_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?9, ?9)",
        )
        .bind(&id)
        .bind(&scenario.owner_id)
        .bind(&scenario.id)
        .bind(scenario.kind.as_str())
        .bind(trigger.as_str())
        .bind(scenario.media_count)
        .bind(&scenario.prompt)
        .bind(&scenario.ai_model)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.get(&id).await
    }

    pub async fn find(&self, run_id: &str) -> AppResult<Option<GenerationRun>> {
        let row = sqlx::query("SELECT * FROM generation_run WHERE id = ?1")
            .bind(run_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(GenerationRun::from_row).transpose()
    }

    pub async fn get(&self, run_id: &str) -> AppResult<GenerationRun> {
        self.find(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Generation run not found".to_string()))
    }

    /// The automation webhook accepted the run
    pub async fn mark_generating(&self, run_id: &str, execution_id: Option<&str>) -> AppResult<()> {
        sqlx::query(
            "UPDATE generation_run SET status = 'generating', execution_id = ?1
             WHERE id = ?2 AND status = 'pending'",
        )
        .bind(execution_id)
        .bind(run_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Progress report for an open run; false when it was already terminal
    pub async fn mark_progress(&self, run_id: &str, expanded_prompt: Option<&str>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE generation_run SET status = 'generating', expanded_prompt = COALESCE(?1, expanded_prompt)
             WHERE id = ?2 AND status IN ('pending', 'generating')",
        )
        .bind(expanded_prompt)
        .bind(run_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a non-terminal run to `failed`; false when it was already terminal
    pub async fn mark_failed(&self, run_id: &str, error: &RunError) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE generation_run SET status = 'failed', error_code = ?1, error_message = ?2, completed_at = ?3
             WHERE id = ?4 AND status IN ('pending', 'generating')",
        )
        .bind(&error.code)
        .bind(&error.message)
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a non-terminal run to `completed`; false when it was already terminal
    pub async fn complete(
        &self,
        run_id: &str,
        assets: &[GeneratedAsset],
        expanded_prompt: Option<&str>,
    ) -> AppResult<bool> {
        let encoded = serde_json::to_string(assets)
            .map_err(|e| AppError::Internal(format!("Failed to encode assets: {}", e)))?;

        let result = sqlx::query(
            "UPDATE generation_run SET status = ?1, assets = ?2, generated_count = ?3,
                expanded_prompt = COALESCE(?4, expanded_prompt), completed_at = ?5
             WHERE id = ?6 AND status IN ('pending', 'generating')",
        )
        .bind(RunStatus::Completed.as_str())
        .bind(encoded)
        .bind(assets.len() as i64)
        .bind(expanded_prompt)
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Newest runs of an owner, optionally for one scenario
    pub async fn list(
        &self,
        owner_id: &str,
        scenario_id: Option<&str>,
        limit: i64,
    ) -> AppResult<Vec<GenerationRun>> {
        let rows = match scenario_id {
            Some(scenario_id) => {
                sqlx::query(
                    "SELECT * FROM generation_run WHERE owner_id = ?1 AND scenario_id = ?2
                     ORDER BY created_at DESC LIMIT ?3",
                )
                .bind(owner_id)
                .bind(scenario_id)
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM generation_run WHERE owner_id = ?1 ORDER BY created_at DESC LIMIT ?2")
                    .bind(owner_id)
                    .bind(limit)
                    .fetch_all(&self.db)
                    .await?
            }
        };

        rows.iter().map(GenerationRun::from_row).collect()
    }

    /// Completed runs older than `cutoff` that still hold assets
    pub async fn due_for_cleanup(&self, cutoff: DateTime<Utc>, limit: i64) -> AppResult<Vec<GenerationRun>> {
        let rows = sqlx::query(
            "SELECT * FROM generation_run
             WHERE completed_at IS NOT NULL AND completed_at <= ?1
               AND assets_deleted_at IS NULL AND assets != '[]'
             ORDER BY completed_at ASC LIMIT ?2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(GenerationRun::from_row).collect()
    }

    pub async fn mark_assets_deleted(&self, run_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE generation_run SET assets = '[]', assets_deleted_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(run_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Delete terminal runs created before `cutoff` whose assets are gone
    pub async fn prune(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM generation_run
             WHERE created_at <= ?1 AND status IN ('completed', 'failed')
               AND (assets_deleted_at IS NOT NULL OR assets = '[]')",
        )
        .bind(cutoff)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }
}
