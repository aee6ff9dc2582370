/// Background task implementations
use crate::{
    context::AppContext,
    error::{AppError, AppResult},
    generation::GenerationRun,
};
use chrono::{Duration, Utc};
use serde_json::json;

/// Tell the remote asset host which files can go
async fn notify_remote_cleanup(ctx: &AppContext, url: &str, run: &GenerationRun) -> AppResult<()> {
    let response = ctx
        .http
        .post(url)
        .json(&json!({
            "runId": run.id,
            "scenarioId": run.scenario_id,
            "assets": run.assets,
        }))
        .send()
        .await
        .map_err(AppError::transport)?;

    if !response.status().is_success() {
        return Err(AppError::provider(
            response.status().as_u16().to_string(),
            "Remote cleanup webhook rejected the request",
        ));
    }
    Ok(())
}

/// Remove assets of runs completed before the retention window
///
/// Handles at most one batch per call. Returns the number of runs cleaned.
pub async fn cleanup_expired_assets(ctx: &AppContext) -> AppResult<u64> {
    let cleanup = &ctx.config.cleanup;
    let cutoff = Utc::now() - Duration::seconds(cleanup.asset_retention_secs);
    let runs = ctx.runs.due_for_cleanup(cutoff, cleanup.batch_size).await?;

    let mut cleaned = 0;
    for run in runs {
        if let Some(url) = cleanup.remote_webhook_url.as_deref() {
            if let Err(e) = notify_remote_cleanup(ctx, url, &run).await {
                tracing::warn!(run_id = %run.id, "Remote asset cleanup failed: {}", e);
            }
        }

        ctx.storage.remove_assets(&run.assets).await;

        match ctx.runs.mark_assets_deleted(&run.id).await {
            Ok(()) => {
                tracing::debug!(run_id = %run.id, assets = run.assets.len(), "Run assets removed");
                cleaned += 1;
            }
            Err(e) => tracing::warn!(run_id = %run.id, "Failed to mark run assets deleted: {}", e),
        }
    }

    Ok(cleaned)
}

/// Delete finished runs older than the run retention window
pub async fn prune_generation_runs(ctx: &AppContext) -> AppResult<u64> {
    let cutoff = Utc::now() - Duration::seconds(ctx.config.cleanup.run_retention_secs);
    ctx.runs.prune(cutoff).await
}

/// Health check - verify all systems are operational
pub async fn health_check(ctx: &AppContext) -> AppResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}
