/// Health and metrics endpoints
///
/// `/health` answers as long as the process is up; `/health/ready` also
/// checks the database. `/metrics` renders the Prometheus registry.
use crate::{context::AppContext, error::AppResult, metrics};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::time::Instant;

/// Health status of an individual component
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health_basic))
        .route("/health/ready", get(readiness_probe))
        .route("/metrics", get(metrics_endpoint))
}

pub async fn health_basic() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe: database and asset directory
pub async fn readiness_probe(State(ctx): State<AppContext>) -> (StatusCode, Json<serde_json::Value>) {
    let checks = vec![check_database(&ctx).await, check_asset_directory(&ctx)];
    let healthy = checks.iter().all(|c| c.status != "unhealthy");

    let status = if healthy { "ready" } else { "unavailable" };
    if !healthy {
        tracing::warn!("Readiness probe failed");
    }

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "checks": checks,
        })),
    )
}

async fn ping_database(ctx: &AppContext) -> AppResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}

async fn check_database(ctx: &AppContext) -> ComponentHealth {
    let start = Instant::now();
    let result = ping_database(ctx).await;

    ComponentHealth {
        name: "database".to_string(),
        status: if result.is_ok() { "healthy" } else { "unhealthy" }.to_string(),
        response_time_ms: Some(start.elapsed().as_millis() as u64),
        error: result.err().map(|e| e.to_string()),
    }
}

fn check_asset_directory(ctx: &AppContext) -> ComponentHealth {
    let exists = ctx.storage.root().is_dir();
    ComponentHealth {
        name: "asset_storage".to_string(),
        status: if exists { "healthy" } else { "degraded" }.to_string(),
        response_time_ms: None,
        error: (!exists).then(|| "Asset directory does not exist yet".to_string()),
    }
}

/// Prometheus text exposition
pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}
