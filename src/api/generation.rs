/// Scenario, run and generation callback endpoints
use crate::{
    api::{respond, ApiResponse},
    auth::OwnerContext,
    context::AppContext,
    error::{AppError, AppResult},
    generation::{
        pipeline::{CallbackOutcome, FanOutSummary},
        scenarios::{NewScenario, ScenarioUpdate},
        GenerationRun, MediaKind, RunTrigger, Scenario,
    },
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/scenarios", post(create_scenario).get(list_scenarios))
        .route(
            "/api/scenarios/:scenario_id",
            get(get_scenario).put(update_scenario).delete(delete_scenario),
        )
        .route("/api/scenarios/:scenario_id/runs", post(enqueue_run))
        .route("/api/runs", get(list_runs))
        .route("/api/generation/callback", post(generation_callback))
        .route("/api/image-generation/callback", post(generation_callback))
}

#[derive(Debug, Default, Deserialize)]
struct EnqueueRequest {
    trigger: Option<RunTrigger>,
}

#[derive(Debug, Deserialize)]
struct ScenariosQuery {
    kind: Option<MediaKind>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunsQuery {
    scenario_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbackQuery {
    run_id: Option<String>,
}

/// Callback acknowledgement
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallbackAck {
    success: bool,
    run_id: String,
    applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fan_out: Option<FanOutSummary>,
}

async fn create_scenario(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    Json(input): Json<NewScenario>,
) -> AppResult<(StatusCode, Json<ApiResponse<Scenario>>)> {
    let scenario = ctx.scenarios.create(&owner.owner_id, input).await?;
    tracing::info!(owner_id = %owner.owner_id, scenario_id = %scenario.id, "Scenario created");
    Ok((StatusCode::CREATED, respond("Scenario created", scenario)))
}

async fn list_scenarios(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    Query(query): Query<ScenariosQuery>,
) -> AppResult<Json<ApiResponse<Vec<Scenario>>>> {
    let scenarios = ctx.scenarios.list(&owner.owner_id, query.kind).await?;
    Ok(respond("Scenarios", scenarios))
}

async fn get_scenario(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    Path(scenario_id): Path<String>,
) -> AppResult<Json<ApiResponse<Scenario>>> {
    let scenario = ctx.scenarios.get(&owner.owner_id, &scenario_id).await?;
    Ok(respond("Scenario", scenario))
}

async fn update_scenario(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    Path(scenario_id): Path<String>,
    Json(update): Json<ScenarioUpdate>,
) -> AppResult<Json<ApiResponse<Scenario>>> {
    let scenario = ctx.scenarios.update(&owner.owner_id, &scenario_id, update).await?;
    Ok(respond("Scenario updated", scenario))
}

async fn delete_scenario(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    Path(scenario_id): Path<String>,
) -> AppResult<Json<ApiResponse<Value>>> {
    ctx.scenarios.delete(&owner.owner_id, &scenario_id).await?;
    Ok(respond("Scenario deleted", json!({ "id": scenario_id })))
}

async fn enqueue_run(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    Path(scenario_id): Path<String>,
    body: Option<Json<EnqueueRequest>>,
) -> AppResult<(StatusCode, Json<ApiResponse<GenerationRun>>)> {
    let trigger = body.and_then(|Json(b)| b.trigger).unwrap_or_default();
    let run = ctx
        .pipeline
        .enqueue_run(&owner.owner_id, &scenario_id, trigger)
        .await?;
    Ok((StatusCode::ACCEPTED, respond("Generation run enqueued", run)))
}

async fn list_runs(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    Query(query): Query<RunsQuery>,
) -> AppResult<Json<ApiResponse<Vec<GenerationRun>>>> {
    let runs = ctx
        .pipeline
        .list_runs(&owner.owner_id, query.scenario_id.as_deref())
        .await?;
    Ok(respond("Generation runs", runs))
}

/// Public progress and completion webhook of the automation side
///
/// Video and image callbacks share the handler; the run decides how the
/// payload is read.
async fn generation_callback(
    State(ctx): State<AppContext>,
    Query(query): Query<CallbackQuery>,
    body: Bytes,
) -> AppResult<Json<CallbackAck>> {
    let payload: Value = if body.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Invalid callback payload: {}", e)))?
    };

    let ack = match ctx
        .pipeline
        .handle_callback(&payload, query.run_id.as_deref())
        .await?
    {
        CallbackOutcome::Ignored { run_id } | CallbackOutcome::AlreadyTerminal { run_id } => CallbackAck {
            success: true,
            run_id,
            applied: false,
            status: None,
            fan_out: None,
        },
        CallbackOutcome::Applied { run, fan_out } => CallbackAck {
            success: true,
            status: Some(run.status.as_str()),
            run_id: run.id,
            applied: true,
            fan_out,
        },
    };

    Ok(Json(ack))
}
