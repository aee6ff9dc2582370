/// API routes and handlers
pub mod generation;
pub mod health;
pub mod middleware;
pub mod tiktok;

use crate::context::AppContext;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

/// Success envelope shared by the JSON endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

pub fn respond<T: Serialize>(message: &str, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: message.to_string(),
        data,
    })
}

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(tiktok::routes())
        .merge(generation::routes())
}
