use axum::{extract::State, routing::get, Json, Router};

use crate::db;
use crate::models::HealthResponse;

use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_check))
        .with_state(state)
}

/// Health check dell'API
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "API funzionante", body = HealthResponse),
    ),
    tag = "Sistema"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = db::ping(&state.db).await;

    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
    })
}
