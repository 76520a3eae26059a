use axum::{extract::State, routing::get, Json, Router};

use crate::db::stats as db_stats;
use crate::error::Result;
use crate::models::PublicSummary;

use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/stats/summary", get(get_summary))
        .with_state(state)
}

/// Statistiche pubbliche della piattaforma
#[utoipa::path(
    get,
    path = "/api/v1/stats/summary",
    responses(
        (status = 200, description = "Contatori pubblici", body = PublicSummary),
    ),
    tag = "Sistema"
)]
pub async fn get_summary(State(state): State<AppState>) -> Result<Json<PublicSummary>> {
    let summary = db_stats::public_summary(&state.db).await?;
    Ok(Json(summary))
}
