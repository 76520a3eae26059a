use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};

use crate::db::{reviews as db_reviews, users};
use crate::error::{AppError, Result};
use crate::models::{Page, Pagination, PublicProfile, WorkersQuery};

use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/users/:id", get(get_public_profile))
        .route("/api/v1/workers", get(list_workers))
        .with_state(state)
}

/// Profilo pubblico di un utente con il riepilogo delle recensioni
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(
        ("id" = String, Path, description = "ID utente")
    ),
    responses(
        (status = 200, description = "Profilo pubblico", body = PublicProfile),
        (status = 404, description = "Utente non trovato"),
    ),
    tag = "Utenti"
)]
pub async fn get_public_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PublicProfile>> {
    let user = users::find_by_id(&state.db, &id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::NotFound(format!("Utente {}", id)))?;

    let summary = db_reviews::summary(&state.db, &user.id).await?;
    Ok(Json(PublicProfile::new(
        user,
        summary.average_rating,
        summary.review_count,
    )))
}

/// Elenco dei lavoratori attivi, i verificati per primi
#[utoipa::path(
    get,
    path = "/api/v1/workers",
    params(WorkersQuery),
    responses(
        (status = 200, description = "Lavoratori", body = Page<PublicProfile>),
    ),
    tag = "Utenti"
)]
pub async fn list_workers(
    State(state): State<AppState>,
    Query(query): Query<WorkersQuery>,
) -> Result<Json<Page<PublicProfile>>> {
    let page = Pagination::new(query.page, query.limit);
    let (workers, total) = users::list_workers(
        &state.db,
        query.skill.as_deref().filter(|s| !s.trim().is_empty()),
        query.location.as_deref().filter(|l| !l.trim().is_empty()),
        query.verified,
        page,
    )
    .await?;

    let mut items = Vec::with_capacity(workers.len());
    for worker in workers {
        let summary = db_reviews::summary(&state.db, &worker.id).await?;
        items.push(PublicProfile::new(
            worker,
            summary.average_rating,
            summary.review_count,
        ));
    }

    Ok(Json(Page::new(items, total, page)))
}
