use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Extension, Json, Router,
};

use crate::config::limits;
use crate::db::{reviews as db_reviews, users};
use crate::error::{AppError, Result};
use crate::models::{
    AuthInfo, CreateReviewRequest, JobStatus, MessageResponse, PageQuery, Pagination, Review,
    Role, UserReviewsResponse,
};
use crate::utils::{optional_text, validate_rating};

use super::auth::is_unique_violation;
use super::jobs::{is_assigned, is_owner, load_job};
use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/jobs/:id/reviews",
            get(list_job_reviews).post(create_review),
        )
        .route("/api/v1/users/:id/reviews", get(list_user_reviews))
        .route("/api/v1/reviews/:id", delete(delete_review))
        .with_state(state)
}

/// Recensisce l'altra parte di un job completato
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/reviews",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Recensione creata", body = Review),
        (status = 403, description = "Non sei una delle parti del job"),
        (status = 409, description = "Job non completato o recensione gia' presente"),
        (status = 422, description = "Voto non valido"),
    ),
    security(("bearer" = [])),
    tag = "Recensioni"
)]
pub async fn create_review(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(request): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Review>)> {
    let user = auth.user()?;
    validate_rating(request.rating)?;
    let comment = optional_text(
        "comment",
        request.comment.as_deref(),
        limits::MAX_COMMENT_LEN,
    )?;

    let job = load_job(&state, &id).await?;

    let reviewee_id = if is_owner(&job, user) {
        job.assigned_worker_id.clone()
    } else if is_assigned(&job, user) {
        Some(job.customer_id.clone())
    } else {
        return Err(AppError::Forbidden(
            "Solo le parti del job possono lasciare una recensione".to_string(),
        ));
    };

    if job.status != JobStatus::Done {
        return Err(AppError::Conflict(
            "Si possono recensire solo i job completati".to_string(),
        ));
    }
    let reviewee_id = reviewee_id
        .ok_or_else(|| AppError::Conflict("Il job non ha un lavoratore assegnato".to_string()))?;

    if db_reviews::exists_for(&state.db, &job.id, &user.id).await? {
        return Err(AppError::Conflict(
            "Hai gia' recensito questo job".to_string(),
        ));
    }

    let review = db_reviews::create_review(
        &state.db,
        &job.id,
        &user.id,
        &reviewee_id,
        request.rating,
        comment.as_deref(),
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Hai gia' recensito questo job".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    tracing::info!("Recensione {} sul job {}", review.id, job.id);
    Ok((StatusCode::CREATED, Json(review)))
}

/// Recensioni di un job
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/reviews",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    responses(
        (status = 200, description = "Recensioni del job", body = Vec<Review>),
        (status = 404, description = "Job non trovato"),
    ),
    tag = "Recensioni"
)]
pub async fn list_job_reviews(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Review>>> {
    let job = load_job(&state, &id).await?;
    Ok(Json(db_reviews::list_for_job(&state.db, &job.id).await?))
}

/// Recensioni ricevute da un utente con media e totale
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/reviews",
    params(
        ("id" = String, Path, description = "ID utente"),
        PageQuery
    ),
    responses(
        (status = 200, description = "Recensioni ricevute", body = UserReviewsResponse),
        (status = 404, description = "Utente non trovato"),
    ),
    tag = "Recensioni"
)]
pub async fn list_user_reviews(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<UserReviewsResponse>> {
    if users::find_by_id(&state.db, &id).await?.is_none() {
        return Err(AppError::NotFound(format!("Utente {}", id)));
    }

    let page = Pagination::from(query);
    let (items, total) = db_reviews::list_for_user(&state.db, &id, page).await?;
    let summary = db_reviews::summary(&state.db, &id).await?;

    Ok(Json(UserReviewsResponse {
        summary,
        items,
        total,
        page: page.page,
        limit: page.limit,
    }))
}

/// Elimina una recensione (autore o admin)
#[utoipa::path(
    delete,
    path = "/api/v1/reviews/{id}",
    params(
        ("id" = String, Path, description = "ID recensione")
    ),
    responses(
        (status = 200, description = "Recensione eliminata", body = MessageResponse),
        (status = 403, description = "Non autorizzato"),
        (status = 404, description = "Recensione non trovata"),
    ),
    security(("bearer" = [])),
    tag = "Recensioni"
)]
pub async fn delete_review(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    let user = auth.user()?;
    let review = db_reviews::get_review(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Recensione {}", id)))?;

    if review.reviewer_id != user.id && user.role != Role::Admin {
        return Err(AppError::Forbidden(
            "Puoi eliminare solo le tue recensioni".to_string(),
        ));
    }

    if !db_reviews::delete_review(&state.db, &review.id).await? {
        return Err(AppError::NotFound(format!("Recensione {}", id)));
    }

    Ok(Json(MessageResponse::new("Recensione eliminata")))
}
