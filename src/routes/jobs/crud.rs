//! CRUD operations for jobs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;

use crate::config::limits;
use crate::db::jobs as db_jobs;
use crate::error::{AppError, Result};
use crate::models::{
    AuthInfo, CreateJobRequest, Job, JobDetail, JobsQuery, MessageResponse, Page, PageQuery,
    Pagination, Role, UpdateJobRequest,
};
use crate::utils::{optional_text, required_text};

use super::{is_owner, load_job, require_owner, stale_job, AppState};

fn validate_budget(budget_cents: i64) -> Result<()> {
    if budget_cents <= 0 {
        return Err(AppError::Validation(
            "Il compenso deve essere maggiore di zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_schedule(scheduled_for: Option<&chrono::DateTime<Utc>>) -> Result<()> {
    if scheduled_for.is_some_and(|when| *when < Utc::now()) {
        return Err(AppError::Validation(
            "La data del lavoro non puo' essere nel passato".to_string(),
        ));
    }
    Ok(())
}

/// Lista dei job con filtri, ordinamento e paginazione
#[utoipa::path(
    get,
    path = "/api/v1/jobs",
    tag = "Jobs",
    params(JobsQuery),
    responses(
        (status = 200, description = "Lista job", body = Page<Job>),
    )
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<Page<Job>>> {
    let page = Pagination::new(query.page, query.limit);
    let (items, total) = db_jobs::list_jobs(&state.db, &query, page).await?;
    Ok(Json(Page::new(items, total, page)))
}

/// Job dell'utente: pubblicati (cliente) oppure richiesti o assegnati (lavoratore)
#[utoipa::path(
    get,
    path = "/api/v1/jobs/mine",
    tag = "Jobs",
    params(PageQuery),
    responses(
        (status = 200, description = "Job dell'utente", body = Page<Job>),
        (status = 401, description = "Non autenticato"),
    ),
    security(("bearer" = []))
)]
pub async fn my_jobs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Job>>> {
    let user = auth.user()?;
    let page = Pagination::from(query);

    let (items, total) = match user.role {
        Role::Worker => db_jobs::list_worker_jobs(&state.db, &user.id, page).await?,
        Role::Customer | Role::Admin => {
            db_jobs::list_customer_jobs(&state.db, &user.id, page).await?
        }
    };

    Ok(Json(Page::new(items, total, page)))
}

/// Dettaglio di un job; il proprietario e gli admin vedono anche le candidature
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    tag = "Jobs",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    responses(
        (status = 200, description = "Dettaglio job", body = JobDetail),
        (status = 404, description = "Job non trovato"),
    )
)]
pub async fn get_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<Json<JobDetail>> {
    let job = load_job(&state, &id).await?;

    let can_see_requests = auth
        .user
        .as_ref()
        .is_some_and(|u| u.role == Role::Admin || is_owner(&job, u));

    let requests = if can_see_requests {
        Some(db_jobs::list_requests(&state.db, &job.id).await?)
    } else {
        None
    };

    Ok(Json(JobDetail { job, requests }))
}

/// Pubblica un nuovo job
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    tag = "Jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 201, description = "Job creato", body = Job),
        (status = 403, description = "Solo i clienti possono pubblicare job"),
        (status = 422, description = "Dati non validi"),
    ),
    security(("bearer" = []))
)]
pub async fn create_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Job>)> {
    let user = auth.require_role(Role::Customer)?;

    let request = CreateJobRequest {
        title: required_text("title", &request.title, limits::MAX_TITLE_LEN)?,
        description: required_text(
            "description",
            &request.description,
            limits::MAX_DESCRIPTION_LEN,
        )?,
        category: required_text("category", &request.category, limits::MAX_CATEGORY_LEN)?,
        budget_cents: request.budget_cents,
        location: optional_text(
            "location",
            request.location.as_deref(),
            limits::MAX_NAME_LEN,
        )?,
        scheduled_for: request.scheduled_for,
    };
    validate_budget(request.budget_cents)?;
    validate_schedule(request.scheduled_for.as_ref())?;

    let job = db_jobs::create_job(&state.db, &user.id, &request).await?;
    tracing::info!("Job {} pubblicato da {}", job.id, user.id);

    Ok((StatusCode::CREATED, Json(job)))
}

/// Modifica un job ancora aperto alle candidature
#[utoipa::path(
    put,
    path = "/api/v1/jobs/{id}",
    tag = "Jobs",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    request_body = UpdateJobRequest,
    responses(
        (status = 200, description = "Job aggiornato", body = Job),
        (status = 403, description = "Non sei il proprietario"),
        (status = 409, description = "Il job non e' piu' modificabile"),
    ),
    security(("bearer" = []))
)]
pub async fn update_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(request): Json<UpdateJobRequest>,
) -> Result<Json<Job>> {
    let user = auth.user()?;
    let job = load_job(&state, &id).await?;
    require_owner(&job, user)?;

    if !job.status.is_accepting_requests() {
        return Err(AppError::Conflict(format!(
            "Un job {} non puo' essere modificato",
            job.status
        )));
    }

    let update = UpdateJobRequest {
        title: request
            .title
            .as_deref()
            .map(|t| required_text("title", t, limits::MAX_TITLE_LEN))
            .transpose()?,
        description: request
            .description
            .as_deref()
            .map(|d| required_text("description", d, limits::MAX_DESCRIPTION_LEN))
            .transpose()?,
        category: request
            .category
            .as_deref()
            .map(|c| required_text("category", c, limits::MAX_CATEGORY_LEN))
            .transpose()?,
        budget_cents: request.budget_cents,
        location: request
            .location
            .as_deref()
            .map(|l| required_text("location", l, limits::MAX_NAME_LEN))
            .transpose()?,
        scheduled_for: request.scheduled_for,
    };
    if let Some(budget) = update.budget_cents {
        validate_budget(budget)?;
    }
    validate_schedule(update.scheduled_for.as_ref())?;

    if !db_jobs::update_job(&state.db, &job.id, &update).await? {
        return Err(stale_job());
    }

    Ok(Json(load_job(&state, &job.id).await?))
}

/// Elimina un job: il proprietario finche' e' aperto, un admin sempre
#[utoipa::path(
    delete,
    path = "/api/v1/jobs/{id}",
    tag = "Jobs",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    responses(
        (status = 200, description = "Job eliminato", body = MessageResponse),
        (status = 403, description = "Non autorizzato"),
        (status = 404, description = "Job non trovato"),
        (status = 409, description = "Job gia' assegnato"),
    ),
    security(("bearer" = []))
)]
pub async fn delete_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    let user = auth.user()?;
    let job = load_job(&state, &id).await?;

    if user.role == Role::Admin {
        db_jobs::delete_job(&state.db, &job.id).await?;
        tracing::info!("Job {} eliminato dall'admin {}", job.id, user.id);
        return Ok(Json(MessageResponse::new("Job eliminato")));
    }

    require_owner(&job, user)?;
    if !job.status.is_accepting_requests() {
        return Err(AppError::Conflict(format!(
            "Un job {} non puo' essere eliminato",
            job.status
        )));
    }

    if !db_jobs::delete_job_if_status(&state.db, &job.id, job.status).await? {
        return Err(stale_job());
    }

    tracing::info!("Job {} eliminato dal proprietario", job.id);
    Ok(Json(MessageResponse::new("Job eliminato")))
}
