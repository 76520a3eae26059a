//! Transizioni di stato dei job
//!
//! Ogni handler ricarica il job, verifica chi lo chiama, calcola lo stato
//! successivo con `JobStatus::apply` e scrive con un compare-and-set. Se la
//! scrittura non tocca righe un'altra richiesta e' arrivata prima: 409.

use axum::{
    extract::{Path, State},
    Extension, Json,
};

use crate::config::limits;
use crate::db::jobs::{self as db_jobs, ReleaseOutcome};
use crate::error::{AppError, Result};
use crate::models::{
    ApplyJobRequest, AssignJobRequest, AuthInfo, FailJobRequest, Job, JobAction, Role,
};
use crate::routes::auth::is_unique_violation;
use crate::utils::{optional_text, required_text};

use super::{is_assigned, is_owner, load_job, require_owner, stale_job, AppState};

fn remaining_after_removal(job: &Job) -> usize {
    usize::try_from(job.request_count.saturating_sub(1)).unwrap_or(0)
}

/// Candidatura di un lavoratore
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/requests",
    tag = "Jobs",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    request_body = ApplyJobRequest,
    responses(
        (status = 200, description = "Candidatura registrata", body = Job),
        (status = 403, description = "Solo i lavoratori (verificati, se richiesto) possono candidarsi"),
        (status = 409, description = "Candidatura gia' presente o job non disponibile"),
    ),
    security(("bearer" = []))
)]
pub async fn request_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(request): Json<ApplyJobRequest>,
) -> Result<Json<Job>> {
    let user = auth.require_role(Role::Worker)?;

    if state.config.require_verified_workers && !user.is_verified {
        return Err(AppError::Forbidden(
            "Solo i lavoratori verificati possono candidarsi".to_string(),
        ));
    }

    let message = optional_text(
        "message",
        request.message.as_deref(),
        limits::MAX_REQUEST_MESSAGE_LEN,
    )?;

    let job = load_job(&state, &id).await?;
    if is_owner(&job, user) {
        return Err(AppError::Forbidden(
            "Non puoi candidarti a un tuo job".to_string(),
        ));
    }
    if db_jobs::has_request(&state.db, &job.id, &user.id).await? {
        return Err(AppError::Conflict(
            "Ti sei gia' candidato a questo job".to_string(),
        ));
    }

    job.status.apply(JobAction::Request)?;

    let added = db_jobs::add_request(&state.db, &job.id, &user.id, message.as_deref(), job.status)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Ti sei gia' candidato a questo job".to_string())
            } else {
                AppError::Database(e)
            }
        })?;
    if !added {
        return Err(stale_job());
    }

    tracing::info!("Lavoratore {} candidato al job {}", user.id, job.id);
    Ok(Json(load_job(&state, &job.id).await?))
}

/// Il lavoratore ritira la propria candidatura
#[utoipa::path(
    delete,
    path = "/api/v1/jobs/{id}/requests",
    tag = "Jobs",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    responses(
        (status = 200, description = "Candidatura ritirata", body = Job),
        (status = 404, description = "Nessuna candidatura da ritirare"),
        (status = 409, description = "Transizione non consentita"),
    ),
    security(("bearer" = []))
)]
pub async fn withdraw_request(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<Json<Job>> {
    let user = auth.require_role(Role::Worker)?;
    let job = load_job(&state, &id).await?;

    if !db_jobs::has_request(&state.db, &job.id, &user.id).await? {
        return Err(AppError::NotFound(
            "Nessuna candidatura per questo job".to_string(),
        ));
    }

    job.status.apply(JobAction::Withdraw {
        remaining: remaining_after_removal(&job),
    })?;

    match db_jobs::withdraw_request(&state.db, &job.id, &user.id).await? {
        ReleaseOutcome::Updated(status) => {
            tracing::info!("Candidatura di {} ritirata, job {} ora {}", user.id, job.id, status);
        }
        ReleaseOutcome::NotFound | ReleaseOutcome::Conflict => return Err(stale_job()),
    }

    Ok(Json(load_job(&state, &job.id).await?))
}

/// Il cliente sceglie il lavoratore tra i candidati
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/assign",
    tag = "Jobs",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    request_body = AssignJobRequest,
    responses(
        (status = 200, description = "Job assegnato", body = Job),
        (status = 403, description = "Non sei il proprietario"),
        (status = 409, description = "Transizione non consentita"),
        (status = 422, description = "Il lavoratore non si e' candidato"),
    ),
    security(("bearer" = []))
)]
pub async fn assign_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(request): Json<AssignJobRequest>,
) -> Result<Json<Job>> {
    let user = auth.user()?;
    let job = load_job(&state, &id).await?;
    require_owner(&job, user)?;

    job.status.apply(JobAction::Assign)?;

    if !db_jobs::has_request(&state.db, &job.id, &request.worker_id).await? {
        return Err(AppError::Validation(
            "Il lavoratore indicato non si e' candidato a questo job".to_string(),
        ));
    }

    if !db_jobs::assign_worker(&state.db, &job.id, &request.worker_id).await? {
        return Err(stale_job());
    }

    tracing::info!("Job {} assegnato a {}", job.id, request.worker_id);
    Ok(Json(load_job(&state, &job.id).await?))
}

/// Il lavoratore assegnato inizia il lavoro
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/start",
    tag = "Jobs",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    responses(
        (status = 200, description = "Lavoro iniziato", body = Job),
        (status = 403, description = "Non sei il lavoratore assegnato"),
        (status = 409, description = "Transizione non consentita"),
    ),
    security(("bearer" = []))
)]
pub async fn start_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<Json<Job>> {
    let user = auth.user()?;
    let job = load_job(&state, &id).await?;

    if !is_assigned(&job, user) {
        return Err(AppError::Forbidden(
            "Solo il lavoratore assegnato puo' iniziare il lavoro".to_string(),
        ));
    }

    let next = job.status.apply(JobAction::Start)?;
    if !db_jobs::transition(&state.db, &job.id, job.status, next, None).await? {
        return Err(stale_job());
    }

    Ok(Json(load_job(&state, &job.id).await?))
}

/// Il lavoratore assegnato rinuncia prima di iniziare
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/release",
    tag = "Jobs",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    responses(
        (status = 200, description = "Assegnazione rilasciata", body = Job),
        (status = 403, description = "Non sei il lavoratore assegnato"),
        (status = 409, description = "Transizione non consentita"),
    ),
    security(("bearer" = []))
)]
pub async fn release_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<Json<Job>> {
    let user = auth.user()?;
    let job = load_job(&state, &id).await?;

    if !is_assigned(&job, user) {
        return Err(AppError::Forbidden(
            "Solo il lavoratore assegnato puo' rinunciare al job".to_string(),
        ));
    }

    job.status.apply(JobAction::Release {
        remaining: remaining_after_removal(&job),
    })?;

    match db_jobs::release_assignment(&state.db, &job.id, &user.id).await? {
        ReleaseOutcome::Updated(status) => {
            tracing::info!("Lavoratore {} ha rinunciato al job {} ({})", user.id, job.id, status);
        }
        ReleaseOutcome::NotFound | ReleaseOutcome::Conflict => return Err(stale_job()),
    }

    Ok(Json(load_job(&state, &job.id).await?))
}

/// Chiude il job come completato
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/complete",
    tag = "Jobs",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    responses(
        (status = 200, description = "Job completato", body = Job),
        (status = 403, description = "Non sei una delle parti del job"),
        (status = 409, description = "Transizione non consentita"),
    ),
    security(("bearer" = []))
)]
pub async fn complete_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<Json<Job>> {
    let user = auth.user()?;
    let job = load_job(&state, &id).await?;

    if !is_owner(&job, user) && !is_assigned(&job, user) {
        return Err(AppError::Forbidden(
            "Solo il cliente o il lavoratore assegnato possono chiudere il job".to_string(),
        ));
    }

    let next = job.status.apply(JobAction::Complete)?;
    if !db_jobs::transition(&state.db, &job.id, job.status, next, None).await? {
        return Err(stale_job());
    }

    tracing::info!("Job {} completato", job.id);
    Ok(Json(load_job(&state, &job.id).await?))
}

/// Chiude il job come fallito, con il motivo
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/fail",
    tag = "Jobs",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    request_body = FailJobRequest,
    responses(
        (status = 200, description = "Job chiuso come fallito", body = Job),
        (status = 403, description = "Non sei una delle parti del job"),
        (status = 409, description = "Transizione non consentita"),
    ),
    security(("bearer" = []))
)]
pub async fn fail_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(request): Json<FailJobRequest>,
) -> Result<Json<Job>> {
    let user = auth.user()?;
    let reason = required_text("reason", &request.reason, limits::MAX_REQUEST_MESSAGE_LEN)?;
    let job = load_job(&state, &id).await?;

    if !is_owner(&job, user) && !is_assigned(&job, user) {
        return Err(AppError::Forbidden(
            "Solo il cliente o il lavoratore assegnato possono chiudere il job".to_string(),
        ));
    }

    let next = job.status.apply(JobAction::Fail)?;
    if !db_jobs::transition(&state.db, &job.id, job.status, next, Some(&reason)).await? {
        return Err(stale_job());
    }

    tracing::warn!("Job {} fallito: {}", job.id, reason);
    Ok(Json(load_job(&state, &job.id).await?))
}
