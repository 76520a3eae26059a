//! Job routes module
//!
//! Customers post jobs, workers request them, and the two parties drive the
//! job through its lifecycle. Every status change goes through
//! `JobStatus::apply` first and is then written with a compare-and-set on the
//! status the handler observed.

mod crud;
mod lifecycle;

use axum::{
    routing::{get, post},
    Router,
};

use crate::db::jobs as db_jobs;
use crate::error::{AppError, Result};
use crate::models::{CurrentUser, Job};

// Re-export public items (including utoipa path types)
pub use crud::*;
pub use lifecycle::*;

use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/jobs", get(list_jobs).post(create_job))
        .route("/api/v1/jobs/mine", get(my_jobs))
        .route(
            "/api/v1/jobs/:id",
            get(get_job).put(update_job).delete(delete_job),
        )
        .route(
            "/api/v1/jobs/:id/requests",
            post(request_job).delete(withdraw_request),
        )
        .route("/api/v1/jobs/:id/assign", post(assign_job))
        .route("/api/v1/jobs/:id/start", post(start_job))
        .route("/api/v1/jobs/:id/release", post(release_job))
        .route("/api/v1/jobs/:id/complete", post(complete_job))
        .route("/api/v1/jobs/:id/fail", post(fail_job))
        .with_state(state)
}

/// Carica un job o restituisce 404
pub(crate) async fn load_job(state: &AppState, id: &str) -> Result<Job> {
    db_jobs::get_job(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {}", id)))
}

pub(crate) fn is_owner(job: &Job, user: &CurrentUser) -> bool {
    job.customer_id == user.id
}

pub(crate) fn is_assigned(job: &Job, user: &CurrentUser) -> bool {
    job.assigned_worker_id.as_deref() == Some(user.id.as_str())
}

pub(crate) fn require_owner(job: &Job, user: &CurrentUser) -> Result<()> {
    if !is_owner(job, user) {
        return Err(AppError::Forbidden(
            "Operazione riservata al cliente che ha pubblicato il job".to_string(),
        ));
    }
    Ok(())
}

/// Lo stato del job e' cambiato tra la lettura e la scrittura
pub(crate) fn stale_job() -> AppError {
    AppError::Conflict("Il job e' stato modificato da un'altra richiesta, riprova".to_string())
}
