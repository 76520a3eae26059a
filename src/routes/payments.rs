//! Pagamenti dei job e delle quote di verifica
//!
//! I pagamenti vengono registrati come `pending` e confermati dal pagante con
//! il riferimento della transazione presso il provider esterno.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};

use crate::config::limits;
use crate::db::payments::{self as db_payments, ConfirmOutcome, NewPayment};
use crate::error::{AppError, Result};
use crate::models::{
    AuthInfo, ConfirmPaymentRequest, JobStatus, Page, PageQuery, Pagination, PaymentKind,
    PaymentStatus, PaymentTransaction,
};
use crate::utils::required_text;

use super::auth::is_unique_violation;
use super::jobs::{load_job, require_owner};
use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/jobs/:id/payment", post(pay_job))
        .route("/api/v1/payments", get(list_my_payments))
        .route("/api/v1/payments/:id/confirm", post(confirm_payment))
        .route("/api/v1/payments/:id/cancel", post(cancel_payment))
        .with_state(state)
}

async fn load_payment(state: &AppState, id: &str) -> Result<PaymentTransaction> {
    db_payments::get_payment(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Pagamento {}", id)))
}

fn require_pending(payment: &PaymentTransaction) -> Result<()> {
    if payment.status != PaymentStatus::Pending {
        return Err(AppError::Conflict(format!(
            "Il pagamento e' gia' {}",
            payment.status.as_str()
        )));
    }
    Ok(())
}

/// Avvia il pagamento di un job completato al lavoratore assegnato
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/payment",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    responses(
        (status = 201, description = "Pagamento creato in attesa di conferma", body = PaymentTransaction),
        (status = 403, description = "Non sei il proprietario"),
        (status = 409, description = "Job non completato o gia' pagato"),
    ),
    security(("bearer" = [])),
    tag = "Pagamenti"
)]
pub async fn pay_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<PaymentTransaction>)> {
    let user = auth.user()?;
    let job = load_job(&state, &id).await?;
    require_owner(&job, user)?;

    if job.status != JobStatus::Done {
        return Err(AppError::Conflict(
            "Si possono pagare solo i job completati".to_string(),
        ));
    }
    let worker_id = job
        .assigned_worker_id
        .as_deref()
        .ok_or_else(|| AppError::Conflict("Il job non ha un lavoratore assegnato".to_string()))?;

    if db_payments::has_active_job_payment(&state.db, &job.id).await? {
        return Err(AppError::Conflict(
            "Esiste gia' un pagamento per questo job".to_string(),
        ));
    }

    let payment = db_payments::create_payment(
        &state.db,
        &NewPayment {
            kind: PaymentKind::JobPayment,
            payer_id: &user.id,
            payee_id: Some(worker_id),
            job_id: Some(&job.id),
            verification_id: None,
            amount_cents: job.budget_cents,
        },
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Esiste gia' un pagamento per questo job".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    tracing::info!(
        "Pagamento {} creato per il job {} ({} centesimi)",
        payment.id,
        job.id,
        payment.amount_cents
    );
    Ok((StatusCode::CREATED, Json(payment)))
}

/// Transazioni dell'utente come pagante o beneficiario
#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(PageQuery),
    responses(
        (status = 200, description = "Transazioni", body = Page<PaymentTransaction>),
    ),
    security(("bearer" = [])),
    tag = "Pagamenti"
)]
pub async fn list_my_payments(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<PaymentTransaction>>> {
    let user = auth.user()?;
    let page = Pagination::from(query);
    let (items, total) = db_payments::list_for_user(&state.db, &user.id, page).await?;
    Ok(Json(Page::new(items, total, page)))
}

/// Conferma un pagamento con il riferimento del provider
///
/// Per una quota di verifica la richiesta passa in revisione.
#[utoipa::path(
    post,
    path = "/api/v1/payments/{id}/confirm",
    params(
        ("id" = String, Path, description = "ID pagamento")
    ),
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Pagamento confermato", body = PaymentTransaction),
        (status = 403, description = "Non sei il pagante"),
        (status = 409, description = "Pagamento non piu' in attesa"),
    ),
    security(("bearer" = [])),
    tag = "Pagamenti"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<PaymentTransaction>> {
    let user = auth.user()?;
    let reference = required_text(
        "provider_reference",
        &request.provider_reference,
        limits::MAX_TITLE_LEN,
    )?;

    let payment = load_payment(&state, &id).await?;
    if payment.payer_id != user.id {
        return Err(AppError::Forbidden(
            "Solo il pagante puo' confermare il pagamento".to_string(),
        ));
    }
    require_pending(&payment)?;

    let verification_id = match payment.kind {
        PaymentKind::VerificationFee => payment.verification_id.as_deref(),
        PaymentKind::JobPayment => None,
    };

    match db_payments::confirm_payment(&state.db, &payment.id, &reference, verification_id)
        .await?
    {
        ConfirmOutcome::NotPending => {
            return Err(AppError::Conflict(
                "Il pagamento e' stato modificato da un'altra richiesta".to_string(),
            ));
        }
        ConfirmOutcome::VerificationNotAwaiting => {
            tracing::warn!(
                "Quota {} pagata ma la verifica {} non era in attesa di pagamento",
                payment.id,
                verification_id.unwrap_or_default()
            );
        }
        ConfirmOutcome::Confirmed => {}
    }

    tracing::info!("Pagamento {} confermato ({})", payment.id, reference);
    Ok(Json(load_payment(&state, &payment.id).await?))
}

/// Annulla un pagamento in attesa
#[utoipa::path(
    post,
    path = "/api/v1/payments/{id}/cancel",
    params(
        ("id" = String, Path, description = "ID pagamento")
    ),
    responses(
        (status = 200, description = "Pagamento annullato", body = PaymentTransaction),
        (status = 403, description = "Non sei il pagante"),
        (status = 409, description = "Pagamento non piu' in attesa"),
    ),
    security(("bearer" = [])),
    tag = "Pagamenti"
)]
pub async fn cancel_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<Json<PaymentTransaction>> {
    let user = auth.user()?;
    let payment = load_payment(&state, &id).await?;
    if payment.payer_id != user.id {
        return Err(AppError::Forbidden(
            "Solo il pagante puo' annullare il pagamento".to_string(),
        ));
    }
    require_pending(&payment)?;

    if !db_payments::cancel_payment(&state.db, &payment.id, payment.verification_id.as_deref())
        .await?
    {
        return Err(AppError::Conflict(
            "Il pagamento e' stato modificato da un'altra richiesta".to_string(),
        ));
    }

    Ok(Json(load_payment(&state, &payment.id).await?))
}
