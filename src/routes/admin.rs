use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::limits;
use crate::db::users::{self, AdminUserUpdate, UsersQuery};
use crate::db::{otps, payments, stats, to_db_time, verifications};
use crate::error::{AppError, Result};
use crate::models::{
    AdminStats, AuthInfo, Page, Pagination, PaymentStatus, PaymentTransaction, PaymentsQuery,
    RejectVerificationRequest, Role, User, VerificationRequest, VerificationsQuery,
};
use crate::services::OutgoingMail;
use crate::utils::required_text;

use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        // Utenti
        .route("/api/v1/admin/users", get(list_users))
        .route("/api/v1/admin/users/:id", put(update_user))
        // Verifiche
        .route("/api/v1/admin/verifications", get(list_verifications))
        .route(
            "/api/v1/admin/verifications/:id/approve",
            post(approve_verification),
        )
        .route(
            "/api/v1/admin/verifications/:id/reject",
            post(reject_verification),
        )
        // Pagamenti
        .route("/api/v1/admin/payments", get(list_payments))
        .route("/api/v1/admin/payments/:id/refund", post(refund_payment))
        // Manutenzione
        .route("/api/v1/admin/stats", get(get_admin_stats))
        .route("/api/v1/admin/cleanup", post(cleanup_old_data))
        .with_state(state)
}

/// Lista utenti con filtri
#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    params(UsersQuery),
    responses(
        (status = 200, description = "Lista utenti", body = Page<User>),
        (status = 401, description = "Non autorizzato"),
        (status = 403, description = "Solo admin"),
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<UsersQuery>,
) -> Result<Json<Page<User>>> {
    auth.require_admin()?;

    let page = Pagination::new(query.page, query.limit);
    let (items, total) = users::list_users(&state.db, &query, page).await?;
    Ok(Json(Page::new(items, total, page)))
}

/// Attiva/disattiva un account, cambia ruolo o stato di verifica
#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{id}",
    params(
        ("id" = String, Path, description = "ID utente")
    ),
    request_body = AdminUserUpdate,
    responses(
        (status = 200, description = "Utente aggiornato", body = User),
        (status = 404, description = "Utente non trovato"),
        (status = 409, description = "Un admin non puo' disattivarsi o declassarsi"),
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
pub async fn update_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(request): Json<AdminUserUpdate>,
) -> Result<Json<User>> {
    let admin = auth.require_admin()?;

    if admin.id == id {
        let deactivating = request.is_active == Some(false);
        let demoting = request.role.is_some_and(|r| r != Role::Admin);
        if deactivating || demoting {
            return Err(AppError::Conflict(
                "Non puoi disattivare o declassare il tuo account".to_string(),
            ));
        }
    }

    if !users::admin_update(&state.db, &id, &request).await? {
        return Err(AppError::NotFound(format!("Utente {}", id)));
    }

    // Un account disattivato perde anche gli stream gia' aperti
    if request.is_active == Some(false) {
        state.chat.revoke(&id);
    }

    tracing::info!("Utente {} aggiornato dall'admin {}: {:?}", id, admin.id, request);

    let user = users::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Utente {}", id)))?;
    Ok(Json(user))
}

/// Richieste di verifica, le piu' vecchie prima
#[utoipa::path(
    get,
    path = "/api/v1/admin/verifications",
    params(VerificationsQuery),
    responses(
        (status = 200, description = "Richieste di verifica", body = Page<VerificationRequest>),
        (status = 403, description = "Solo admin"),
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
pub async fn list_verifications(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<VerificationsQuery>,
) -> Result<Json<Page<VerificationRequest>>> {
    auth.require_admin()?;

    let page = Pagination::new(query.page, query.limit);
    let (items, total) = verifications::list_verifications(&state.db, &query, page).await?;
    Ok(Json(Page::new(items, total, page)))
}

/// Avvisa il lavoratore dell'esito; un errore di invio non annulla la decisione
async fn notify_decision(state: &AppState, verification: &VerificationRequest) {
    let worker = match users::find_by_id(&state.db, &verification.worker_id).await {
        Ok(Some(worker)) => worker,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("Impossibile caricare il lavoratore {}: {}", verification.worker_id, e);
            return;
        }
    };

    let body = match verification.rejection_reason.as_deref() {
        None => format!(
            "Ciao {},\nla tua verifica su WorkDay e' stata approvata.",
            worker.name
        ),
        Some(reason) => format!(
            "Ciao {},\nla tua verifica su WorkDay e' stata respinta.\nMotivo: {}",
            worker.name, reason
        ),
    };

    let mail = OutgoingMail {
        to: worker.email,
        subject: "Esito della verifica WorkDay".to_string(),
        body,
    };
    if let Err(e) = state.mailer.send(mail).await {
        tracing::warn!("Notifica verifica {} non inviata: {}", verification.id, e);
    }
}

async fn decide_verification(
    state: &AppState,
    auth: &AuthInfo,
    id: &str,
    approved: bool,
    reason: Option<&str>,
) -> Result<VerificationRequest> {
    let admin = auth.require_admin()?;

    let current = verifications::get_verification(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Verifica {}", id)))?;

    if !verifications::decide(&state.db, &current.id, &admin.id, approved, reason).await? {
        return Err(AppError::Conflict(format!(
            "La verifica e' {}, serve pending_review",
            current.status.as_str()
        )));
    }

    let decided = verifications::get_verification(&state.db, &current.id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Verifica {}", id)))?;

    tracing::info!(
        "Verifica {} {} dall'admin {}",
        decided.id,
        decided.status.as_str(),
        admin.id
    );
    notify_decision(state, &decided).await;

    Ok(decided)
}

/// Approva una verifica in revisione: il lavoratore diventa verificato
#[utoipa::path(
    post,
    path = "/api/v1/admin/verifications/{id}/approve",
    params(
        ("id" = String, Path, description = "ID verifica")
    ),
    responses(
        (status = 200, description = "Verifica approvata", body = VerificationRequest),
        (status = 404, description = "Verifica non trovata"),
        (status = 409, description = "Verifica non in revisione"),
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
pub async fn approve_verification(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<Json<VerificationRequest>> {
    Ok(Json(decide_verification(&state, &auth, &id, true, None).await?))
}

/// Respinge una verifica in revisione con il motivo
#[utoipa::path(
    post,
    path = "/api/v1/admin/verifications/{id}/reject",
    params(
        ("id" = String, Path, description = "ID verifica")
    ),
    request_body = RejectVerificationRequest,
    responses(
        (status = 200, description = "Verifica respinta", body = VerificationRequest),
        (status = 404, description = "Verifica non trovata"),
        (status = 409, description = "Verifica non in revisione"),
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
pub async fn reject_verification(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(request): Json<RejectVerificationRequest>,
) -> Result<Json<VerificationRequest>> {
    let reason = required_text("reason", &request.reason, limits::MAX_REQUEST_MESSAGE_LEN)?;
    Ok(Json(
        decide_verification(&state, &auth, &id, false, Some(&reason)).await?,
    ))
}

/// Tutte le transazioni con filtri
#[utoipa::path(
    get,
    path = "/api/v1/admin/payments",
    params(PaymentsQuery),
    responses(
        (status = 200, description = "Transazioni", body = Page<PaymentTransaction>),
        (status = 403, description = "Solo admin"),
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<PaymentsQuery>,
) -> Result<Json<Page<PaymentTransaction>>> {
    auth.require_admin()?;

    let page = Pagination::new(query.page, query.limit);
    let (items, total) = payments::list_all(&state.db, &query, page).await?;
    Ok(Json(Page::new(items, total, page)))
}

/// Rimborsa un pagamento completato
#[utoipa::path(
    post,
    path = "/api/v1/admin/payments/{id}/refund",
    params(
        ("id" = String, Path, description = "ID pagamento")
    ),
    responses(
        (status = 200, description = "Pagamento rimborsato", body = PaymentTransaction),
        (status = 404, description = "Pagamento non trovato"),
        (status = 409, description = "Solo i pagamenti completati sono rimborsabili"),
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<Json<PaymentTransaction>> {
    let admin = auth.require_admin()?;

    let payment = payments::get_payment(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Pagamento {}", id)))?;

    if !payments::set_status(
        &state.db,
        &payment.id,
        PaymentStatus::Completed,
        PaymentStatus::Refunded,
    )
    .await?
    {
        return Err(AppError::Conflict(format!(
            "Il pagamento e' {}, solo i pagamenti completati sono rimborsabili",
            payment.status.as_str()
        )));
    }

    tracing::info!("Pagamento {} rimborsato dall'admin {}", payment.id, admin.id);

    let refunded = payments::get_payment(&state.db, &payment.id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Pagamento {}", id)))?;
    Ok(Json(refunded))
}

/// Statistiche complete della piattaforma
#[utoipa::path(
    get,
    path = "/api/v1/admin/stats",
    responses(
        (status = 200, description = "Statistiche", body = AdminStats),
        (status = 403, description = "Solo admin"),
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
pub async fn get_admin_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
) -> Result<Json<AdminStats>> {
    auth.require_admin()?;
    Ok(Json(stats::admin_stats(&state.db).await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CleanupRequest {
    /// Giorni di dati da mantenere (default: 30)
    #[serde(default = "default_cleanup_days")]
    pub days: i64,
}

fn default_cleanup_days() -> i64 {
    30
}

const MAX_CLEANUP_DAYS: i64 = 3650;

#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupResponse {
    pub otp_codes_deleted: u64,
    pub payments_deleted: u64,
    pub message: String,
}

/// Elimina codici OTP usati o scaduti e pagamenti falliti piu' vecchi di `days`
#[utoipa::path(
    post,
    path = "/api/v1/admin/cleanup",
    request_body = CleanupRequest,
    responses(
        (status = 200, description = "Pulizia completata", body = CleanupResponse),
        (status = 403, description = "Solo admin"),
        (status = 422, description = "Numero di giorni non valido"),
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
pub async fn cleanup_old_data(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<CleanupRequest>,
) -> Result<Json<CleanupResponse>> {
    auth.require_admin()?;

    if !(0..=MAX_CLEANUP_DAYS).contains(&request.days) {
        return Err(AppError::Validation(format!(
            "days deve essere compreso tra 0 e {}",
            MAX_CLEANUP_DAYS
        )));
    }

    let cutoff = to_db_time(&(Utc::now() - Duration::days(request.days)));
    let otp_codes_deleted = otps::delete_stale(&state.db, &cutoff).await?;
    let payments_deleted = payments::delete_failed_before(&state.db, &cutoff).await?;

    tracing::info!(
        "Pulizia: {} codici OTP e {} pagamenti falliti eliminati",
        otp_codes_deleted,
        payments_deleted
    );

    Ok(Json(CleanupResponse {
        otp_codes_deleted,
        payments_deleted,
        message: format!(
            "Eliminati {} record piu' vecchi di {} giorni",
            otp_codes_deleted + payments_deleted,
            request.days
        ),
    }))
}
