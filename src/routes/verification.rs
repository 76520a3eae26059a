//! Richieste di verifica dei lavoratori
//!
//! La richiesta nasce `awaiting_payment` insieme al pagamento della quota;
//! la conferma del pagamento la porta in `pending_review` e un admin decide.

use axum::{extract::State, http::StatusCode, routing::get, Extension, Json, Router};

use crate::config::limits;
use crate::db::verifications;
use crate::error::{AppError, Result};
use crate::models::{
    AuthInfo, CreateVerificationRequest, Role, VerificationCreatedResponse, VerificationRequest,
};
use crate::utils::{optional_text, validate_url};

use super::auth::is_unique_violation;
use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/verification",
            get(get_my_verification).post(request_verification),
        )
        .with_state(state)
}

/// Avvia la verifica del lavoratore e crea il pagamento della quota
#[utoipa::path(
    post,
    path = "/api/v1/verification",
    request_body = CreateVerificationRequest,
    responses(
        (status = 201, description = "Richiesta creata, quota da pagare", body = VerificationCreatedResponse),
        (status = 403, description = "Solo i lavoratori"),
        (status = 409, description = "Gia' verificato o richiesta in corso"),
    ),
    security(("bearer" = [])),
    tag = "Verifica"
)]
pub async fn request_verification(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<CreateVerificationRequest>,
) -> Result<(StatusCode, Json<VerificationCreatedResponse>)> {
    let user = auth.require_role(Role::Worker)?;

    if user.is_verified {
        return Err(AppError::Conflict("Sei gia' verificato".to_string()));
    }
    if verifications::has_open(&state.db, &user.id).await? {
        return Err(AppError::Conflict(
            "Hai gia' una richiesta di verifica in corso".to_string(),
        ));
    }

    let document_url = validate_url("document_url", &request.document_url)?;
    let notes = optional_text("notes", request.notes.as_deref(), limits::MAX_BIO_LEN)?;

    let (verification, payment) = verifications::create_with_fee(
        &state.db,
        &user.id,
        &document_url,
        notes.as_deref(),
        state.config.verification_fee_cents,
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Hai gia' una richiesta di verifica in corso".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    tracing::info!(
        "Verifica {} richiesta da {}, quota {}",
        verification.id,
        user.id,
        payment.id
    );

    Ok((
        StatusCode::CREATED,
        Json(VerificationCreatedResponse {
            verification,
            payment,
        }),
    ))
}

/// Ultima richiesta di verifica dell'utente
#[utoipa::path(
    get,
    path = "/api/v1/verification",
    responses(
        (status = 200, description = "Ultima richiesta", body = VerificationRequest),
        (status = 404, description = "Nessuna richiesta"),
    ),
    security(("bearer" = [])),
    tag = "Verifica"
)]
pub async fn get_my_verification(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
) -> Result<Json<VerificationRequest>> {
    let user = auth.user()?;
    verifications::latest_for_worker(&state.db, &user.id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Nessuna richiesta di verifica".to_string()))
}
