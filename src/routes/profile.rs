//! Gestione del profilo dell'utente autenticato
//!
//! Le modifiche sensibili (password, email, eliminazione) richiedono un codice
//! OTP ottenuto con `POST /api/v1/profile/otp`.

use axum::{
    extract::State,
    routing::{get, post, put},
    Extension, Json, Router,
};

use crate::config::limits;
use crate::db::users;
use crate::error::{AppError, Result};
use crate::models::{
    AuthInfo, AuthResponse, ChangeEmailRequest, ChangePasswordRequest, DeleteAccountRequest,
    MessageResponse, OtpPurpose, OtpRequest, OtpSentResponse, Role, UpdateProfileRequest, User,
};
use crate::services::{otp, passwords};
use crate::utils::{
    normalize_skills, optional_text, required_text, validate_email, validate_password,
    validate_phone, validate_url,
};

use super::auth::{is_unique_violation, issue_session};
use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/profile",
            get(get_profile).put(update_profile).delete(delete_account),
        )
        .route("/api/v1/profile/otp", post(request_otp))
        .route("/api/v1/profile/password", put(change_password))
        .route("/api/v1/profile/email", put(change_email))
        .with_state(state)
}

async fn load_user(state: &AppState, auth: &AuthInfo) -> Result<User> {
    let current = auth.user()?;
    users::find_by_id(&state.db, &current.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Utente non trovato".to_string()))
}

/// Profilo completo dell'utente autenticato
#[utoipa::path(
    get,
    path = "/api/v1/profile",
    responses(
        (status = 200, description = "Profilo", body = User),
        (status = 401, description = "Non autenticato"),
    ),
    security(("bearer" = [])),
    tag = "Profilo"
)]
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
) -> Result<Json<User>> {
    Ok(Json(load_user(&state, &auth).await?))
}

/// Aggiorna i campi non sensibili del profilo
#[utoipa::path(
    put,
    path = "/api/v1/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profilo aggiornato", body = User),
        (status = 422, description = "Dati non validi"),
    ),
    security(("bearer" = [])),
    tag = "Profilo"
)]
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<User>> {
    let current = auth.user()?;

    let skills = match request.skills {
        Some(ref skills) if current.role != Role::Worker && !skills.is_empty() => {
            return Err(AppError::Validation(
                "Solo i lavoratori possono indicare competenze".to_string(),
            ));
        }
        Some(ref skills) => Some(normalize_skills(skills)?),
        None => None,
    };

    let update = UpdateProfileRequest {
        name: request
            .name
            .as_deref()
            .map(|n| required_text("name", n, limits::MAX_NAME_LEN))
            .transpose()?,
        phone: match request.phone.as_deref().map(str::trim) {
            Some("") => Some(String::new()),
            Some(p) => Some(validate_phone(p)?),
            None => None,
        },
        bio: request
            .bio
            .as_deref()
            .map(|b| optional_text("bio", Some(b), limits::MAX_BIO_LEN))
            .transpose()?
            .map(Option::unwrap_or_default),
        location: request
            .location
            .as_deref()
            .map(|l| optional_text("location", Some(l), limits::MAX_NAME_LEN))
            .transpose()?
            .map(Option::unwrap_or_default),
        skills,
        avatar_url: match request.avatar_url.as_deref().map(str::trim) {
            Some("") => Some(String::new()),
            Some(u) => Some(validate_url("avatar_url", u)?),
            None => None,
        },
        two_factor_enabled: request.two_factor_enabled,
    };

    users::update_profile(&state.db, &current.id, &update).await?;
    Ok(Json(load_user(&state, &auth).await?))
}

/// Invia un codice OTP per una modifica sensibile
#[utoipa::path(
    post,
    path = "/api/v1/profile/otp",
    request_body = OtpRequest,
    responses(
        (status = 200, description = "Codice inviato via email", body = OtpSentResponse),
        (status = 429, description = "Codice richiesto troppo di recente"),
    ),
    security(("bearer" = [])),
    tag = "Profilo"
)]
pub async fn request_otp(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<OtpRequest>,
) -> Result<Json<OtpSentResponse>> {
    if request.purpose == OtpPurpose::Login {
        return Err(AppError::Validation(
            "Il codice di login viene inviato dall'endpoint di login".to_string(),
        ));
    }

    let user = load_user(&state, &auth).await?;
    let sent = otp::issue(&state.db, &state.config, &state.mailer, &user, request.purpose).await?;
    Ok(Json(sent))
}

/// Cambia la password; le sessioni precedenti vengono revocate
#[utoipa::path(
    put,
    path = "/api/v1/profile/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password cambiata, nuova sessione", body = AuthResponse),
        (status = 401, description = "Password attuale o codice non validi"),
    ),
    security(("bearer" = [])),
    tag = "Profilo"
)]
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<AuthResponse>> {
    let user = load_user(&state, &auth).await?;
    validate_password(&request.new_password)?;

    // Prima il codice: ogni tentativo sulla password consuma un tentativo OTP
    otp::verify(
        &state.db,
        &state.config,
        &user.id,
        OtpPurpose::PasswordChange,
        &request.code,
    )
    .await?;

    if !passwords::verify_password(&request.current_password, &user.password_hash) {
        return Err(AppError::Unauthorized("Password attuale non corretta".to_string()));
    }

    let hash = passwords::hash_password(&request.new_password)?;
    users::update_password(&state.db, &user.id, &hash).await?;
    state.chat.revoke(&user.id);
    tracing::info!("Password cambiata per l'utente {}", user.id);

    let user = load_user(&state, &auth).await?;
    Ok(Json(issue_session(&state, user)?))
}

/// Cambia l'indirizzo email
#[utoipa::path(
    put,
    path = "/api/v1/profile/email",
    request_body = ChangeEmailRequest,
    responses(
        (status = 200, description = "Email aggiornata", body = User),
        (status = 401, description = "Codice non valido"),
        (status = 409, description = "Email gia' in uso"),
    ),
    security(("bearer" = [])),
    tag = "Profilo"
)]
pub async fn change_email(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<ChangeEmailRequest>,
) -> Result<Json<User>> {
    let user = load_user(&state, &auth).await?;
    let email = validate_email(&request.new_email)?;

    if email == user.email {
        return Err(AppError::BadRequest(
            "La nuova email coincide con quella attuale".to_string(),
        ));
    }
    if users::email_exists(&state.db, &email).await? {
        return Err(AppError::Conflict("Email gia' in uso".to_string()));
    }

    otp::verify(
        &state.db,
        &state.config,
        &user.id,
        OtpPurpose::EmailChange,
        &request.code,
    )
    .await?;

    users::update_email(&state.db, &user.id, &email)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Email gia' in uso".to_string())
            } else {
                AppError::Database(e)
            }
        })?;

    Ok(Json(load_user(&state, &auth).await?))
}

/// Elimina l'account: i dati personali vengono anonimizzati
#[utoipa::path(
    delete,
    path = "/api/v1/profile",
    request_body = DeleteAccountRequest,
    responses(
        (status = 200, description = "Account eliminato", body = MessageResponse),
        (status = 401, description = "Codice non valido"),
        (status = 409, description = "Unico admin attivo"),
    ),
    security(("bearer" = [])),
    tag = "Profilo"
)]
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<DeleteAccountRequest>,
) -> Result<Json<MessageResponse>> {
    let user = load_user(&state, &auth).await?;

    if user.role == Role::Admin && users::count_active_admins(&state.db).await? <= 1 {
        return Err(AppError::Conflict(
            "Impossibile eliminare l'unico admin attivo".to_string(),
        ));
    }

    otp::verify(
        &state.db,
        &state.config,
        &user.id,
        OtpPurpose::AccountDeletion,
        &request.code,
    )
    .await?;

    users::soft_delete(&state.db, &user.id).await?;
    state.chat.revoke(&user.id);
    tracing::info!("Account {} eliminato", user.id);

    Ok(Json(MessageResponse::new("Account eliminato")))
}
