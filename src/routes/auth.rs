use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};

use crate::config::limits;
use crate::db::users::{self, NewUser};
use crate::error::{AppError, Result};
use crate::models::{
    AuthInfo, AuthResponse, LoginOtpRequest, LoginRequest, LoginResponse, OtpPurpose,
    RegisterRequest, Role, User,
};
use crate::services::{otp, passwords};
use crate::utils::{required_text, validate_email, validate_password, validate_phone};

use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/auth/register", post(register))
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/login/otp", post(login_otp))
        .route("/api/v1/auth/me", get(get_current_user))
        .with_state(state)
}

/// Emette un token di sessione per l'utente
pub(crate) fn issue_session(state: &AppState, user: User) -> Result<AuthResponse> {
    let (token, expires_at) = state
        .tokens
        .issue(&user)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(AuthResponse {
        token,
        expires_at,
        user,
    })
}

/// Errore di vincolo UNIQUE (email gia' registrata in una richiesta concorrente)
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// Registrazione di un cliente o di un lavoratore
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account creato", body = AuthResponse),
        (status = 400, description = "Captcha non valido"),
        (status = 409, description = "Email gia' registrata"),
        (status = 422, description = "Dati non validi"),
    ),
    tag = "Auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    let email = validate_email(&request.email)?;
    validate_password(&request.password)?;
    let name = required_text("name", &request.name, limits::MAX_NAME_LEN)?;
    let phone = match request.phone.as_deref() {
        Some(p) if !p.trim().is_empty() => Some(validate_phone(p)?),
        _ => None,
    };
    if request.role == Role::Admin {
        return Err(AppError::Validation(
            "Il ruolo deve essere customer o worker".to_string(),
        ));
    }

    state
        .captcha
        .verify(request.captcha_token.as_deref(), auth.client_ip.as_deref())
        .await?;

    if users::email_exists(&state.db, &email).await? {
        return Err(AppError::Conflict("Email gia' registrata".to_string()));
    }

    let new_user = NewUser {
        email,
        password_hash: passwords::hash_password(&request.password)?,
        name,
        phone,
        role: request.role,
    };

    let user = users::create_user(&state.db, &new_user)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Email gia' registrata".to_string())
            } else {
                AppError::Database(e)
            }
        })?;

    tracing::info!("Nuovo utente registrato: {} ({})", user.id, user.role);

    let session = issue_session(&state, user)?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Login con email e password
///
/// Se l'utente ha attivato il secondo fattore riceve un codice via email e
/// deve completare l'accesso con `/api/v1/auth/login/otp`.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Sessione o richiesta del secondo fattore", body = LoginResponse),
        (status = 401, description = "Credenziali non valide"),
        (status = 403, description = "Account disattivato"),
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    state
        .captcha
        .verify(request.captcha_token.as_deref(), auth.client_ip.as_deref())
        .await?;

    let invalid = || AppError::Unauthorized("Credenziali non valide".to_string());

    let user = users::find_by_email(&state.db, &request.email)
        .await?
        .ok_or_else(invalid)?;

    if !passwords::verify_password(&request.password, &user.password_hash) {
        tracing::info!("Login fallito per {}", user.id);
        return Err(invalid());
    }

    if !user.is_active {
        return Err(AppError::Forbidden("Account disattivato".to_string()));
    }

    if user.two_factor_enabled {
        otp::issue(&state.db, &state.config, &state.mailer, &user, OtpPurpose::Login).await?;
        return Ok(Json(LoginResponse::TwoFactorRequired {
            two_factor_required: true,
        }));
    }

    users::touch_last_login(&state.db, &user.id).await?;
    Ok(Json(LoginResponse::Session(issue_session(&state, user)?)))
}

/// Completa un login a due fattori con il codice ricevuto
#[utoipa::path(
    post,
    path = "/api/v1/auth/login/otp",
    request_body = LoginOtpRequest,
    responses(
        (status = 200, description = "Sessione emessa", body = AuthResponse),
        (status = 401, description = "Codice non valido o scaduto"),
    ),
    tag = "Auth"
)]
pub async fn login_otp(
    State(state): State<AppState>,
    Json(request): Json<LoginOtpRequest>,
) -> Result<Json<AuthResponse>> {
    let user = users::find_by_email(&state.db, &request.email)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::Unauthorized("Codice non valido o scaduto".to_string()))?;

    otp::verify(
        &state.db,
        &state.config,
        &user.id,
        OtpPurpose::Login,
        &request.code,
    )
    .await?;

    users::touch_last_login(&state.db, &user.id).await?;
    Ok(Json(issue_session(&state, user)?))
}

/// Informazioni sull'utente autenticato
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Utente corrente", body = User),
        (status = 401, description = "Non autenticato"),
    ),
    security(("bearer" = [])),
    tag = "Auth"
)]
pub async fn get_current_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
) -> Result<Json<User>> {
    let current = auth.user()?;
    let user = users::find_by_id(&state.db, &current.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Utente non trovato".to_string()))?;
    Ok(Json(user))
}
