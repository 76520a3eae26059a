use axum::{
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

use crate::db::users;
use crate::error::AppError;
use crate::models::{AuthInfo, CurrentUser};
use crate::routes::AppState;
use crate::services::tokens::TokenError;

/// Middleware di autenticazione con token di sessione
///
/// Il token va passato come `Authorization: Bearer <jwt>`.
///
/// Senza token la richiesta prosegue come guest; le route che richiedono un
/// utente lo verificano tramite `AuthInfo`. Un token presente ma non valido,
/// scaduto o revocato viene sempre rifiutato.
pub async fn session_auth(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client_ip = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());

    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let user = match bearer {
        Some(token) => Some(authenticate(&state, token).await?),
        None => None,
    };

    request
        .extensions_mut()
        .insert(AuthInfo { user, client_ip });

    Ok(next.run(request).await)
}

async fn authenticate(state: &AppState, token: &str) -> Result<CurrentUser, AppError> {
    let claims = state.tokens.verify(token).map_err(|e| match e {
        TokenError::Expired => AppError::Unauthorized("Sessione scaduta".to_string()),
        _ => AppError::Unauthorized("Token non valido".to_string()),
    })?;

    let user = users::find_by_id(&state.db, &claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Utente non trovato".to_string()))?;

    if !user.is_active {
        return Err(AppError::Unauthorized("Account disattivato".to_string()));
    }

    // Password cambiata o account eliminato dopo l'emissione del token
    if user.token_version != claims.ver {
        return Err(AppError::Unauthorized("Sessione revocata".to_string()));
    }

    Ok(CurrentUser {
        id: user.id,
        role: user.role,
        is_verified: user.is_verified,
    })
}
