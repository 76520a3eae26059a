pub mod admin;
pub mod auth;
pub mod chat;
pub mod health;
pub mod jobs;
pub mod payments;
pub mod profile;
pub mod reviews;
pub mod stats;
pub mod users;
pub mod verification;

use axum::{extract::DefaultBodyLimit, middleware, Router};
use std::sync::Arc;

use crate::config::{limits, Config};
use crate::db::DbPool;
use crate::middleware::auth::session_auth;
use crate::services::{CaptchaVerifier, ChatHub, Mailer, TokenService};

/// Stato condiviso da tutte le route
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub tokens: TokenService,
    pub captcha: Arc<CaptchaVerifier>,
    pub mailer: Mailer,
    pub chat: ChatHub,
}

impl AppState {
    pub fn new(db: DbPool, config: Config, mailer: Mailer) -> Self {
        Self {
            db,
            tokens: TokenService::new(&config.jwt_secret, config.jwt_expiry_hours),
            captcha: Arc::new(CaptchaVerifier::new(&config)),
            config: Arc::new(config),
            mailer,
            chat: ChatHub::new(),
        }
    }
}

/// Router dell'API con autenticazione e limite sul body.
/// Rate limiting, CORS, trace e Swagger vengono aggiunti in `main`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router(state.clone()))
        .merge(stats::router(state.clone()))
        .merge(auth::router(state.clone()))
        .merge(profile::router(state.clone()))
        .merge(users::router(state.clone()))
        .merge(jobs::router(state.clone()))
        .merge(reviews::router(state.clone()))
        .merge(payments::router(state.clone()))
        .merge(verification::router(state.clone()))
        .merge(chat::router(state.clone()))
        .merge(admin::router(state.clone()))
        .layer(middleware::from_fn_with_state(state, session_auth))
        .layer(DefaultBodyLimit::max(limits::MAX_BODY_BYTES))
}
