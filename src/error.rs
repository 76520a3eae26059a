use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Non trovato: {0}")]
    NotFound(String),

    #[error("Richiesta non valida: {0}")]
    BadRequest(String),

    #[error("Dati non validi: {0}")]
    Validation(String),

    #[error("Non autorizzato: {0}")]
    Unauthorized(String),

    #[error("Accesso negato: {0}")]
    Forbidden(String),

    #[error("Conflitto: {0}")]
    Conflict(String),

    #[error("Transizione non consentita: {action} su un job {from}")]
    InvalidTransition { from: String, action: String },

    #[error("Verifica captcha fallita: {0}")]
    Captcha(String),

    #[error("Troppe richieste: {0}")]
    RateLimited(String),

    #[error("Errore database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Errore interno: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::Captcha(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Non esporre i dettagli degli errori di database al client
        let error_message = match &self {
            AppError::Database(e) => {
                tracing::error!("Errore database: {}", e);
                "Errore interno".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Errore interno: {}", e);
                "Errore interno".to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
