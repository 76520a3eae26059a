//! Chat tra cliente e lavoratore
//!
//! Una conversazione e' identificata dalla coppia (job, lavoratore): il
//! cliente puo' parlare con ciascun candidato, il lavoratore solo con il
//! cliente dei job a cui si e' candidato o che gli sono stati assegnati.

mod stream;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};

use crate::config::limits;
use crate::db::{jobs as db_jobs, messages};
use crate::error::{AppError, Result};
use crate::models::{
    AuthInfo, ChatMessage, CurrentUser, Job, MarkReadRequest, MarkReadResponse, MessagesQuery,
    Page, Pagination, SendMessageRequest, UnreadResponse,
};
use crate::utils::required_text;

pub use stream::*;

use super::jobs::{is_assigned, is_owner, load_job};
use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/jobs/:id/messages",
            get(list_messages).post(send_message),
        )
        .route("/api/v1/jobs/:id/messages/read", post(mark_read))
        .route("/api/v1/chat/stream", get(chat_stream))
        .route("/api/v1/chat/unread", get(unread_count))
        .with_state(state)
}

/// Partecipanti di una conversazione
struct Conversation {
    worker_id: String,
    /// L'altra parte rispetto a chi chiama
    counterpart_id: String,
}

async fn is_participant(state: &AppState, job: &Job, worker_id: &str) -> Result<bool> {
    if job.assigned_worker_id.as_deref() == Some(worker_id) {
        return Ok(true);
    }
    Ok(db_jobs::has_request(&state.db, &job.id, worker_id).await?)
}

/// Risolve la conversazione a cui si riferisce chi chiama
async fn resolve_conversation(
    state: &AppState,
    job: &Job,
    user: &CurrentUser,
    worker_id: Option<&str>,
) -> Result<Conversation> {
    if is_owner(job, user) {
        let worker_id = worker_id
            .filter(|w| !w.trim().is_empty())
            .ok_or_else(|| {
                AppError::Validation("worker_id obbligatorio per il cliente".to_string())
            })?;

        if !is_participant(state, job, worker_id).await? {
            return Err(AppError::NotFound(
                "Il lavoratore non partecipa a questo job".to_string(),
            ));
        }

        return Ok(Conversation {
            worker_id: worker_id.to_string(),
            counterpart_id: worker_id.to_string(),
        });
    }

    if is_assigned(job, user) || is_participant(state, job, &user.id).await? {
        return Ok(Conversation {
            worker_id: user.id.clone(),
            counterpart_id: job.customer_id.clone(),
        });
    }

    Err(AppError::Forbidden(
        "Non partecipi a questo job".to_string(),
    ))
}

/// Messaggi della conversazione, dal piu' vecchio
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/messages",
    tag = "Chat",
    params(
        ("id" = String, Path, description = "ID del job"),
        MessagesQuery
    ),
    responses(
        (status = 200, description = "Messaggi", body = Page<ChatMessage>),
        (status = 403, description = "Non partecipi al job"),
    ),
    security(("bearer" = []))
)]
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Page<ChatMessage>>> {
    let user = auth.user()?;
    let job = load_job(&state, &id).await?;
    let conversation =
        resolve_conversation(&state, &job, user, query.worker_id.as_deref()).await?;

    let page = Pagination::new(query.page, query.limit);
    let (items, total) =
        messages::list_conversation(&state.db, &job.id, &conversation.worker_id, page).await?;

    Ok(Json(Page::new(items, total, page)))
}

/// Invia un messaggio; resta possibile anche a job chiuso
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/messages",
    tag = "Chat",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Messaggio inviato", body = ChatMessage),
        (status = 403, description = "Non partecipi al job"),
        (status = 422, description = "Messaggio vuoto o troppo lungo"),
    ),
    security(("bearer" = []))
)]
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>)> {
    let user = auth.user()?;
    let body = required_text("body", &request.body, limits::MAX_MESSAGE_LEN)?;
    let job = load_job(&state, &id).await?;
    let conversation =
        resolve_conversation(&state, &job, user, request.worker_id.as_deref()).await?;

    let message = messages::insert_message(
        &state.db,
        &messages::NewMessage {
            job_id: &job.id,
            worker_id: &conversation.worker_id,
            sender_id: &user.id,
            recipient_id: &conversation.counterpart_id,
            body: &body,
        },
    )
    .await?;

    state.chat.publish(message.clone());
    tracing::debug!("Messaggio {} sul job {}", message.id, job.id);

    Ok((StatusCode::CREATED, Json(message)))
}

/// Segna come letti i messaggi ricevuti nella conversazione
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/messages/read",
    tag = "Chat",
    params(
        ("id" = String, Path, description = "ID del job")
    ),
    request_body = MarkReadRequest,
    responses(
        (status = 200, description = "Messaggi segnati come letti", body = MarkReadResponse),
    ),
    security(("bearer" = []))
)]
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(request): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>> {
    let user = auth.user()?;
    let job = load_job(&state, &id).await?;
    let conversation =
        resolve_conversation(&state, &job, user, request.worker_id.as_deref()).await?;

    let marked =
        messages::mark_read(&state.db, &job.id, &conversation.worker_id, &user.id).await?;
    Ok(Json(MarkReadResponse { marked }))
}

/// Numero di messaggi non letti
#[utoipa::path(
    get,
    path = "/api/v1/chat/unread",
    tag = "Chat",
    responses(
        (status = 200, description = "Messaggi non letti", body = UnreadResponse),
    ),
    security(("bearer" = []))
)]
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
) -> Result<Json<UnreadResponse>> {
    let user = auth.user()?;
    let unread = messages::unread_count(&state.db, &user.id).await?;
    Ok(Json(UnreadResponse { unread }))
}
