//! SSE streaming dei nuovi messaggi

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;

use crate::error::Result;
use crate::models::{AuthInfo, ChatMessage};
use crate::services::ChatEvent;

use super::AppState;

/// Stream dei messaggi indirizzati a un utente.
///
/// Si chiude quando le sessioni del destinatario vengono revocate.
pub struct InboxStream {
    recipient_id: String,
    rx: BroadcastStream<ChatEvent>,
}

impl Stream for InboxStream {
    type Item = std::result::Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let rx = Pin::new(&mut self.rx);
            match rx.poll_next(cx) {
                Poll::Ready(Some(Ok(ChatEvent::SessionsRevoked { user_id }))) => {
                    if user_id == self.recipient_id {
                        tracing::info!("Stream chat di {} chiuso: sessioni revocate", user_id);
                        return Poll::Ready(None);
                    }
                }
                Poll::Ready(Some(Ok(ChatEvent::Message(message)))) => {
                    if message.recipient_id != self.recipient_id {
                        continue;
                    }
                    let json = serde_json::to_string(&message).unwrap_or_default();
                    let event = Event::default().event("message").id(message.id).data(json);
                    return Poll::Ready(Some(Ok(event)));
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    // I messaggi persi restano nel database
                    tracing::warn!(
                        "Stream chat di {} in ritardo, {} messaggi saltati",
                        self.recipient_id,
                        skipped
                    );
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Stream SSE dei nuovi messaggi ricevuti
#[utoipa::path(
    get,
    path = "/api/v1/chat/stream",
    tag = "Chat",
    responses(
        (status = 200, description = "Stream SSE di messaggi", body = ChatMessage),
        (status = 401, description = "Non autenticato"),
    ),
    security(("bearer" = []))
)]
pub async fn chat_stream(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthInfo>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let user = auth.user()?;

    let stream = InboxStream {
        recipient_id: user.id.clone(),
        rx: BroadcastStream::new(state.chat.subscribe()),
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
