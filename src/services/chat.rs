use tokio::sync::broadcast;

use crate::models::ChatMessage;

/// Capacita' del broadcast channel dei messaggi
const CHAT_CHANNEL_CAPACITY: usize = 256;

/// Eventi distribuiti agli stream SSE connessi
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message(ChatMessage),
    /// Le sessioni dell'utente sono state revocate: i suoi stream vanno chiusi
    SessionsRevoked { user_id: String },
}

/// Distribuisce i nuovi messaggi agli stream SSE connessi
#[derive(Clone)]
pub struct ChatHub {
    tx: broadcast::Sender<ChatEvent>,
}

impl ChatHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHAT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, message: ChatMessage) {
        // Nessun client connesso: il messaggio resta comunque nel database
        let _ = self.tx.send(ChatEvent::Message(message));
    }

    /// Chiude gli stream aperti dell'utente (password cambiata, account
    /// disattivato o eliminato)
    pub fn revoke(&self, user_id: &str) {
        let _ = self.tx.send(ChatEvent::SessionsRevoked {
            user_id: user_id.to_string(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new()
    }
}
