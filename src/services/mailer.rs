//! Invio email transazionali (codici OTP)

use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::error::{AppError, Result};

/// Email in uscita
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Canale di consegna delle email
#[derive(Clone)]
pub enum Mailer {
    /// Scrive il messaggio nel log (sviluppo)
    Log,
    /// POST JSON `{to, subject, body}` verso un servizio esterno
    Webhook { url: String, client: reqwest::Client },
    /// Conserva i messaggi in memoria (test)
    Outbox(Arc<Mutex<Vec<OutgoingMail>>>),
}

impl Mailer {
    pub fn from_webhook(url: Option<String>) -> Self {
        match url {
            Some(url) => Mailer::Webhook {
                url,
                client: reqwest::Client::new(),
            },
            None => Mailer::Log,
        }
    }

    pub fn outbox() -> Self {
        Mailer::Outbox(Arc::new(Mutex::new(Vec::new())))
    }

    pub async fn send(&self, mail: OutgoingMail) -> Result<()> {
        match self {
            Mailer::Log => {
                tracing::info!(
                    "Email per {}: {}\n{}",
                    mail.to,
                    mail.subject,
                    mail.body
                );
                Ok(())
            }
            Mailer::Webhook { url, client } => {
                let response = client
                    .post(url)
                    .json(&mail)
                    .send()
                    .await
                    .map_err(|e| AppError::Internal(format!("Invio email fallito: {}", e)))?;

                if !response.status().is_success() {
                    return Err(AppError::Internal(format!(
                        "Invio email fallito: il webhook ha risposto {}",
                        response.status()
                    )));
                }

                tracing::debug!("Email inviata a {} tramite webhook", mail.to);
                Ok(())
            }
            Mailer::Outbox(outbox) => {
                outbox
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(mail);
                Ok(())
            }
        }
    }

    /// Messaggi conservati (solo `Outbox`)
    pub fn sent(&self) -> Vec<OutgoingMail> {
        match self {
            Mailer::Outbox(outbox) => outbox.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            _ => Vec::new(),
        }
    }
}
