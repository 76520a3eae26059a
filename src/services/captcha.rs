//! Verifica reCAPTCHA con cache anti-replay
//!
//! Ogni token puo' essere usato una sola volta entro il TTL della cache: un
//! secondo invio dello stesso token viene rifiutato senza interrogare Google.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::{limits, Config};
use crate::error::{AppError, Result};

/// Insieme dei token gia' visti con scadenza
pub struct ReplayCache {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    capacity: usize,
}

impl ReplayCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Registra il token; false se era gia' presente e non scaduto
    pub fn check_and_insert(&self, token: &str) -> bool {
        self.check_and_insert_at(token, Instant::now())
    }

    fn check_and_insert_at(&self, token: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(seen_at) = entries.get(token) {
            if now.saturating_duration_since(*seen_at) < self.ttl {
                return false;
            }
        }

        if entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, seen_at| now.saturating_duration_since(*seen_at) < ttl);
        }
        if entries.len() >= self.capacity {
            // Cache piena anche dopo l'eviction: esce la voce piu' vecchia
            let oldest = entries
                .iter()
                .min_by_key(|(_, seen_at)| **seen_at)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }

        entries.insert(token.to_string(), now);
        true
    }

    /// Rimuove le voci scadute; restituisce quante ne ha eliminate
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, seen_at| now.saturating_duration_since(*seen_at) < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Risposta dell'endpoint siteverify
#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Verificatore reCAPTCHA
pub struct CaptchaVerifier {
    secret: Option<String>,
    verify_url: String,
    client: reqwest::Client,
    replay: ReplayCache,
}

impl CaptchaVerifier {
    pub fn new(config: &Config) -> Self {
        Self {
            secret: config.recaptcha_secret.clone(),
            verify_url: config.recaptcha_verify_url.clone(),
            client: reqwest::Client::new(),
            replay: ReplayCache::new(
                Duration::from_secs(config.captcha_replay_ttl_secs),
                limits::CAPTCHA_CACHE_CAPACITY,
            ),
        }
    }

    pub fn replay_cache(&self) -> &ReplayCache {
        &self.replay
    }

    /// Verifica il token del client. Senza segreto configurato (sviluppo) il
    /// token viene accettato dopo il controllo anti-replay.
    pub async fn verify(&self, token: Option<&str>, remote_ip: Option<&str>) -> Result<()> {
        let token = token.map(str::trim).unwrap_or_default();
        if token.is_empty() {
            return Err(AppError::Captcha("Token captcha mancante".to_string()));
        }

        if !self.replay.check_and_insert(token) {
            tracing::warn!("Token captcha riutilizzato da {:?}", remote_ip);
            return Err(AppError::Captcha("Token captcha gia' utilizzato".to_string()));
        }

        let Some(secret) = self.secret.as_deref() else {
            tracing::debug!("RECAPTCHA_SECRET non impostato, verifica captcha saltata");
            return Ok(());
        };

        let mut form = vec![("secret", secret), ("response", token)];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip));
        }

        let response = self
            .client
            .post(&self.verify_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Verifica captcha non raggiungibile: {}", e)))?;

        let body: SiteVerifyResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Risposta captcha non valida: {}", e)))?;

        if !body.success {
            tracing::info!("Captcha rifiutato: {:?}", body.error_codes);
            return Err(AppError::Captcha("Verifica captcha non superata".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_is_detected_within_ttl() {
        let cache = ReplayCache::new(Duration::from_secs(60), 10);
        let start = Instant::now();

        assert!(cache.check_and_insert_at("tok", start));
        assert!(!cache.check_and_insert_at("tok", start + Duration::from_secs(30)));
        // Dopo il TTL il token torna valido
        assert!(cache.check_and_insert_at("tok", start + Duration::from_secs(61)));
    }

    #[test]
    fn test_sweep_removes_expired() {
        let cache = ReplayCache::new(Duration::from_secs(10), 10);
        let start = Instant::now();
        cache.check_and_insert_at("a", start);
        cache.check_and_insert_at("b", start + Duration::from_secs(8));

        assert_eq!(cache.sweep_at(start + Duration::from_secs(12)), 1);
        assert_eq!(cache.len(), 1);
        assert!(!cache.check_and_insert_at("b", start + Duration::from_secs(12)));
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let cache = ReplayCache::new(Duration::from_secs(600), 2);
        let start = Instant::now();
        cache.check_and_insert_at("a", start);
        cache.check_and_insert_at("b", start + Duration::from_secs(1));
        cache.check_and_insert_at("c", start + Duration::from_secs(2));

        assert_eq!(cache.len(), 2);
        // "a" e' stato eliminato: puo' essere reinserito
        assert!(cache.check_and_insert_at("a", start + Duration::from_secs(3)));
        assert!(!cache.check_and_insert_at("c", start + Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_verifier_without_secret() {
        let verifier = CaptchaVerifier::new(&Config::default());

        assert!(matches!(
            verifier.verify(None, None).await,
            Err(AppError::Captcha(_))
        ));
        assert!(matches!(
            verifier.verify(Some("  "), None).await,
            Err(AppError::Captcha(_))
        ));
        assert!(verifier.verify(Some("token-1"), Some("127.0.0.1")).await.is_ok());
        assert!(matches!(
            verifier.verify(Some("token-1"), None).await,
            Err(AppError::Captcha(_))
        ));
        assert_eq!(verifier.replay_cache().len(), 1);
    }
}
