//! Codici OTP per login a due fattori e modifiche sensibili del profilo

use chrono::{Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::config::{limits, Config};
use crate::db::{otps, DbPool};
use crate::error::{AppError, Result};
use crate::models::{OtpPurpose, OtpSentResponse, User};

use super::mailer::{Mailer, OutgoingMail};

/// Codice numerico casuale a 6 cifre
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..limits::OTP_DIGITS)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Hash SHA-256 esadecimale del codice
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Genera, salva e spedisce un nuovo codice
pub async fn issue(
    pool: &DbPool,
    config: &Config,
    mailer: &Mailer,
    user: &User,
    purpose: OtpPurpose,
) -> Result<OtpSentResponse> {
    if let Some(last) = otps::last_issued_at(pool, &user.id, purpose).await? {
        let elapsed = Utc::now() - last;
        if elapsed < Duration::seconds(config.otp_resend_seconds) {
            let wait = config.otp_resend_seconds - elapsed.num_seconds();
            return Err(AppError::RateLimited(format!(
                "Attendi {} secondi prima di richiedere un nuovo codice",
                wait.max(1)
            )));
        }
    }

    let code = generate_code();
    let expires_at = Utc::now() + Duration::minutes(config.otp_ttl_minutes);
    let stored =
        otps::insert_code(pool, &user.id, purpose, &hash_code(&code), &expires_at).await?;

    let sent = mailer
        .send(OutgoingMail {
            to: user.email.clone(),
            subject: "Il tuo codice di verifica WorkDay".to_string(),
            body: format!(
                "Ciao {},\n\nil tuo codice per {} e' {}.\nScade tra {} minuti.\n\nSe non hai richiesto tu il codice ignora questa email.",
                user.name,
                purpose.describe(),
                code,
                config.otp_ttl_minutes
            ),
        })
        .await;

    // Un codice non consegnato non deve far partire il cooldown
    if let Err(e) = sent {
        otps::delete_code(pool, &stored.id).await?;
        tracing::warn!("Codice OTP per l'utente {} non consegnato: {}", user.id, e);
        return Err(e);
    }

    tracing::info!("Codice OTP {} inviato all'utente {}", purpose.as_str(), user.id);

    Ok(OtpSentResponse {
        purpose,
        expires_at,
    })
}

/// Verifica e consuma il codice piu' recente per lo scopo indicato
pub async fn verify(
    pool: &DbPool,
    config: &Config,
    user_id: &str,
    purpose: OtpPurpose,
    code: &str,
) -> Result<()> {
    let invalid = || AppError::Unauthorized("Codice non valido o scaduto".to_string());

    let stored = otps::latest_active(pool, user_id, purpose)
        .await?
        .ok_or_else(invalid)?;

    if stored.expires_at <= Utc::now() {
        return Err(invalid());
    }

    // Il tentativo viene contato prima del confronto: richieste parallele
    // non superano il limite
    if !otps::claim_attempt(pool, &stored.id, config.otp_max_attempts).await? {
        return Err(AppError::Unauthorized(
            "Troppi tentativi, richiedi un nuovo codice".to_string(),
        ));
    }

    if stored.code_hash != hash_code(code) {
        return Err(invalid());
    }

    // Due richieste concorrenti con lo stesso codice: vince solo la prima
    if !otps::consume(pool, &stored.id).await? {
        return Err(invalid());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_support, users};
    use crate::models::Role;

    fn code_from(mailer: &Mailer) -> String {
        let mail = mailer.sent().pop().unwrap();
        mail.body
            .split_whitespace()
            .find(|w| w.len() == 7 && w.ends_with('.') && w[..6].chars().all(|c| c.is_ascii_digit()))
            .map(|w| w[..6].to_string())
            .unwrap()
    }

    #[test]
    fn test_code_format() {
        let code = generate_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(hash_code("123456"), hash_code(" 123456 "));
        assert_eq!(hash_code("123456").len(), 64);
    }

    #[tokio::test]
    async fn test_issue_and_verify() {
        let pool = test_support::pool().await;
        let id = test_support::user(&pool, "u@w.it", Role::Customer).await;
        let user = users::find_by_id(&pool, &id).await.unwrap().unwrap();
        let config = Config::default();
        let mailer = Mailer::outbox();

        issue(&pool, &config, &mailer, &user, OtpPurpose::PasswordChange)
            .await
            .unwrap();
        let code = code_from(&mailer);

        // Scopo sbagliato
        assert!(verify(&pool, &config, &id, OtpPurpose::EmailChange, &code)
            .await
            .is_err());
        verify(&pool, &config, &id, OtpPurpose::PasswordChange, &code)
            .await
            .unwrap();
        // Il codice e' monouso
        assert!(verify(&pool, &config, &id, OtpPurpose::PasswordChange, &code)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_resend_cooldown() {
        let pool = test_support::pool().await;
        let id = test_support::user(&pool, "u@w.it", Role::Customer).await;
        let user = users::find_by_id(&pool, &id).await.unwrap().unwrap();
        let config = Config::default();
        let mailer = Mailer::outbox();

        issue(&pool, &config, &mailer, &user, OtpPurpose::Login)
            .await
            .unwrap();
        assert!(matches!(
            issue(&pool, &config, &mailer, &user, OtpPurpose::Login).await,
            Err(AppError::RateLimited(_))
        ));
        // Il cooldown vale per scopo
        assert!(issue(&pool, &config, &mailer, &user, OtpPurpose::AccountDeletion)
            .await
            .is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_wrong_guesses_respect_limit() {
        let (pool, path) = test_support::file_pool().await;
        let id = test_support::user(&pool, "u@w.it", Role::Customer).await;
        let user = users::find_by_id(&pool, &id).await.unwrap().unwrap();
        let config = std::sync::Arc::new(Config {
            otp_max_attempts: 3,
            ..Config::default()
        });
        let mailer = Mailer::outbox();

        issue(&pool, &config, &mailer, &user, OtpPurpose::Login)
            .await
            .unwrap();
        let code = code_from(&mailer);
        let wrong = if code == "000000" { "111111" } else { "000000" };

        let guesses: Vec<_> = (0..40)
            .map(|_| {
                let pool = pool.clone();
                let config = config.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    verify(&pool, &config, &id, OtpPurpose::Login, wrong).await
                })
            })
            .collect();
        for guess in guesses {
            assert!(guess.await.unwrap().is_err());
        }

        let (attempts,): (i64,) =
            sqlx::query_as("SELECT attempts FROM otp_codes WHERE user_id = ?")
                .bind(&id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(attempts, 3);
        assert!(verify(&pool, &config, &id, OtpPurpose::Login, &code)
            .await
            .is_err());

        test_support::remove_file_pool(pool, path).await;
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_start_cooldown() {
        let pool = test_support::pool().await;
        let id = test_support::user(&pool, "u@w.it", Role::Customer).await;
        let user = users::find_by_id(&pool, &id).await.unwrap().unwrap();
        let config = Config::default();

        // Nessun servizio in ascolto sulla porta 9
        let broken = Mailer::from_webhook(Some("http://127.0.0.1:9/mail".to_string()));
        assert!(matches!(
            issue(&pool, &config, &broken, &user, OtpPurpose::PasswordChange).await,
            Err(AppError::Internal(_))
        ));

        let mailer = Mailer::outbox();
        issue(&pool, &config, &mailer, &user, OtpPurpose::PasswordChange)
            .await
            .unwrap();
        let code = code_from(&mailer);
        verify(&pool, &config, &id, OtpPurpose::PasswordChange, &code)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_attempt_limit() {
        let pool = test_support::pool().await;
        let id = test_support::user(&pool, "u@w.it", Role::Customer).await;
        let user = users::find_by_id(&pool, &id).await.unwrap().unwrap();
        let config = Config {
            otp_max_attempts: 2,
            ..Config::default()
        };
        let mailer = Mailer::outbox();

        issue(&pool, &config, &mailer, &user, OtpPurpose::EmailChange)
            .await
            .unwrap();
        let code = code_from(&mailer);
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..2 {
            assert!(verify(&pool, &config, &id, OtpPurpose::EmailChange, wrong)
                .await
                .is_err());
        }
        // Tentativi esauriti: anche il codice giusto viene rifiutato
        assert!(verify(&pool, &config, &id, OtpPurpose::EmailChange, &code)
            .await
            .is_err());
    }
}
