//! Codici OTP: nel database viene salvato solo l'hash

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::{new_id, now, to_db_time, DbPool};
use crate::models::OtpPurpose;

#[derive(Debug, Clone, FromRow)]
pub struct OtpCode {
    pub id: String,
    pub user_id: String,
    pub purpose: String,
    pub code_hash: String,
    pub attempts: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

/// Salva un nuovo codice invalidando quelli precedenti non usati
pub async fn insert_code(
    pool: &DbPool,
    user_id: &str,
    purpose: OtpPurpose,
    code_hash: &str,
    expires_at: &DateTime<Utc>,
) -> Result<OtpCode, sqlx::Error> {
    let id = new_id();
    let now = now();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE otp_codes SET consumed_at = ?
        WHERE user_id = ? AND purpose = ? AND consumed_at IS NULL
        "#,
    )
    .bind(&now)
    .bind(user_id)
    .bind(purpose.as_str())
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO otp_codes (id, user_id, purpose, code_hash, attempts, created_at, expires_at)
        VALUES (?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(user_id)
    .bind(purpose.as_str())
    .bind(code_hash)
    .bind(&now)
    .bind(to_db_time(expires_at))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    sqlx::query_as::<_, OtpCode>("SELECT * FROM otp_codes WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await
}

/// Ultimo codice non ancora consumato per utente e scopo
pub async fn latest_active(
    pool: &DbPool,
    user_id: &str,
    purpose: OtpPurpose,
) -> Result<Option<OtpCode>, sqlx::Error> {
    sqlx::query_as::<_, OtpCode>(
        r#"
        SELECT * FROM otp_codes
        WHERE user_id = ? AND purpose = ? AND consumed_at IS NULL
        ORDER BY created_at DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(purpose.as_str())
    .fetch_optional(pool)
    .await
}

/// Data dell'ultimo codice emesso (per il cooldown di reinvio)
pub async fn last_issued_at(
    pool: &DbPool,
    user_id: &str,
    purpose: OtpPurpose,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
        r#"
        SELECT created_at FROM otp_codes
        WHERE user_id = ? AND purpose = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(purpose.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.0))
}

/// Riserva un tentativo di verifica sul codice.
/// false se il codice e' gia' consumato o ha esaurito i tentativi.
pub async fn claim_attempt(
    pool: &DbPool,
    id: &str,
    max_attempts: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE otp_codes SET attempts = attempts + 1
        WHERE id = ? AND consumed_at IS NULL AND attempts < ?
        "#,
    )
    .bind(id)
    .bind(max_attempts)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Elimina un codice mai consegnato
pub async fn delete_code(pool: &DbPool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM otp_codes WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Consuma il codice; false se era gia' stato usato
pub async fn consume(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("UPDATE otp_codes SET consumed_at = ? WHERE id = ? AND consumed_at IS NULL")
            .bind(now())
            .bind(id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Elimina i codici consumati o scaduti prima della soglia
pub async fn delete_stale(pool: &DbPool, cutoff: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM otp_codes
        WHERE (consumed_at IS NOT NULL AND consumed_at < ?) OR expires_at < ?
        "#,
    )
    .bind(cutoff)
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
