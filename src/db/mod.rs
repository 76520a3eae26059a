pub mod jobs;
pub mod messages;
pub mod otps;
pub mod payments;
pub mod reviews;
pub mod stats;
pub mod users;
pub mod verifications;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::time::Duration;

pub type DbPool = SqlitePool;

/// Timestamp corrente nel formato salvato nel database.
/// RFC 3339 a precisione fissa, cosi' il confronto tra stringhe segue l'ordine temporale.
pub fn now() -> String {
    to_db_time(&Utc::now())
}

pub fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Inizializza il database SQLite
pub async fn init_db(database_url: &str) -> Result<DbPool, sqlx::Error> {
    // Crea il pool di connessioni
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .idle_timeout(Duration::from_secs(60))
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    // Esegui le migrazioni
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Database in memoria con una sola connessione persistente (usato dai test)
pub async fn init_memory_db() -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Verifica che il database risponda
pub async fn ping(pool: &DbPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// Esegue le migrazioni del database
async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    // Utenti: clienti, lavoratori e admin
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            name TEXT NOT NULL,
            phone TEXT,
            role TEXT NOT NULL,
            bio TEXT,
            location TEXT,
            skills TEXT NOT NULL DEFAULT '[]',
            avatar_url TEXT,
            is_verified INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            two_factor_enabled INTEGER NOT NULL DEFAULT 0,
            token_version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_login_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)"#)
        .execute(pool)
        .await?;

    // Job pubblicati dai clienti
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            budget_cents INTEGER NOT NULL,
            location TEXT,
            scheduled_for TEXT,
            status TEXT NOT NULL DEFAULT 'open',
            assigned_worker_id TEXT,
            failure_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            FOREIGN KEY (customer_id) REFERENCES users(id),
            FOREIGN KEY (assigned_worker_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_jobs_customer ON jobs(customer_id)"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_jobs_worker ON jobs(assigned_worker_id)"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)"#)
        .execute(pool)
        .await?;

    // Candidature dei lavoratori
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_requests (
            job_id TEXT NOT NULL,
            worker_id TEXT NOT NULL,
            message TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (job_id, worker_id),
            FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE,
            FOREIGN KEY (worker_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_job_requests_worker ON job_requests(worker_id)"#,
    )
    .execute(pool)
    .await?;

    // Recensioni
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reviews (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            reviewer_id TEXT NOT NULL,
            reviewee_id TEXT NOT NULL,
            rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
            comment TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (job_id, reviewer_id),
            FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE,
            FOREIGN KEY (reviewer_id) REFERENCES users(id),
            FOREIGN KEY (reviewee_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_reviews_reviewee ON reviews(reviewee_id)"#)
        .execute(pool)
        .await?;

    // Richieste di verifica dei lavoratori
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verification_requests (
            id TEXT PRIMARY KEY,
            worker_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'awaiting_payment',
            document_url TEXT NOT NULL,
            notes TEXT,
            rejection_reason TEXT,
            reviewed_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            reviewed_at TEXT,
            FOREIGN KEY (worker_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_verifications_worker ON verification_requests(worker_id)"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_verifications_status ON verification_requests(status)"#,
    )
    .execute(pool)
    .await?;

    // Una sola richiesta aperta per lavoratore
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_verifications_open ON verification_requests(worker_id)
        WHERE status IN ('awaiting_payment', 'pending_review')
        "#,
    )
    .execute(pool)
    .await?;

    // Transazioni di pagamento
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            payer_id TEXT NOT NULL,
            payee_id TEXT,
            job_id TEXT,
            verification_id TEXT,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'EUR',
            provider_reference TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT,
            FOREIGN KEY (payer_id) REFERENCES users(id),
            FOREIGN KEY (payee_id) REFERENCES users(id),
            FOREIGN KEY (verification_id) REFERENCES verification_requests(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_payments_payer ON payments(payer_id)"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_payments_payee ON payments(payee_id)"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_payments_job ON payments(job_id)"#)
        .execute(pool)
        .await?;

    // Un solo pagamento attivo per job
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_payments_active_job ON payments(job_id)
        WHERE kind = 'job_payment' AND status IN ('pending', 'completed')
        "#,
    )
    .execute(pool)
    .await?;

    // Codici OTP (solo hash)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS otp_codes (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            purpose TEXT NOT NULL,
            code_hash TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            consumed_at TEXT,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_otp_user_purpose ON otp_codes(user_id, purpose, created_at)"#,
    )
    .execute(pool)
    .await?;

    // Messaggi della chat
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            worker_id TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            read_at TEXT,
            FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE,
            FOREIGN KEY (sender_id) REFERENCES users(id),
            FOREIGN KEY (recipient_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(job_id, worker_id, created_at)"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id, read_at)"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
