//! Transazioni di pagamento

use sqlx::{QueryBuilder, SqliteExecutor};

use super::{new_id, now, verifications, DbPool};
use crate::models::{
    Pagination, PaymentKind, PaymentStatus, PaymentTransaction, PaymentsQuery,
};

const PAYMENT_COLUMNS: &str = r#"
    id, kind, status, payer_id, payee_id, job_id, verification_id, amount_cents,
    currency, provider_reference, created_at, updated_at, completed_at
"#;

/// Dati di una nuova transazione
#[derive(Debug, Clone)]
pub struct NewPayment<'a> {
    pub kind: PaymentKind,
    pub payer_id: &'a str,
    pub payee_id: Option<&'a str>,
    pub job_id: Option<&'a str>,
    pub verification_id: Option<&'a str>,
    pub amount_cents: i64,
}

/// Inserisce una transazione pending e ne restituisce l'id.
/// Accetta anche una transazione aperta, per scritture multiple atomiche.
pub async fn insert_payment<'e, E>(
    executor: E,
    payment: &NewPayment<'_>,
) -> Result<String, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let id = new_id();
    let now = now();

    sqlx::query(
        r#"
        INSERT INTO payments (
            id, kind, status, payer_id, payee_id, job_id, verification_id,
            amount_cents, created_at, updated_at
        ) VALUES (?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(payment.kind.as_str())
    .bind(payment.payer_id)
    .bind(payment.payee_id)
    .bind(payment.job_id)
    .bind(payment.verification_id)
    .bind(payment.amount_cents)
    .bind(&now)
    .bind(&now)
    .execute(executor)
    .await?;

    Ok(id)
}

pub async fn create_payment(
    pool: &DbPool,
    payment: &NewPayment<'_>,
) -> Result<PaymentTransaction, sqlx::Error> {
    let id = insert_payment(pool, payment).await?;
    get_payment(pool, &id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn get_payment(
    pool: &DbPool,
    id: &str,
) -> Result<Option<PaymentTransaction>, sqlx::Error> {
    sqlx::query_as::<_, PaymentTransaction>(&format!(
        "SELECT {} FROM payments WHERE id = ?",
        PAYMENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Esito della conferma di un pagamento
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Il pagamento non era piu' pending
    NotPending,
    Confirmed,
    /// Quota confermata ma la verifica collegata non era in attesa di pagamento
    VerificationNotAwaiting,
}

/// Conferma un pagamento ancora pending.
/// Per una quota di verifica la richiesta passa in revisione nella stessa transazione.
pub async fn confirm_payment(
    pool: &DbPool,
    id: &str,
    provider_reference: &str,
    verification_id: Option<&str>,
) -> Result<ConfirmOutcome, sqlx::Error> {
    let now = now();
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = 'completed', provider_reference = ?, completed_at = ?, updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(provider_reference)
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(ConfirmOutcome::NotPending);
    }

    let outcome = match verification_id {
        Some(verification_id) if !verifications::mark_paid(&mut *tx, verification_id).await? => {
            ConfirmOutcome::VerificationNotAwaiting
        }
        _ => ConfirmOutcome::Confirmed,
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Annulla un pagamento pending; la verifica collegata viene abbandonata
/// nella stessa transazione
pub async fn cancel_payment(
    pool: &DbPool,
    id: &str,
    verification_id: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE payments SET status = 'failed', updated_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(now())
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    if let Some(verification_id) = verification_id {
        verifications::abandon(&mut *tx, verification_id).await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// Cambio di stato condizionato allo stato atteso
pub async fn set_status(
    pool: &DbPool,
    id: &str,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("UPDATE payments SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(now())
            .bind(id)
            .bind(from.as_str())
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Esiste un pagamento del job gia' completato o in attesa
pub async fn has_active_job_payment(pool: &DbPool, job_id: &str) -> Result<bool, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM payments
        WHERE job_id = ? AND kind = 'job_payment' AND status IN ('pending', 'completed')
        "#,
    )
    .bind(job_id)
    .fetch_one(pool)
    .await?;
    Ok(row.0 > 0)
}

/// Transazioni in cui l'utente e' pagante o beneficiario
pub async fn list_for_user(
    pool: &DbPool,
    user_id: &str,
    page: Pagination,
) -> Result<(Vec<PaymentTransaction>, i64), sqlx::Error> {
    let total: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM payments WHERE payer_id = ? OR payee_id = ?")
            .bind(user_id)
            .bind(user_id)
            .fetch_one(pool)
            .await?;

    let items = sqlx::query_as::<_, PaymentTransaction>(&format!(
        r#"
        SELECT {} FROM payments
        WHERE payer_id = ? OR payee_id = ?
        ORDER BY created_at DESC LIMIT ? OFFSET ?
        "#,
        PAYMENT_COLUMNS
    ))
    .bind(user_id)
    .bind(user_id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok((items, total.0))
}

/// Lista completa con filtri (pannello admin)
pub async fn list_all(
    pool: &DbPool,
    query: &PaymentsQuery,
    page: Pagination,
) -> Result<(Vec<PaymentTransaction>, i64), sqlx::Error> {
    fn push_filters(builder: &mut QueryBuilder<'_, sqlx::Sqlite>, query: &PaymentsQuery) {
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(kind) = query.kind {
            builder.push(" AND kind = ").push_bind(kind.as_str());
        }
    }

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM payments WHERE 1=1");
    push_filters(&mut count, query);
    let total: (i64,) = count.build_query_as().fetch_one(pool).await?;

    let mut data = QueryBuilder::new(format!(
        "SELECT {} FROM payments WHERE 1=1",
        PAYMENT_COLUMNS
    ));
    push_filters(&mut data, query);
    data.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let items = data
        .build_query_as::<PaymentTransaction>()
        .fetch_all(pool)
        .await?;
    Ok((items, total.0))
}

/// Elimina i pagamenti falliti piu' vecchi della soglia
pub async fn delete_failed_before(pool: &DbPool, cutoff: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM payments WHERE status = 'failed' AND updated_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Volume dei pagamenti completati per tipo
pub async fn completed_volume(pool: &DbPool) -> Result<Vec<(String, i64, i64)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT kind, COUNT(*), COALESCE(SUM(amount_cents), 0)
        FROM payments WHERE status = 'completed'
        GROUP BY kind ORDER BY kind
        "#,
    )
    .fetch_all(pool)
    .await
}
