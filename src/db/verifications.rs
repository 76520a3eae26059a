use sqlx::{QueryBuilder, SqliteExecutor};

use super::payments::{self, NewPayment};
use super::{new_id, now, DbPool};
use crate::models::{
    Pagination, PaymentKind, PaymentTransaction, VerificationRequest, VerificationStatus,
    VerificationsQuery,
};

const VERIFICATION_COLUMNS: &str = r#"
    id, worker_id, status, document_url, notes, rejection_reason, reviewed_by,
    created_at, updated_at, reviewed_at
"#;

async fn insert_verification<'e, E>(
    executor: E,
    worker_id: &str,
    document_url: &str,
    notes: Option<&str>,
) -> Result<String, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let id = new_id();
    let now = now();

    sqlx::query(
        r#"
        INSERT INTO verification_requests (id, worker_id, status, document_url, notes, created_at, updated_at)
        VALUES (?, ?, 'awaiting_payment', ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(worker_id)
    .bind(document_url)
    .bind(notes)
    .bind(&now)
    .bind(&now)
    .execute(executor)
    .await?;

    Ok(id)
}

pub async fn create_verification(
    pool: &DbPool,
    worker_id: &str,
    document_url: &str,
    notes: Option<&str>,
) -> Result<VerificationRequest, sqlx::Error> {
    let id = insert_verification(pool, worker_id, document_url, notes).await?;
    get_verification(pool, &id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

/// Crea la richiesta e il pagamento della quota in un'unica transazione.
/// Una seconda richiesta aperta dello stesso lavoratore viola l'indice univoco.
pub async fn create_with_fee(
    pool: &DbPool,
    worker_id: &str,
    document_url: &str,
    notes: Option<&str>,
    fee_cents: i64,
) -> Result<(VerificationRequest, PaymentTransaction), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let id = insert_verification(&mut *tx, worker_id, document_url, notes).await?;
    let payment_id = payments::insert_payment(
        &mut *tx,
        &NewPayment {
            kind: PaymentKind::VerificationFee,
            payer_id: worker_id,
            payee_id: None,
            job_id: None,
            verification_id: Some(&id),
            amount_cents: fee_cents,
        },
    )
    .await?;

    tx.commit().await?;

    let verification = get_verification(pool, &id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    let payment = payments::get_payment(pool, &payment_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    Ok((verification, payment))
}

pub async fn get_verification(
    pool: &DbPool,
    id: &str,
) -> Result<Option<VerificationRequest>, sqlx::Error> {
    sqlx::query_as::<_, VerificationRequest>(&format!(
        "SELECT {} FROM verification_requests WHERE id = ?",
        VERIFICATION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Ultima richiesta del lavoratore
pub async fn latest_for_worker(
    pool: &DbPool,
    worker_id: &str,
) -> Result<Option<VerificationRequest>, sqlx::Error> {
    sqlx::query_as::<_, VerificationRequest>(&format!(
        r#"
        SELECT {} FROM verification_requests
        WHERE worker_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT 1
        "#,
        VERIFICATION_COLUMNS
    ))
    .bind(worker_id)
    .fetch_optional(pool)
    .await
}

/// Il lavoratore ha gia' una richiesta in attesa di pagamento o di revisione
pub async fn has_open(pool: &DbPool, worker_id: &str) -> Result<bool, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM verification_requests
        WHERE worker_id = ? AND status IN ('awaiting_payment', 'pending_review')
        "#,
    )
    .bind(worker_id)
    .fetch_one(pool)
    .await?;
    Ok(row.0 > 0)
}

/// Quota pagata: la richiesta passa in revisione
pub async fn mark_paid<'e, E>(executor: E, id: &str) -> Result<bool, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE verification_requests SET status = 'pending_review', updated_at = ?
        WHERE id = ? AND status = 'awaiting_payment'
        "#,
    )
    .bind(now())
    .bind(id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Pagamento annullato: la richiesta viene chiusa come rifiutata
pub async fn abandon<'e, E>(executor: E, id: &str) -> Result<bool, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE verification_requests
        SET status = 'rejected', rejection_reason = 'Pagamento annullato', updated_at = ?
        WHERE id = ? AND status = 'awaiting_payment'
        "#,
    )
    .bind(now())
    .bind(id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Decisione dell'admin su una richiesta in revisione.
/// In caso di approvazione il lavoratore diventa verificato nella stessa transazione.
pub async fn decide(
    pool: &DbPool,
    id: &str,
    admin_id: &str,
    approved: bool,
    reason: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let status = if approved {
        VerificationStatus::Approved
    } else {
        VerificationStatus::Rejected
    };
    let now = now();

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE verification_requests
        SET status = ?, rejection_reason = ?, reviewed_by = ?, reviewed_at = ?, updated_at = ?
        WHERE id = ? AND status = 'pending_review'
        "#,
    )
    .bind(status.as_str())
    .bind(reason)
    .bind(admin_id)
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    if approved {
        sqlx::query(
            r#"
            UPDATE users SET is_verified = 1, updated_at = ?
            WHERE id = (SELECT worker_id FROM verification_requests WHERE id = ?)
            "#,
        )
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

pub async fn list_verifications(
    pool: &DbPool,
    query: &VerificationsQuery,
    page: Pagination,
) -> Result<(Vec<VerificationRequest>, i64), sqlx::Error> {
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM verification_requests WHERE 1=1");
    if let Some(status) = query.status {
        count.push(" AND status = ").push_bind(status.as_str());
    }
    let total: (i64,) = count.build_query_as().fetch_one(pool).await?;

    let mut data = QueryBuilder::new(format!(
        "SELECT {} FROM verification_requests WHERE 1=1",
        VERIFICATION_COLUMNS
    ));
    if let Some(status) = query.status {
        data.push(" AND status = ").push_bind(status.as_str());
    }
    // Le richieste piu' vecchie vengono esaminate per prime
    data.push(" ORDER BY created_at ASC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let items = data
        .build_query_as::<VerificationRequest>()
        .fetch_all(pool)
        .await?;
    Ok((items, total.0))
}

pub async fn count_pending_review(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM verification_requests WHERE status = 'pending_review'")
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_support, users};
    use crate::models::Role;

    #[tokio::test]
    async fn test_decision_requires_payment() {
        let pool = test_support::pool().await;
        let worker = test_support::user(&pool, "w@w.it", Role::Worker).await;
        let admin = test_support::user(&pool, "a@w.it", Role::Admin).await;

        let request = create_verification(&pool, &worker, "https://doc.example/1.pdf", None)
            .await
            .unwrap();
        assert_eq!(request.status, VerificationStatus::AwaitingPayment);
        assert!(has_open(&pool, &worker).await.unwrap());

        // Non ancora pagata: l'admin non puo' decidere
        assert!(!decide(&pool, &request.id, &admin, true, None).await.unwrap());

        assert!(mark_paid(&pool, &request.id).await.unwrap());
        assert_eq!(count_pending_review(&pool).await.unwrap(), 1);
        assert!(decide(&pool, &request.id, &admin, true, None).await.unwrap());
        // Una seconda decisione non ha effetto
        assert!(!decide(&pool, &request.id, &admin, false, Some("no")).await.unwrap());

        let stored = latest_for_worker(&pool, &worker).await.unwrap().unwrap();
        assert_eq!(stored.status, VerificationStatus::Approved);
        assert_eq!(stored.reviewed_by.as_deref(), Some(admin.as_str()));
        assert!(!has_open(&pool, &worker).await.unwrap());

        let user = users::find_by_id(&pool, &worker).await.unwrap().unwrap();
        assert!(user.is_verified);
    }

    #[tokio::test]
    async fn test_request_with_fee_is_atomic() {
        let pool = test_support::pool().await;
        let worker = test_support::user(&pool, "w@w.it", Role::Worker).await;

        let (request, fee) =
            create_with_fee(&pool, &worker, "https://doc.example/1.pdf", None, 1500)
                .await
                .unwrap();
        assert_eq!(fee.verification_id.as_deref(), Some(request.id.as_str()));
        assert_eq!(fee.amount_cents, 1500);

        // Seconda richiesta aperta: nessuna riga lasciata a meta'
        let err = create_with_fee(&pool, &worker, "https://doc.example/2.pdf", None, 1500)
            .await
            .unwrap_err();
        assert!(err
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation()));
        let (payments,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM payments")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(payments, 1);

        // La conferma della quota porta la richiesta in revisione
        assert_eq!(
            payments::confirm_payment(&pool, &fee.id, "ref-1", Some(&request.id))
                .await
                .unwrap(),
            payments::ConfirmOutcome::Confirmed
        );
        let stored = get_verification(&pool, &request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, VerificationStatus::PendingReview);
    }

    #[tokio::test]
    async fn test_cancelled_fee_abandons_request() {
        let pool = test_support::pool().await;
        let worker = test_support::user(&pool, "w@w.it", Role::Worker).await;

        let (request, fee) =
            create_with_fee(&pool, &worker, "https://doc.example/1.pdf", None, 1500)
                .await
                .unwrap();
        assert!(payments::cancel_payment(&pool, &fee.id, Some(&request.id))
            .await
            .unwrap());

        let stored = get_verification(&pool, &request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, VerificationStatus::Rejected);
        assert!(!has_open(&pool, &worker).await.unwrap());
        // Il lavoratore puo' ripresentare la richiesta
        assert!(create_with_fee(&pool, &worker, "https://doc.example/2.pdf", None, 1500)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_rejection_keeps_worker_unverified() {
        let pool = test_support::pool().await;
        let worker = test_support::user(&pool, "w@w.it", Role::Worker).await;
        let admin = test_support::user(&pool, "a@w.it", Role::Admin).await;

        let request = create_verification(&pool, &worker, "https://doc.example/2.pdf", Some("note"))
            .await
            .unwrap();
        mark_paid(&pool, &request.id).await.unwrap();
        assert!(decide(&pool, &request.id, &admin, false, Some("Documento illeggibile"))
            .await
            .unwrap());

        let stored = get_verification(&pool, &request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, VerificationStatus::Rejected);
        assert_eq!(stored.rejection_reason.as_deref(), Some("Documento illeggibile"));

        let user = users::find_by_id(&pool, &worker).await.unwrap().unwrap();
        assert!(!user.is_verified);

        let query = VerificationsQuery {
            status: Some(VerificationStatus::Rejected),
            ..Default::default()
        };
        let (items, total) = list_verifications(&pool, &query, Pagination::new(None, None))
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].id, request.id);
    }
}
