use super::{new_id, now, DbPool};
use crate::models::{ChatMessage, Pagination};

/// Nuovo messaggio nella conversazione (job, lavoratore)
pub struct NewMessage<'a> {
    pub job_id: &'a str,
    pub worker_id: &'a str,
    pub sender_id: &'a str,
    pub recipient_id: &'a str,
    pub body: &'a str,
}

pub async fn insert_message(
    pool: &DbPool,
    message: &NewMessage<'_>,
) -> Result<ChatMessage, sqlx::Error> {
    let id = new_id();

    sqlx::query(
        r#"
        INSERT INTO messages (id, job_id, worker_id, sender_id, recipient_id, body, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(message.job_id)
    .bind(message.worker_id)
    .bind(message.sender_id)
    .bind(message.recipient_id)
    .bind(message.body)
    .bind(now())
    .execute(pool)
    .await?;

    sqlx::query_as::<_, ChatMessage>("SELECT * FROM messages WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await
}

/// Messaggi di una conversazione, dal piu' vecchio
pub async fn list_conversation(
    pool: &DbPool,
    job_id: &str,
    worker_id: &str,
    page: Pagination,
) -> Result<(Vec<ChatMessage>, i64), sqlx::Error> {
    let total: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM messages WHERE job_id = ? AND worker_id = ?")
            .bind(job_id)
            .bind(worker_id)
            .fetch_one(pool)
            .await?;

    let items = sqlx::query_as::<_, ChatMessage>(
        r#"
        SELECT * FROM messages
        WHERE job_id = ? AND worker_id = ?
        ORDER BY created_at ASC, rowid ASC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok((items, total.0))
}

/// Segna come letti i messaggi indirizzati all'utente nella conversazione
pub async fn mark_read(
    pool: &DbPool,
    job_id: &str,
    worker_id: &str,
    recipient_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE messages SET read_at = ?
        WHERE job_id = ? AND worker_id = ? AND recipient_id = ? AND read_at IS NULL
        "#,
    )
    .bind(now())
    .bind(job_id)
    .bind(worker_id)
    .bind(recipient_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn unread_count(pool: &DbPool, recipient_id: &str) -> Result<i64, sqlx::Error> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM messages WHERE recipient_id = ? AND read_at IS NULL")
            .bind(recipient_id)
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{jobs, test_support};
    use crate::models::{CreateJobRequest, Role};

    #[tokio::test]
    async fn test_conversation_and_read_marks() {
        let pool = test_support::pool().await;
        let customer = test_support::user(&pool, "c@w.it", Role::Customer).await;
        let worker = test_support::user(&pool, "w@w.it", Role::Worker).await;
        let other = test_support::user(&pool, "o@w.it", Role::Worker).await;
        let job = jobs::create_job(
            &pool,
            &customer,
            &CreateJobRequest {
                title: "Chat".to_string(),
                description: "x".to_string(),
                category: "casa".to_string(),
                budget_cents: 1000,
                location: None,
                scheduled_for: None,
            },
        )
        .await
        .unwrap();

        for body in ["Ciao", "Quando sei disponibile?"] {
            insert_message(
                &pool,
                &NewMessage {
                    job_id: &job.id,
                    worker_id: &worker,
                    sender_id: &customer,
                    recipient_id: &worker,
                    body,
                },
            )
            .await
            .unwrap();
        }
        insert_message(
            &pool,
            &NewMessage {
                job_id: &job.id,
                worker_id: &other,
                sender_id: &customer,
                recipient_id: &other,
                body: "Altra conversazione",
            },
        )
        .await
        .unwrap();

        let (items, total) = list_conversation(&pool, &job.id, &worker, Pagination::new(None, None))
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(items[0].body, "Ciao");

        assert_eq!(unread_count(&pool, &worker).await.unwrap(), 2);
        // Il mittente non puo' segnare come letti i propri messaggi
        assert_eq!(mark_read(&pool, &job.id, &worker, &customer).await.unwrap(), 0);
        assert_eq!(mark_read(&pool, &job.id, &worker, &worker).await.unwrap(), 2);
        assert_eq!(unread_count(&pool, &worker).await.unwrap(), 0);
        assert_eq!(unread_count(&pool, &other).await.unwrap(), 1);
    }
}
