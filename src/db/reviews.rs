use super::{new_id, now, DbPool};
use crate::models::{Pagination, Review, ReviewSummary};

const REVIEW_SELECT: &str = r#"
    SELECT r.id, r.job_id, r.reviewer_id, u.name AS reviewer_name, r.reviewee_id,
           r.rating, r.comment, r.created_at
    FROM reviews r
    JOIN users u ON u.id = r.reviewer_id
"#;

pub async fn create_review(
    pool: &DbPool,
    job_id: &str,
    reviewer_id: &str,
    reviewee_id: &str,
    rating: i64,
    comment: Option<&str>,
) -> Result<Review, sqlx::Error> {
    let id = new_id();

    sqlx::query(
        r#"
        INSERT INTO reviews (id, job_id, reviewer_id, reviewee_id, rating, comment, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(job_id)
    .bind(reviewer_id)
    .bind(reviewee_id)
    .bind(rating)
    .bind(comment)
    .bind(now())
    .execute(pool)
    .await?;

    get_review(pool, &id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn get_review(pool: &DbPool, id: &str) -> Result<Option<Review>, sqlx::Error> {
    sqlx::query_as::<_, Review>(&format!("{} WHERE r.id = ?", REVIEW_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Verifica se l'utente ha gia' recensito il job
pub async fn exists_for(pool: &DbPool, job_id: &str, reviewer_id: &str) -> Result<bool, sqlx::Error> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM reviews WHERE job_id = ? AND reviewer_id = ?")
            .bind(job_id)
            .bind(reviewer_id)
            .fetch_one(pool)
            .await?;
    Ok(row.0 > 0)
}

/// Recensioni ricevute da un utente, piu' recenti prima
pub async fn list_for_user(
    pool: &DbPool,
    reviewee_id: &str,
    page: Pagination,
) -> Result<(Vec<Review>, i64), sqlx::Error> {
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reviews WHERE reviewee_id = ?")
        .bind(reviewee_id)
        .fetch_one(pool)
        .await?;

    let reviews = sqlx::query_as::<_, Review>(&format!(
        "{} WHERE r.reviewee_id = ? ORDER BY r.created_at DESC LIMIT ? OFFSET ?",
        REVIEW_SELECT
    ))
    .bind(reviewee_id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok((reviews, total.0))
}

pub async fn list_for_job(pool: &DbPool, job_id: &str) -> Result<Vec<Review>, sqlx::Error> {
    sqlx::query_as::<_, Review>(&format!(
        "{} WHERE r.job_id = ? ORDER BY r.created_at ASC",
        REVIEW_SELECT
    ))
    .bind(job_id)
    .fetch_all(pool)
    .await
}

/// Media e numero delle recensioni ricevute
pub async fn summary(pool: &DbPool, reviewee_id: &str) -> Result<ReviewSummary, sqlx::Error> {
    let row: (Option<f64>, i64) = sqlx::query_as(
        "SELECT AVG(CAST(rating AS REAL)), COUNT(*) FROM reviews WHERE reviewee_id = ?",
    )
    .bind(reviewee_id)
    .fetch_one(pool)
    .await?;

    Ok(ReviewSummary {
        average_rating: row.0.map(|avg| (avg * 100.0).round() / 100.0),
        review_count: row.1,
    })
}

pub async fn delete_review(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM reviews WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{jobs, test_support};
    use crate::models::{CreateJobRequest, Role};

    #[tokio::test]
    async fn test_summary_and_uniqueness() {
        let pool = test_support::pool().await;
        let customer = test_support::user(&pool, "c@w.it", Role::Customer).await;
        let worker = test_support::user(&pool, "w@w.it", Role::Worker).await;

        let empty = summary(&pool, &worker).await.unwrap();
        assert_eq!(empty.review_count, 0);
        assert!(empty.average_rating.is_none());

        let mut job_ids = Vec::new();
        for title in ["Uno", "Due"] {
            let job = jobs::create_job(
                &pool,
                &customer,
                &CreateJobRequest {
                    title: title.to_string(),
                    description: "x".to_string(),
                    category: "casa".to_string(),
                    budget_cents: 1000,
                    location: None,
                    scheduled_for: None,
                },
            )
            .await
            .unwrap();
            job_ids.push(job.id);
        }

        create_review(&pool, &job_ids[0], &customer, &worker, 5, Some("Ottimo"))
            .await
            .unwrap();
        create_review(&pool, &job_ids[1], &customer, &worker, 4, None)
            .await
            .unwrap();

        // Seconda recensione sullo stesso job: vincolo UNIQUE
        assert!(create_review(&pool, &job_ids[0], &customer, &worker, 1, None)
            .await
            .is_err());
        assert!(exists_for(&pool, &job_ids[0], &customer).await.unwrap());

        let s = summary(&pool, &worker).await.unwrap();
        assert_eq!(s.review_count, 2);
        assert_eq!(s.average_rating, Some(4.5));

        let (items, total) = list_for_user(&pool, &worker, Pagination::new(None, None))
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(items[0].reviewer_name, "c");

        assert!(delete_review(&pool, &items[0].id).await.unwrap());
        assert_eq!(summary(&pool, &worker).await.unwrap().review_count, 1);
    }
}
