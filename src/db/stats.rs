use super::{jobs, payments, verifications, DbPool};
use crate::models::{AdminStats, CountByKey, PublicSummary, VolumeByKind};

/// Contatori pubblici della piattaforma
pub async fn public_summary(pool: &DbPool) -> Result<PublicSummary, sqlx::Error> {
    let row: (i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM jobs WHERE status IN ('open', 'requested')),
            (SELECT COUNT(*) FROM jobs WHERE status = 'done'),
            (SELECT COUNT(*) FROM users WHERE role = 'worker' AND is_active = 1),
            (SELECT COUNT(*) FROM users WHERE role = 'worker' AND is_active = 1 AND is_verified = 1)
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(PublicSummary {
        open_jobs: row.0,
        completed_jobs: row.1,
        workers: row.2,
        verified_workers: row.3,
    })
}

/// Statistiche aggregate per il pannello admin
pub async fn admin_stats(pool: &DbPool) -> Result<AdminStats, sqlx::Error> {
    let users_by_role: Vec<(String, i64)> =
        sqlx::query_as("SELECT role, COUNT(*) FROM users GROUP BY role ORDER BY role")
            .fetch_all(pool)
            .await?;

    let jobs_by_status = jobs::count_by_status(pool).await?;
    let volume = payments::completed_volume(pool).await?;
    let pending_verifications = verifications::count_pending_review(pool).await?;

    Ok(AdminStats {
        users_by_role: to_counts(users_by_role),
        jobs_by_status: to_counts(jobs_by_status),
        completed_payments: volume
            .into_iter()
            .map(|(kind, transactions, amount_cents)| VolumeByKind {
                kind,
                transactions,
                amount_cents,
            })
            .collect(),
        pending_verifications,
    })
}

fn to_counts(rows: Vec<(String, i64)>) -> Vec<CountByKey> {
    rows.into_iter()
        .map(|(key, count)| CountByKey { key, count })
        .collect()
}
