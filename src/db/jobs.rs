//! Modulo per la gestione dei job nel database
//!
//! Ogni cambio di stato e' un compare-and-set sullo stato atteso: se un'altra
//! richiesta ha modificato il job nel frattempo l'UPDATE non tocca righe e la
//! funzione restituisce `false`.

use sqlx::QueryBuilder;

use super::{new_id, now, to_db_time, DbPool};
use crate::models::{
    CreateJobRequest, Job, JobRequest, JobStatus, JobsQuery, Pagination, UpdateJobRequest,
};

const JOB_COLUMNS: &str = r#"
    id, customer_id, title, description, category, budget_cents, location,
    scheduled_for, status, assigned_worker_id, failure_reason,
    (SELECT COUNT(*) FROM job_requests r WHERE r.job_id = jobs.id) AS request_count,
    created_at, updated_at, started_at, completed_at
"#;

/// Esito del ritiro di una candidatura o della rinuncia a un job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Nessuna candidatura/assegnazione da rimuovere
    NotFound,
    /// Lo stato del job e' cambiato nel frattempo
    Conflict,
    /// Operazione riuscita; nuovo stato del job
    Updated(JobStatus),
}

/// Crea un nuovo job nel database
pub async fn create_job(
    pool: &DbPool,
    customer_id: &str,
    request: &CreateJobRequest,
) -> Result<Job, sqlx::Error> {
    let id = new_id();
    let now = now();

    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, customer_id, title, description, category, budget_cents,
            location, scheduled_for, status, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'open', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(customer_id)
    .bind(request.title.trim())
    .bind(request.description.trim())
    .bind(request.category.trim().to_lowercase())
    .bind(request.budget_cents)
    .bind(request.location.as_deref().map(str::trim))
    .bind(request.scheduled_for.as_ref().map(to_db_time))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    get_job(pool, &id).await?.ok_or(sqlx::Error::RowNotFound)
}

/// Ottieni un job per ID
pub async fn get_job(pool: &DbPool, id: &str) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
}

fn push_job_filters<'a>(builder: &mut QueryBuilder<'a, sqlx::Sqlite>, query: &'a JobsQuery) {
    match query.status {
        Some(status) => {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        None => {
            builder.push(" AND status IN ('open', 'requested')");
        }
    }
    if let Some(ref category) = query.category {
        builder
            .push(" AND category = ")
            .push_bind(category.trim().to_lowercase());
    }
    if let Some(ref q) = query.q {
        let pattern = format!("%{}%", q.trim().to_lowercase());
        builder
            .push(" AND (lower(title) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR lower(description) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(ref location) = query.location {
        builder
            .push(" AND lower(location) LIKE ")
            .push_bind(format!("%{}%", location.trim().to_lowercase()));
    }
    if let Some(min) = query.min_budget {
        builder.push(" AND budget_cents >= ").push_bind(min);
    }
    if let Some(max) = query.max_budget {
        builder.push(" AND budget_cents <= ").push_bind(max);
    }
}

/// Lista job con filtri e paginazione
pub async fn list_jobs(
    pool: &DbPool,
    query: &JobsQuery,
    page: Pagination,
) -> Result<(Vec<Job>, i64), sqlx::Error> {
    // Query per il conteggio totale
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM jobs WHERE 1=1");
    push_job_filters(&mut count, query);
    let total: (i64,) = count.build_query_as().fetch_one(pool).await?;

    // Query per i dati
    let mut data = QueryBuilder::new(format!("SELECT {} FROM jobs WHERE 1=1", JOB_COLUMNS));
    push_job_filters(&mut data, query);
    data.push(" ORDER BY ")
        .push(query.sort.order_by())
        .push(" LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let jobs = data.build_query_as::<Job>().fetch_all(pool).await?;
    Ok((jobs, total.0))
}

/// Job pubblicati da un cliente
pub async fn list_customer_jobs(
    pool: &DbPool,
    customer_id: &str,
    page: Pagination,
) -> Result<(Vec<Job>, i64), sqlx::Error> {
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE customer_id = ?")
        .bind(customer_id)
        .fetch_one(pool)
        .await?;

    let jobs = sqlx::query_as::<_, Job>(&format!(
        "SELECT {} FROM jobs WHERE customer_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        JOB_COLUMNS
    ))
    .bind(customer_id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok((jobs, total.0))
}

/// Job a cui un lavoratore e' candidato o assegnato
pub async fn list_worker_jobs(
    pool: &DbPool,
    worker_id: &str,
    page: Pagination,
) -> Result<(Vec<Job>, i64), sqlx::Error> {
    let condition = r#"
        assigned_worker_id = ?
        OR EXISTS (SELECT 1 FROM job_requests r WHERE r.job_id = jobs.id AND r.worker_id = ?)
    "#;

    let total: (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM jobs WHERE {}",
        condition
    ))
    .bind(worker_id)
    .bind(worker_id)
    .fetch_one(pool)
    .await?;

    let jobs = sqlx::query_as::<_, Job>(&format!(
        "SELECT {} FROM jobs WHERE {} ORDER BY updated_at DESC LIMIT ? OFFSET ?",
        JOB_COLUMNS, condition
    ))
    .bind(worker_id)
    .bind(worker_id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok((jobs, total.0))
}

/// Aggiorna i dettagli di un job ancora aperto a candidature
pub async fn update_job(
    pool: &DbPool,
    id: &str,
    update: &UpdateJobRequest,
) -> Result<bool, sqlx::Error> {
    let mut builder = QueryBuilder::new("UPDATE jobs SET updated_at = ");
    builder.push_bind(now());

    if let Some(ref title) = update.title {
        builder.push(", title = ").push_bind(title.trim().to_string());
    }
    if let Some(ref description) = update.description {
        builder
            .push(", description = ")
            .push_bind(description.trim().to_string());
    }
    if let Some(ref category) = update.category {
        builder
            .push(", category = ")
            .push_bind(category.trim().to_lowercase());
    }
    if let Some(budget) = update.budget_cents {
        builder.push(", budget_cents = ").push_bind(budget);
    }
    if let Some(ref location) = update.location {
        builder
            .push(", location = ")
            .push_bind(location.trim().to_string());
    }
    if let Some(ref scheduled_for) = update.scheduled_for {
        builder
            .push(", scheduled_for = ")
            .push_bind(to_db_time(scheduled_for));
    }

    builder
        .push(" WHERE id = ")
        .push_bind(id)
        .push(" AND status IN ('open', 'requested')");

    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Elimina un job (candidature, messaggi e recensioni in cascata)
pub async fn delete_job(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Elimina un job solo se e' ancora nello stato atteso
pub async fn delete_job_if_status(
    pool: &DbPool,
    id: &str,
    expected: JobStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND status = ?")
        .bind(id)
        .bind(expected.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Cambio di stato compare-and-set; imposta started_at/completed_at in base
/// allo stato di arrivo
pub async fn transition(
    pool: &DbPool,
    id: &str,
    from: JobStatus,
    to: JobStatus,
    failure_reason: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let now = now();

    let mut builder = QueryBuilder::new("UPDATE jobs SET status = ");
    builder.push_bind(to.as_str());
    builder.push(", updated_at = ").push_bind(now.clone());

    if to == JobStatus::InProgress {
        builder.push(", started_at = ").push_bind(now.clone());
    }
    if to.is_terminal() {
        builder.push(", completed_at = ").push_bind(now);
    }
    if let Some(reason) = failure_reason {
        builder.push(", failure_reason = ").push_bind(reason);
    }

    builder
        .push(" WHERE id = ")
        .push_bind(id)
        .push(" AND status = ")
        .push_bind(from.as_str());

    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Registra la candidatura e porta il job in `requested`
pub async fn add_request(
    pool: &DbPool,
    job_id: &str,
    worker_id: &str,
    message: Option<&str>,
    from: JobStatus,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE jobs SET status = 'requested', updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(now())
    .bind(job_id)
    .bind(from.as_str())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO job_requests (job_id, worker_id, message, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(message)
    .bind(now())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Rimuove una candidatura; se era l'ultima il job torna `open`
pub async fn withdraw_request(
    pool: &DbPool,
    job_id: &str,
    worker_id: &str,
) -> Result<ReleaseOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query(
        r#"
        DELETE FROM job_requests
        WHERE job_id = ? AND worker_id = ?
        AND EXISTS (SELECT 1 FROM jobs WHERE id = ? AND status = 'requested')
        "#,
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(job_id)
    .execute(&mut *tx)
    .await?;

    if deleted.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(ReleaseOutcome::NotFound);
    }

    let outcome = settle_after_removal(&mut tx, job_id, JobStatus::Requested, None).await?;
    match outcome {
        ReleaseOutcome::Updated(_) => tx.commit().await?,
        _ => tx.rollback().await?,
    }
    Ok(outcome)
}

/// Il lavoratore assegnato rinuncia: la sua candidatura viene rimossa e il job
/// torna `requested` o `open` a seconda delle candidature rimaste
pub async fn release_assignment(
    pool: &DbPool,
    job_id: &str,
    worker_id: &str,
) -> Result<ReleaseOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM job_requests WHERE job_id = ? AND worker_id = ?")
        .bind(job_id)
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;

    let outcome =
        settle_after_removal(&mut tx, job_id, JobStatus::Assigned, Some(worker_id)).await?;
    match outcome {
        ReleaseOutcome::Updated(_) => tx.commit().await?,
        _ => tx.rollback().await?,
    }
    Ok(outcome)
}

async fn settle_after_removal(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    job_id: &str,
    from: JobStatus,
    assigned_worker: Option<&str>,
) -> Result<ReleaseOutcome, sqlx::Error> {
    let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_requests WHERE job_id = ?")
        .bind(job_id)
        .fetch_one(&mut **tx)
        .await?;

    let to = if remaining.0 == 0 {
        JobStatus::Open
    } else {
        JobStatus::Requested
    };

    let mut builder = QueryBuilder::new("UPDATE jobs SET status = ");
    builder
        .push_bind(to.as_str())
        .push(", assigned_worker_id = NULL, updated_at = ")
        .push_bind(now())
        .push(" WHERE id = ")
        .push_bind(job_id)
        .push(" AND status = ")
        .push_bind(from.as_str());
    if let Some(worker_id) = assigned_worker {
        builder.push(" AND assigned_worker_id = ").push_bind(worker_id);
    }

    let updated = builder.build().execute(&mut **tx).await?;
    if updated.rows_affected() == 0 {
        return Ok(ReleaseOutcome::Conflict);
    }
    Ok(ReleaseOutcome::Updated(to))
}

/// Assegna il job a un lavoratore che si e' candidato
pub async fn assign_worker(
    pool: &DbPool,
    job_id: &str,
    worker_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs SET status = 'assigned', assigned_worker_id = ?, updated_at = ?
        WHERE id = ? AND status = 'requested'
        AND EXISTS (SELECT 1 FROM job_requests WHERE job_id = ? AND worker_id = ?)
        "#,
    )
    .bind(worker_id)
    .bind(now())
    .bind(job_id)
    .bind(job_id)
    .bind(worker_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Candidature di un job con nome e stato di verifica del lavoratore
pub async fn list_requests(pool: &DbPool, job_id: &str) -> Result<Vec<JobRequest>, sqlx::Error> {
    sqlx::query_as::<_, JobRequest>(
        r#"
        SELECT r.job_id, r.worker_id, u.name AS worker_name, u.is_verified AS worker_verified,
               r.message, r.created_at
        FROM job_requests r
        JOIN users u ON u.id = r.worker_id
        WHERE r.job_id = ?
        ORDER BY r.created_at ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
}

pub async fn has_request(pool: &DbPool, job_id: &str, worker_id: &str) -> Result<bool, sqlx::Error> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM job_requests WHERE job_id = ? AND worker_id = ?")
            .bind(job_id)
            .bind(worker_id)
            .fetch_one(pool)
            .await?;
    Ok(row.0 > 0)
}

/// Conta i job per stato
pub async fn count_by_status(pool: &DbPool) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status ORDER BY status")
        .fetch_all(pool)
        .await
}
