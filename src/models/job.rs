use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use utoipa::{IntoParams, ToSchema};

use crate::error::AppError;

/// Stato di un job nel suo ciclo di vita
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Open,
    Requested,
    Assigned,
    InProgress,
    Done,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Open,
        JobStatus::Requested,
        JobStatus::Assigned,
        JobStatus::InProgress,
        JobStatus::Done,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Open => "open",
            JobStatus::Requested => "requested",
            JobStatus::Assigned => "assigned",
            JobStatus::InProgress => "in-progress",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Il job accetta ancora candidature e modifiche dal cliente
    pub fn is_accepting_requests(&self) -> bool {
        matches!(self, JobStatus::Open | JobStatus::Requested)
    }

    /// Calcola lo stato successivo, o l'errore se l'azione non e' consentita
    pub fn apply(self, action: JobAction) -> Result<JobStatus, AppError> {
        use JobAction::*;
        use JobStatus::*;

        let next = match (self, action) {
            (Open | Requested, Request) => Some(Requested),
            (Requested, Withdraw { remaining: 0 }) => Some(Open),
            (Requested, Withdraw { .. }) => Some(Requested),
            (Requested, Assign) => Some(Assigned),
            (Assigned, Start) => Some(InProgress),
            (Assigned, Release { remaining: 0 }) => Some(Open),
            (Assigned, Release { .. }) => Some(Requested),
            (InProgress, Complete) => Some(Done),
            (Assigned | InProgress, Fail) => Some(Failed),
            _ => None,
        };

        next.ok_or_else(|| AppError::InvalidTransition {
            from: self.to_string(),
            action: action.to_string(),
        })
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(JobStatus::Open),
            "requested" => Ok(JobStatus::Requested),
            "assigned" => Ok(JobStatus::Assigned),
            "in-progress" | "in_progress" => Ok(JobStatus::InProgress),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("stato job sconosciuto: {}", other)),
        }
    }
}

/// Azioni che muovono un job tra gli stati
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    /// Un lavoratore si candida
    Request,
    /// Un lavoratore ritira la candidatura; `remaining` conta le candidature rimaste
    Withdraw { remaining: usize },
    Assign,
    Start,
    /// Il lavoratore assegnato rinuncia prima di iniziare; `remaining` conta
    /// le candidature degli altri lavoratori
    Release { remaining: usize },
    Complete,
    Fail,
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobAction::Request => "request",
            JobAction::Withdraw { .. } => "withdraw",
            JobAction::Assign => "assign",
            JobAction::Start => "start",
            JobAction::Release { .. } => "release",
            JobAction::Complete => "complete",
            JobAction::Fail => "fail",
        };
        f.write_str(name)
    }
}

/// Job pubblicato da un cliente
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Job {
    pub id: String,
    pub customer_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub budget_cents: i64,
    pub location: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub assigned_worker_id: Option<String>,
    pub failure_reason: Option<String>,
    pub request_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, SqliteRow> for Job {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            budget_cents: row.try_get("budget_cents")?,
            location: row.try_get("location")?,
            scheduled_for: row.try_get("scheduled_for")?,
            status: status.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            assigned_worker_id: row.try_get("assigned_worker_id")?,
            failure_reason: row.try_get("failure_reason")?,
            request_count: row.try_get("request_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

/// Candidatura di un lavoratore a un job
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct JobRequest {
    pub job_id: String,
    pub worker_id: String,
    pub worker_name: String,
    pub worker_verified: bool,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Dettaglio job; le candidature sono visibili solo al proprietario e agli admin
#[derive(Debug, Serialize, ToSchema)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<Vec<JobRequest>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateJobRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    /// Compenso in centesimi
    pub budget_cents: i64,
    pub location: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateJobRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub budget_cents: Option<i64>,
    pub location: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ApplyJobRequest {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignJobRequest {
    pub worker_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FailJobRequest {
    pub reason: String,
}

/// Ordinamento della lista job
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobSort {
    #[default]
    Newest,
    Oldest,
    BudgetAsc,
    BudgetDesc,
}

impl JobSort {
    pub fn order_by(&self) -> &'static str {
        match self {
            JobSort::Newest => "created_at DESC",
            JobSort::Oldest => "created_at ASC",
            JobSort::BudgetAsc => "budget_cents ASC, created_at DESC",
            JobSort::BudgetDesc => "budget_cents DESC, created_at DESC",
        }
    }
}

/// Filtri della lista job
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct JobsQuery {
    /// Stato; se assente vengono mostrati i job open e requested
    pub status: Option<JobStatus>,
    pub category: Option<String>,
    /// Testo cercato in titolo e descrizione
    pub q: Option<String>,
    pub location: Option<String>,
    pub min_budget: Option<i64>,
    pub max_budget: Option<i64>,
    #[serde(default)]
    pub sort: JobSort,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
