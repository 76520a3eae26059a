use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use utoipa::{IntoParams, ToSchema};

use super::PaymentTransaction;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    AwaitingPayment,
    PendingReview,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::AwaitingPayment => "awaiting_payment",
            VerificationStatus::PendingReview => "pending_review",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
        }
    }

    /// Richiesta ancora in corso (blocca l'apertura di una nuova)
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            VerificationStatus::AwaitingPayment | VerificationStatus::PendingReview
        )
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_payment" => Ok(VerificationStatus::AwaitingPayment),
            "pending_review" => Ok(VerificationStatus::PendingReview),
            "approved" => Ok(VerificationStatus::Approved),
            "rejected" => Ok(VerificationStatus::Rejected),
            other => Err(format!("stato verifica sconosciuto: {}", other)),
        }
    }
}

/// Richiesta di verifica di un lavoratore
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VerificationRequest {
    pub id: String,
    pub worker_id: String,
    pub status: VerificationStatus,
    pub document_url: String,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, SqliteRow> for VerificationRequest {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            worker_id: row.try_get("worker_id")?,
            status: status.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            document_url: row.try_get("document_url")?,
            notes: row.try_get("notes")?,
            rejection_reason: row.try_get("rejection_reason")?,
            reviewed_by: row.try_get("reviewed_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            reviewed_at: row.try_get("reviewed_at")?,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateVerificationRequest {
    /// URL del documento caricato dal lavoratore
    pub document_url: String,
    pub notes: Option<String>,
}

/// Richiesta creata insieme al pagamento della quota
#[derive(Debug, Serialize, ToSchema)]
pub struct VerificationCreatedResponse {
    pub verification: VerificationRequest,
    pub payment: PaymentTransaction,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RejectVerificationRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VerificationsQuery {
    pub status: Option<VerificationStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
