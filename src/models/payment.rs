use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    VerificationFee,
    JobPayment,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::VerificationFee => "verification_fee",
            PaymentKind::JobPayment => "job_payment",
        }
    }
}

impl std::str::FromStr for PaymentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verification_fee" => Ok(PaymentKind::VerificationFee),
            "job_payment" => Ok(PaymentKind::JobPayment),
            other => Err(format!("tipo pagamento sconosciuto: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("stato pagamento sconosciuto: {}", other)),
        }
    }
}

/// Transazione di pagamento
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentTransaction {
    pub id: String,
    pub kind: PaymentKind,
    pub status: PaymentStatus,
    pub payer_id: String,
    /// Assente per le quote di verifica (incassate dalla piattaforma)
    pub payee_id: Option<String>,
    pub job_id: Option<String>,
    pub verification_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, SqliteRow> for PaymentTransaction {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            kind: kind.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            status: status.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            payer_id: row.try_get("payer_id")?,
            payee_id: row.try_get("payee_id")?,
            job_id: row.try_get("job_id")?,
            verification_id: row.try_get("verification_id")?,
            amount_cents: row.try_get("amount_cents")?,
            currency: row.try_get("currency")?,
            provider_reference: row.try_get("provider_reference")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    /// Riferimento della transazione presso il provider
    pub provider_reference: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaymentsQuery {
    pub status: Option<PaymentStatus>,
    pub kind: Option<PaymentKind>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
