use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Recensione lasciata da una parte di un job completato all'altra
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Review {
    pub id: String,
    pub job_id: String,
    pub reviewer_id: String,
    pub reviewer_name: String,
    pub reviewee_id: String,
    pub rating: i64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReviewRequest {
    /// Voto da 1 a 5
    pub rating: i64,
    pub comment: Option<String>,
}

/// Media e numero delle recensioni ricevute
#[derive(Debug, Clone, Copy, Default, Serialize, ToSchema)]
pub struct ReviewSummary {
    pub average_rating: Option<f64>,
    pub review_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserReviewsResponse {
    #[serde(flatten)]
    pub summary: ReviewSummary,
    pub items: Vec<Review>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}
