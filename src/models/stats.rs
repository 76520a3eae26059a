use serde::Serialize;
use utoipa::ToSchema;

/// Statistiche pubbliche
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct PublicSummary {
    pub open_jobs: i64,
    pub completed_jobs: i64,
    pub workers: i64,
    pub verified_workers: i64,
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct CountByKey {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct VolumeByKind {
    pub kind: String,
    pub transactions: i64,
    pub amount_cents: i64,
}

/// Statistiche per il pannello admin
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct AdminStats {
    pub users_by_role: Vec<CountByKey>,
    pub jobs_by_status: Vec<CountByKey>,
    pub completed_payments: Vec<VolumeByKind>,
    pub pending_verifications: i64,
}
