//! Dispute entity — added per SPEC_FULL §3 Supplemented Features: the
//! webhook handler table (§4.10) names `dispute.*` upserts but spec.md's
//! data model never gave the row its own shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "dispute_status", rename_all = "snake_case")]
pub enum DisputeStatus {
    NeedsResponse,
    UnderReview,
    Won,
    Lost,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Dispute {
    pub id: Uuid,
    pub app_id: String,
    pub charge_id: Uuid,
    pub processor_dispute_id: String,
    pub status: DisputeStatus,
    pub reason: Option<String>,
    pub amount_cents: i64,
    pub evidence_due_by: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
