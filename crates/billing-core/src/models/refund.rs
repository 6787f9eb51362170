//! Refund entity (SPEC_FULL §3, §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "refund_status", rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Refund {
    pub id: Uuid,
    pub app_id: String,
    pub charge_id: Uuid,
    pub processor_id: Option<String>,
    pub amount_cents: i64,
    pub status: RefundStatus,
    pub reason: Option<String>,
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRefundRequest {
    pub app_id: String,
    pub charge_id: Uuid,
    pub amount_cents: i64,
    pub reference_id: String,
    pub reason: Option<String>,
}
