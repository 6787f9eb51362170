//! Idempotency record (SPEC_FULL §3, §4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IdempotencyRecord {
    pub app_id: String,
    pub idempotency_key: String,
    pub request_hash: String,
    pub status_code: i32,
    pub response_body: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Default TTL for idempotency records per SPEC_FULL §3: "typically 24h".
pub const DEFAULT_TTL_HOURS: i64 = 24;
