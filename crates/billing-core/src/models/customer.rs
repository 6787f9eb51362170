//! Customer lifecycle entity (SPEC_FULL §3, §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "customer_status", rename_all = "snake_case")]
pub enum CustomerStatus {
    /// Local row inserted, processor call not yet confirmed.
    Pending,
    /// Processor acknowledged; `processor_id` is set.
    Active,
    /// Processor call failed; no `processor_id`.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub app_id: String,
    pub external_id: Option<String>,
    pub processor_id: Option<String>,
    pub status: CustomerStatus,
    pub email: String,
    pub name: String,
    pub default_payment_method_id: Option<Uuid>,
    pub delinquent_since: Option<DateTime<Utc>>,
    pub grace_period_end: Option<DateTime<Utc>>,
    /// Highest dunning stage reached so far; `0` until the first payment
    /// failure. Advanced only by the Dunning Controller (SPEC_FULL §4.11),
    /// never by the webhook handlers.
    pub dunning_stage: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Local-first creation request (SPEC_FULL §4.5) — `app_id` is always the
/// Tenant Gate's verified value, never a client-supplied field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCustomerRequest {
    pub app_id: String,
    pub external_id: Option<String>,
    pub email: String,
    pub name: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCustomerRequest {
    pub email: Option<String>,
    pub name: Option<String>,
    pub default_payment_method_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}
