//! Subscription entity and status machine (SPEC_FULL §3, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "interval_unit", rename_all = "snake_case")]
pub enum IntervalUnit {
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    /// Status machine from SPEC_FULL §4.6:
    /// `trialing -> active -> (past_due <-> active) -> canceled`; `canceled` is a sink.
    pub fn can_transition_to(self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        match (self, next) {
            (Canceled, _) => false,
            (Trialing, Active) | (Trialing, Canceled) => true,
            (Active, PastDue) | (Active, Canceled) => true,
            (PastDue, Active) | (PastDue, Canceled) => true,
            (same, other) if same == other => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub app_id: String,
    pub customer_id: Uuid,
    pub processor_id: Option<String>,
    pub plan_id: String,
    pub price_cents: i64,
    pub quantity: i32,
    pub currency: String,
    pub interval_unit: IntervalUnit,
    pub interval_count: i32,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Invariant from SPEC_FULL §3: `current_period_end > current_period_start`.
    pub fn has_valid_period(&self) -> bool {
        self.current_period_end > self.current_period_start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub app_id: String,
    pub customer_id: Uuid,
    pub plan_id: String,
    pub price_cents: i64,
    pub quantity: i32,
    pub currency: String,
    pub interval_unit: IntervalUnit,
    pub interval_count: i32,
    pub trial_days: i32,
    pub metadata: Option<serde_json::Value>,
}

/// Cancellation mode (SPEC_FULL §4.6): either immediate or deferred to the
/// end of the current billing period.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum CancellationMode {
    Immediate,
    AtPeriodEnd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSubscriptionRequest {
    pub app_id: String,
    pub subscription_id: Uuid,
    pub mode: CancellationMode,
}

/// Result of a cycle change (interval change), implemented per SPEC_FULL
/// §4.6 as cancel-then-create rather than an in-place mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleChangeResult {
    pub canceled_subscription_id: Uuid,
    pub new_subscription: Subscription,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_forbids_leaving_canceled() {
        assert!(!SubscriptionStatus::Canceled.can_transition_to(SubscriptionStatus::Active));
    }

    #[test]
    fn status_machine_allows_past_due_recovery() {
        assert!(SubscriptionStatus::PastDue.can_transition_to(SubscriptionStatus::Active));
    }

    #[test]
    fn status_machine_forbids_trialing_from_active() {
        assert!(!SubscriptionStatus::Active.can_transition_to(SubscriptionStatus::Trialing));
    }
}
