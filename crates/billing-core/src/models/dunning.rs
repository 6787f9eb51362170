//! Dunning configuration (SPEC_FULL §4.11, §3 Supplemented Features).
//!
//! Stages are tenant-scoped, data-driven reference rows — the same tier
//! as coupon/tax rows per spec.md §3 — not part of the hard core, but
//! needed as input to the Dunning Controller.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "dunning_action", rename_all = "snake_case")]
pub enum DunningAction {
    RetryPayment,
    SendNotice,
    CancelSubscription,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DunningStage {
    pub app_id: String,
    pub stage_number: i32,
    pub wait_days: i32,
    pub action: DunningAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DunningConfig {
    pub app_id: String,
    pub grace_days: i32,
    pub stages: Vec<DunningStage>,
    pub max_retry_attempts: i32,
}

impl DunningConfig {
    pub fn stage_after(&self, current_stage: i32) -> Option<&DunningStage> {
        self.stages
            .iter()
            .filter(|s| s.stage_number > current_stage)
            .min_by_key(|s| s.stage_number)
    }
}

/// Per-tenant override row for `grace_days`/`max_retry_attempts`; the
/// stage table above carries the rest of [`DunningConfig`]. Split out
/// because the stages are a one-to-many list and the settings are not.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DunningSettings {
    pub app_id: String,
    pub grace_days: i32,
    pub max_retry_attempts: i32,
}
