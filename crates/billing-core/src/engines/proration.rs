//! Proration Engine (SPEC_FULL §4.7). Pure arithmetic lives here as free
//! functions so the worked examples in SPEC_FULL §8 can be asserted
//! directly, independent of persistence; `apply_subscription_change` is
//! the only function in this module that touches a repository.
//!
//! Rounding contract (see open question in DESIGN.md): `days_used` floors
//! and `days_remaining` ceils independently, so for non-integer-aligned
//! periods `days_used + days_remaining` can exceed `days_total` by one
//! day. This is preserved deliberately — the factor is always computed as
//! `days_remaining / days_total`, never derived from `days_used`.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Charge, ChargeStatus, ChargeType, Event, EventSource, Subscription};
use crate::repository::{ChargeRepository, EventRepository, SubscriptionRepository};

/// Behavior selector for `apply_subscription_change` (SPEC_FULL §4.7,
/// reshaped per §9 from a dynamic option bag into an explicit enum).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProrationBehavior {
    CreateProrations,
    None,
    AlwaysInvoice,
}

/// Behavior selector for `calculate_cancellation_refund`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancellationRefundBehavior {
    PartialRefund,
    AccountCredit,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NetChangeType {
    Charge,
    Credit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancellationRefundAction {
    Refund,
    AccountCredit,
    None,
}

/// The core time-proration factor, independent of any dollar amount.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeProration {
    pub days_total: i64,
    pub days_used: i64,
    pub days_remaining: i64,
    /// Rounded to 4 decimal places, per SPEC_FULL §4.7.
    pub factor: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProrationBreakdown {
    pub time_proration: TimeProration,
    pub old_plan_credit_cents: i64,
    pub new_plan_charge_cents: i64,
    pub net_change_cents: i64,
    pub net_change_type: NetChangeType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CancellationRefundResult {
    pub time_proration: TimeProration,
    pub action: CancellationRefundAction,
    pub amount_cents: i64,
}

fn midnight_utc(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc()
}

fn round_half_up_to_cents(value: Decimal) -> i64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .expect("proration amounts fit in i64 cents")
}

/// Computes `{days_total, days_used, days_remaining, factor}` per the
/// boundary rules in SPEC_FULL §4.7. `period_start`/`period_end` are
/// normalized to UTC midnight before any arithmetic, as is `change_date`.
pub fn calculate_time_proration(
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    change_date: DateTime<Utc>,
) -> Result<TimeProration> {
    let start = midnight_utc(period_start);
    let end = midnight_utc(period_end);
    let change = midnight_utc(change_date);

    let days_total = (end - start).num_days();
    if days_total <= 0 {
        return Err(Error::validation("Subscription period must span at least one day"));
    }

    if change <= start {
        return Ok(TimeProration {
            days_total,
            days_used: 0,
            days_remaining: days_total,
            factor: Decimal::ONE,
        });
    }

    if change >= end {
        return Ok(TimeProration {
            days_total,
            days_used: days_total,
            days_remaining: 0,
            factor: Decimal::ZERO,
        });
    }

    let days_used = (change - start).num_days();
    let days_remaining = (end - change).num_days();

    let factor = (Decimal::from_i64(days_remaining).unwrap() / Decimal::from_i64(days_total).unwrap())
        .round_dp(4);

    Ok(TimeProration {
        days_total,
        days_used,
        days_remaining,
        factor,
    })
}

/// In-place price/quantity change within the same interval (SPEC_FULL
/// §4.7): the same time-proration factor scales both the old plan's
/// credit and the new plan's charge.
pub fn calculate_price_change_proration(
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    change_date: DateTime<Utc>,
    old_price_cents: i64,
    old_quantity: i32,
    new_price_cents: i64,
    new_quantity: i32,
) -> Result<ProrationBreakdown> {
    let time_proration = calculate_time_proration(period_start, period_end, change_date)?;

    let old_amount = Decimal::from_i64(old_price_cents).unwrap() * Decimal::from_i32(old_quantity).unwrap();
    let new_amount = Decimal::from_i64(new_price_cents).unwrap() * Decimal::from_i32(new_quantity).unwrap();

    let old_plan_credit_cents = round_half_up_to_cents(old_amount * time_proration.factor);
    let new_plan_charge_cents = round_half_up_to_cents(new_amount * time_proration.factor);
    let net_change_cents = new_plan_charge_cents - old_plan_credit_cents;

    Ok(ProrationBreakdown {
        time_proration,
        old_plan_credit_cents,
        new_plan_charge_cents,
        net_change_cents,
        net_change_type: if net_change_cents >= 0 {
            NetChangeType::Charge
        } else {
            NetChangeType::Credit
        },
    })
}

/// Cancellation refund (SPEC_FULL §4.7): `refund_amount = total_paid * factor`
/// where `factor = days_remaining / days_total` for the subscription's
/// current period, scaled by the chosen behavior.
pub fn calculate_cancellation_refund(
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    change_date: DateTime<Utc>,
    total_paid_cents: i64,
    behavior: CancellationRefundBehavior,
) -> Result<CancellationRefundResult> {
    let time_proration = calculate_time_proration(period_start, period_end, change_date)?;
    let amount = Decimal::from_i64(total_paid_cents).unwrap() * time_proration.factor;
    let amount_cents = round_half_up_to_cents(amount);

    let (action, amount_cents) = match behavior {
        CancellationRefundBehavior::PartialRefund => (CancellationRefundAction::Refund, amount_cents),
        CancellationRefundBehavior::AccountCredit => (CancellationRefundAction::AccountCredit, amount_cents),
        CancellationRefundBehavior::None => (CancellationRefundAction::None, 0),
    };

    Ok(CancellationRefundResult {
        time_proration,
        action,
        amount_cents,
    })
}

/// Deterministic reference id for a proration charge/credit, per
/// SPEC_FULL §4.7 — re-invocation on the same subscription/day fails
/// with `Conflict` via the charge repository's unique `reference_id`.
fn proration_reference_id(subscription_id: Uuid, change_date: DateTime<Utc>, suffix: &str) -> String {
    format!(
        "proration_sub_{}_{}_{}",
        subscription_id,
        change_date.format("%Y-%m-%d"),
        suffix
    )
}

/// Atomically applies a mid-cycle price/quantity change (SPEC_FULL §4.7):
/// inserts up to two charge rows, updates the subscription, and appends a
/// `proration_applied` event. `Behavior::None` only updates the
/// subscription; no charges are written.
pub async fn apply_subscription_change(
    charges: &dyn ChargeRepository,
    subscriptions: &dyn SubscriptionRepository,
    events: &dyn EventRepository,
    subscription: Subscription,
    change_date: DateTime<Utc>,
    new_price_cents: i64,
    new_quantity: i32,
    behavior: ProrationBehavior,
) -> Result<(Subscription, Option<ProrationBreakdown>)> {
    if behavior == ProrationBehavior::None {
        let mut updated = subscription;
        updated.price_cents = new_price_cents;
        updated.quantity = new_quantity;
        updated.updated_at = Utc::now();
        let saved = subscriptions.update(updated).await?;
        return Ok((saved, None));
    }

    let breakdown = calculate_price_change_proration(
        subscription.current_period_start,
        subscription.current_period_end,
        change_date,
        subscription.price_cents,
        subscription.quantity,
        new_price_cents,
        new_quantity,
    )?;

    let now = Utc::now();

    if breakdown.old_plan_credit_cents != 0 {
        let credit = Charge {
            id: Uuid::new_v4(),
            app_id: subscription.app_id.clone(),
            customer_id: subscription.customer_id,
            subscription_id: Some(subscription.id),
            processor_id: None,
            charge_type: ChargeType::ProrationCredit,
            amount_cents: -breakdown.old_plan_credit_cents,
            currency: subscription.currency.clone(),
            status: ChargeStatus::Succeeded,
            reason: Some("Proration credit for unused time on prior plan".to_string()),
            reference_id: proration_reference_id(subscription.id, change_date, "credit"),
            failure_code: None,
            failure_message: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        charges.insert(credit).await?;
    }

    if breakdown.new_plan_charge_cents != 0 {
        let charge = Charge {
            id: Uuid::new_v4(),
            app_id: subscription.app_id.clone(),
            customer_id: subscription.customer_id,
            subscription_id: Some(subscription.id),
            processor_id: None,
            charge_type: ChargeType::ProrationCharge,
            amount_cents: breakdown.new_plan_charge_cents,
            currency: subscription.currency.clone(),
            status: ChargeStatus::Succeeded,
            reason: Some("Proration charge for remaining time on new plan".to_string()),
            reference_id: proration_reference_id(subscription.id, change_date, "charge"),
            failure_code: None,
            failure_message: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        charges.insert(charge).await?;
    }

    let mut updated = subscription.clone();
    updated.price_cents = new_price_cents;
    updated.quantity = new_quantity;
    updated.updated_at = now;
    updated.metadata["last_proration"] = serde_json::json!({
        "change_date": change_date.to_rfc3339(),
        "net_change_cents": breakdown.net_change_cents,
    });
    let saved = subscriptions.update(updated).await?;

    events
        .append(Event {
            id: Uuid::new_v4(),
            app_id: subscription.app_id.clone(),
            event_type: "proration_applied".to_string(),
            source: EventSource::System,
            entity_type: "subscription".to_string(),
            entity_id: subscription.id.to_string(),
            payload: serde_json::json!({
                "net_change_cents": breakdown.net_change_cents,
                "net_change_type": breakdown.net_change_type,
            }),
            created_at: now,
        })
        .await?;

    Ok((saved, Some(breakdown)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn scenario_one_proration_upgrade_mid_cycle() {
        let breakdown = calculate_price_change_proration(
            utc(2026, 1, 1),
            utc(2026, 1, 31),
            utc(2026, 1, 15),
            2500,
            1,
            5000,
            1,
        )
        .unwrap();

        assert_eq!(breakdown.time_proration.days_total, 30);
        assert_eq!(breakdown.time_proration.days_remaining, 16);
        assert_eq!(breakdown.time_proration.factor, Decimal::new(5333, 4));
        assert_eq!(breakdown.old_plan_credit_cents, 1333);
        assert_eq!(breakdown.new_plan_charge_cents, 2667);
        assert_eq!(breakdown.net_change_cents, 1334);
        assert_eq!(breakdown.net_change_type, NetChangeType::Charge);
    }

    #[test]
    fn scenario_two_annual_cancellation_credit() {
        // Old annual subscription's unused-time credit, computed over its
        // own 2026 calendar-year period (period_end is the exclusive next
        // period's start, 2027-01-01).
        let result = calculate_cancellation_refund(
            utc(2026, 1, 1),
            utc(2027, 1, 1),
            utc(2026, 7, 1),
            12000,
            CancellationRefundBehavior::AccountCredit,
        )
        .unwrap();

        assert_eq!(result.time_proration.days_total, 365);
        assert_eq!(result.time_proration.days_remaining, 184);
        assert_eq!(result.amount_cents, 6049);
        assert_eq!(result.action, CancellationRefundAction::AccountCredit);
    }

    #[test]
    fn change_at_period_start_has_factor_one() {
        let p = calculate_time_proration(utc(2026, 1, 1), utc(2026, 1, 31), utc(2026, 1, 1)).unwrap();
        assert_eq!(p.factor, Decimal::ONE);
        assert_eq!(p.days_used, 0);
        assert_eq!(p.days_remaining, 30);
    }

    #[test]
    fn change_at_or_after_period_end_has_factor_zero() {
        let p = calculate_time_proration(utc(2026, 1, 1), utc(2026, 1, 31), utc(2026, 1, 31)).unwrap();
        assert_eq!(p.factor, Decimal::ZERO);
        assert_eq!(p.days_remaining, 0);

        let after = calculate_time_proration(utc(2026, 1, 1), utc(2026, 1, 31), utc(2026, 2, 15)).unwrap();
        assert_eq!(after.factor, Decimal::ZERO);
    }

    #[test]
    fn zero_length_period_is_rejected() {
        let err = calculate_time_proration(utc(2026, 1, 1), utc(2026, 1, 1), utc(2026, 1, 1)).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn calculate_is_pure_and_deterministic() {
        let a = calculate_price_change_proration(utc(2026, 1, 1), utc(2026, 1, 31), utc(2026, 1, 15), 2500, 1, 5000, 1).unwrap();
        let b = calculate_price_change_proration(utc(2026, 1, 1), utc(2026, 1, 31), utc(2026, 1, 15), 2500, 1, 5000, 1).unwrap();
        assert_eq!(a.net_change_cents, b.net_change_cents);
    }
}
