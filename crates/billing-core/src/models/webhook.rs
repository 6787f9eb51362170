//! Webhook ingress records (SPEC_FULL §3, §4.9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "webhook_status", rename_all = "snake_case")]
pub enum WebhookStatus {
    Received,
    Processing,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookRecord {
    pub app_id: String,
    pub event_id: String,
    pub event_type: String,
    pub status: WebhookStatus,
    pub payload: serde_json::Value,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub dead_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "webhook_attempt_status", rename_all = "snake_case")]
pub enum WebhookAttemptStatus {
    Succeeded,
    Failed,
    DeadLettered,
}

/// Append-only retry audit trail (SPEC_FULL §3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookAttempt {
    pub app_id: String,
    pub event_id: String,
    pub attempt_number: i32,
    pub status: WebhookAttemptStatus,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Backoff schedule and retry ceiling from SPEC_FULL §4.9: `[30s, 2m, 15m, 1h, 4h]`,
/// a maximum of 5 attempts total.
pub const RETRY_BACKOFF_SECONDS: [i64; 5] = [30, 120, 900, 3600, 14400];
pub const MAX_WEBHOOK_ATTEMPTS: i32 = 5;

/// Error classes that skip retry and dead-letter immediately (SPEC_FULL §4.9).
pub fn is_non_retriable(error_code: &str) -> bool {
    matches!(
        error_code,
        "signature_invalid" | "unknown_event_type" | "validation_error" | "closed_period"
    )
}

/// Computes the delay for the given 1-indexed attempt number, or `None`
/// once the attempt ceiling is reached (caller should dead-letter).
pub fn backoff_for_attempt(attempt_number: i32) -> Option<chrono::Duration> {
    let idx = usize::try_from(attempt_number - 1).ok()?;
    RETRY_BACKOFF_SECONDS
        .get(idx)
        .map(|secs| chrono::Duration::seconds(*secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_matches_spec() {
        assert_eq!(backoff_for_attempt(1), Some(chrono::Duration::seconds(30)));
        assert_eq!(backoff_for_attempt(2), Some(chrono::Duration::seconds(120)));
        assert_eq!(backoff_for_attempt(5), Some(chrono::Duration::seconds(14400)));
        assert_eq!(backoff_for_attempt(6), None);
    }

    #[test]
    fn classifies_non_retriable_errors() {
        assert!(is_non_retriable("signature_invalid"));
        assert!(is_non_retriable("unknown_event_type"));
        assert!(!is_non_retriable("processor_timeout"));
    }
}
