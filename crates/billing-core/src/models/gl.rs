//! General-ledger entities (SPEC_FULL §3). The GL store is a physically
//! separate database with no foreign-key edges to the billing records above.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JournalEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub source_module: String,
    pub source_event_id: String,
    pub source_subject: String,
    pub posted_at: DateTime<Utc>,
    pub currency: String,
    pub description: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub reverses_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JournalLine {
    pub journal_entry_id: Uuid,
    pub line_no: i32,
    pub account_ref: String,
    pub debit_minor: i64,
    pub credit_minor: i64,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub tenant_id: String,
    pub source_module: String,
    pub source_event_id: String,
    pub source_subject: String,
    pub currency: String,
    pub description: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub reverses_entry_id: Option<Uuid>,
    pub lines: Vec<NewJournalLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJournalLine {
    pub account_ref: String,
    pub debit_minor: i64,
    pub credit_minor: i64,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccountingPeriod {
    pub id: Uuid,
    pub tenant_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub is_closed: bool,
    pub close_requested_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub close_reason: Option<String>,
    pub close_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PeriodSummarySnapshot {
    pub tenant_id: String,
    pub period_id: Uuid,
    pub currency: String,
    pub journal_count: i64,
    pub line_count: i64,
    pub total_debits_minor: i64,
    pub total_credits_minor: i64,
    pub checksum: Option<String>,
}

/// Dead-letter row for the GL Posting Consumer (SPEC_FULL §4.13): the
/// full inbound envelope plus a stable reason code, written instead of
/// retried for validation failures (unbalanced entry, bad currency,
/// missing field) and after a transient database error exhausts its
/// bounded retry budget.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FailedGlEvent {
    pub id: Uuid,
    pub tenant_id: String,
    pub source_event_id: String,
    pub reason_code: String,
    pub reason_message: String,
    pub envelope: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
