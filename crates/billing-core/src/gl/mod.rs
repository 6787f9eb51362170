//! GL Posting Consumer (SPEC_FULL §4.13) and Period Close Workflow
//! (§4.14). The GL store has no foreign-key edges to the billing store
//! (SPEC_FULL §3), so everything here talks only to the GL repositories.

pub mod period_close;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{FailedGlEvent, JournalEntry, JournalLine, NewJournalLine};
use crate::repository::{FailedGlEventRepository, JournalRepository, PeriodRepository};

pub use period_close::{CloseStatus, PeriodCloseWorkflow, ValidateCloseResult};

/// Inbound envelope for a `gl.posting.requested` event. Whatever
/// transport carries the event (inline dispatch, NATS, SQS per
/// [`crate::config::EventBusTransport`]) deserializes into this shape
/// before handing it to [`GlPostingConsumer::consume`].
#[derive(Debug, Clone)]
pub struct GlPostingRequest {
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
    pub lines: Vec<NewJournalLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostingOutcome {
    Posted,
    /// A journal entry for this `source_event_id` already exists.
    Duplicate,
    /// Validation failure or closed-period rejection; routed to
    /// `failed_events` with `reason_code`, never retried.
    Rejected { reason_code: String },
}

const MAX_DB_RETRY_ATTEMPTS: u32 = 3;
const DB_RETRY_DELAY: Duration = Duration::from_millis(50);

pub struct GlPostingConsumer {
    journal: Arc<dyn JournalRepository>,
    periods: Arc<dyn PeriodRepository>,
    failed_events: Arc<dyn FailedGlEventRepository>,
}

impl GlPostingConsumer {
    pub fn new(
        journal: Arc<dyn JournalRepository>,
        periods: Arc<dyn PeriodRepository>,
        failed_events: Arc<dyn FailedGlEventRepository>,
    ) -> Self {
        Self {
            journal,
            periods,
            failed_events,
        }
    }

    /// SPEC_FULL §4.13 pipeline. Validation and closed-period rejections
    /// dead-letter and return `Ok`; only an unexpected database error that
    /// survives the bounded retry budget propagates as `Err`.
    pub async fn consume(&self, request: GlPostingRequest) -> Result<PostingOutcome> {
        if let Err(reason) = validate_balanced_entry(&request.currency, &request.lines) {
            self.dead_letter(&request, &reason, &reason).await?;
            return Ok(PostingOutcome::Rejected { reason_code: reason });
        }

        if self
            .journal
            .find_by_source_event_id(&request.tenant_id, &request.source_event_id)
            .await?
            .is_some()
        {
            return Ok(PostingOutcome::Duplicate);
        }

        if let Some(period) = self.periods.find_covering(&request.tenant_id, request.posted_at).await? {
            if period.is_closed {
                self.dead_letter(&request, "closed_period", "posting targets a closed accounting period").await?;
                return Ok(PostingOutcome::Rejected {
                    reason_code: "closed_period".to_string(),
                });
            }
        }

        let now = Utc::now();
        let entry = JournalEntry {
            id: Uuid::new_v4(),
            tenant_id: request.tenant_id.clone(),
            source_module: request.source_module.clone(),
            source_event_id: request.source_event_id.clone(),
            source_subject: request.source_subject.clone(),
            posted_at: request.posted_at,
            currency: request.currency.clone(),
            description: request.description.clone(),
            reference_type: request.reference_type.clone(),
            reference_id: request.reference_id.clone(),
            reverses_entry_id: request.reverses_entry_id,
            created_at: now,
        };
        let lines: Vec<JournalLine> = request
            .lines
            .iter()
            .enumerate()
            .map(|(idx, line)| JournalLine {
                journal_entry_id: entry.id,
                line_no: idx as i32,
                account_ref: line.account_ref.clone(),
                debit_minor: line.debit_minor,
                credit_minor: line.credit_minor,
                memo: line.memo.clone(),
            })
            .collect();

        self.insert_with_retry(entry, lines, &request).await
    }

    async fn insert_with_retry(
        &self,
        entry: JournalEntry,
        lines: Vec<JournalLine>,
        request: &GlPostingRequest,
    ) -> Result<PostingOutcome> {
        let mut last_err = None;
        for attempt in 1..=MAX_DB_RETRY_ATTEMPTS {
            match self.journal.insert(entry.clone(), lines.clone()).await {
                Ok(_) => return Ok(PostingOutcome::Posted),
                // The unique constraint on source_event_id raced us; the
                // winner's row satisfies idempotency, so this is not a failure.
                Err(Error::Conflict(_)) => return Ok(PostingOutcome::Duplicate),
                Err(err) => {
                    last_err = Some(err);
                    if attempt < MAX_DB_RETRY_ATTEMPTS {
                        tokio::time::sleep(DB_RETRY_DELAY).await;
                    }
                }
            }
        }

        let err = last_err.expect("loop runs at least once");
        self.dead_letter(request, "database_error", &err.to_string()).await?;
        Ok(PostingOutcome::Rejected {
            reason_code: "database_error".to_string(),
        })
    }

    async fn dead_letter(&self, request: &GlPostingRequest, reason_code: &str, reason_message: &str) -> Result<()> {
        self.failed_events
            .insert(FailedGlEvent {
                id: Uuid::new_v4(),
                tenant_id: request.tenant_id.clone(),
                source_event_id: request.source_event_id.clone(),
                reason_code: reason_code.to_string(),
                reason_message: reason_message.to_string(),
                envelope: serde_json::json!({
                    "source_module": request.source_module,
                    "source_subject": request.source_subject,
                    "posted_at": request.posted_at,
                    "currency": request.currency,
                    "lines": request.lines.iter().map(|l| serde_json::json!({
                        "account_ref": l.account_ref,
                        "debit_minor": l.debit_minor,
                        "credit_minor": l.credit_minor,
                    })).collect::<Vec<_>>(),
                }),
                created_at: Utc::now(),
            })
            .await
    }
}

/// Balanced-entry contract (SPEC_FULL §4.13), checked before any insert:
/// at least two lines, each with exactly one side non-zero, currency is
/// upper-case ISO-4217, every `account_ref` non-empty, and the sums match.
fn validate_balanced_entry(currency: &str, lines: &[NewJournalLine]) -> std::result::Result<(), String> {
    if currency != currency.to_uppercase() || currency.len() != 3 {
        return Err("invalid_currency".to_string());
    }
    if lines.len() < 2 {
        return Err("insufficient_lines".to_string());
    }

    let mut total_debits: i64 = 0;
    let mut total_credits: i64 = 0;
    for line in lines {
        if line.account_ref.trim().is_empty() {
            return Err("empty_account_ref".to_string());
        }
        let debit_set = line.debit_minor != 0;
        let credit_set = line.credit_minor != 0;
        if debit_set == credit_set {
            return Err("ambiguous_line_side".to_string());
        }
        if line.debit_minor < 0 || line.credit_minor < 0 {
            return Err("negative_amount".to_string());
        }
        total_debits += line.debit_minor;
        total_credits += line.credit_minor;
    }

    if total_debits != total_credits {
        return Err("unbalanced_entry".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryFailedGlEventRepository, InMemoryJournalRepository, InMemoryPeriodRepository};

    fn balanced_lines() -> Vec<NewJournalLine> {
        vec![
            NewJournalLine {
                account_ref: "accounts_receivable".to_string(),
                debit_minor: 1000,
                credit_minor: 0,
                memo: None,
            },
            NewJournalLine {
                account_ref: "revenue".to_string(),
                debit_minor: 0,
                credit_minor: 1000,
                memo: None,
            },
        ]
    }

    fn consumer() -> GlPostingConsumer {
        GlPostingConsumer::new(
            Arc::new(InMemoryJournalRepository::default()),
            Arc::new(InMemoryPeriodRepository::default()),
            Arc::new(InMemoryFailedGlEventRepository::default()),
        )
    }

    fn request(event_id: &str, lines: Vec<NewJournalLine>) -> GlPostingRequest {
        GlPostingRequest {
            tenant_id: "tenant-a".to_string(),
            source_module: "invoice".to_string(),
            source_event_id: event_id.to_string(),
            source_subject: "inv_1".to_string(),
            posted_at: Utc::now(),
            currency: "USD".to_string(),
            description: None,
            reference_type: None,
            reference_id: None,
            reverses_entry_id: None,
            lines,
        }
    }

    #[tokio::test]
    async fn balanced_entry_posts() {
        let consumer = consumer();
        let outcome = consumer.consume(request("evt_1", balanced_lines())).await.unwrap();
        assert_eq!(outcome, PostingOutcome::Posted);
    }

    #[tokio::test]
    async fn duplicate_source_event_is_a_noop() {
        let consumer = consumer();
        consumer.consume(request("evt_2", balanced_lines())).await.unwrap();
        let outcome = consumer.consume(request("evt_2", balanced_lines())).await.unwrap();
        assert_eq!(outcome, PostingOutcome::Duplicate);
    }

    #[tokio::test]
    async fn unbalanced_entry_is_rejected_and_dead_lettered() {
        let lines = vec![NewJournalLine {
            account_ref: "accounts_receivable".to_string(),
            debit_minor: 1000,
            credit_minor: 0,
            memo: None,
        }];
        let consumer = consumer();
        let outcome = consumer.consume(request("evt_3", lines)).await.unwrap();
        assert_eq!(
            outcome,
            PostingOutcome::Rejected {
                reason_code: "insufficient_lines".to_string()
            }
        );
    }

    #[tokio::test]
    async fn lowercase_currency_is_rejected() {
        let mut req = request("evt_4", balanced_lines());
        req.currency = "usd".to_string();
        let consumer = consumer();
        let outcome = consumer.consume(req).await.unwrap();
        assert_eq!(
            outcome,
            PostingOutcome::Rejected {
                reason_code: "invalid_currency".to_string()
            }
        );
    }
}
