//! Period Close Workflow (SPEC_FULL §4.14): validate, close, status.
//! Close itself runs under [`PeriodRepository::close_locked`]'s row lock
//! so concurrent close attempts serialize on the database, the same
//! synchronization point the GL Posting Consumer's idempotent insert
//! relies on.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::PeriodSummarySnapshot;
use crate::repository::{JournalRepository, PeriodRepository, PeriodSummaryRepository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateCloseResult {
    pub can_close: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseStatus {
    Open,
    Closed {
        closed_at: DateTime<Utc>,
        closed_by: String,
        close_reason: Option<String>,
        close_hash: String,
    },
}

pub struct PeriodCloseWorkflow {
    periods: Arc<dyn PeriodRepository>,
    journal: Arc<dyn JournalRepository>,
    summaries: Arc<dyn PeriodSummaryRepository>,
}

impl PeriodCloseWorkflow {
    pub fn new(
        periods: Arc<dyn PeriodRepository>,
        journal: Arc<dyn JournalRepository>,
        summaries: Arc<dyn PeriodSummaryRepository>,
    ) -> Self {
        Self {
            periods,
            journal,
            summaries,
        }
    }

    /// Read-only. `PERIOD_NOT_FOUND`, `PERIOD_ALREADY_CLOSED`,
    /// `UNBALANCED_ENTRIES` per SPEC_FULL §4.14.
    pub async fn validate_close(&self, tenant_id: &str, period_id: Uuid) -> Result<ValidateCloseResult> {
        let period = match self.periods.find_by_id(tenant_id, period_id).await? {
            Some(p) => p,
            None => {
                return Ok(ValidateCloseResult {
                    can_close: false,
                    issues: vec!["PERIOD_NOT_FOUND".to_string()],
                })
            }
        };

        if period.is_closed {
            return Ok(ValidateCloseResult {
                can_close: false,
                issues: vec!["PERIOD_ALREADY_CLOSED".to_string()],
            });
        }

        let entries = self
            .journal
            .list_in_period(tenant_id, period.period_start, period.period_end)
            .await?;

        let unbalanced = entries.iter().any(|(_, lines)| {
            let total_debits: i64 = lines.iter().map(|l| l.debit_minor).sum();
            let total_credits: i64 = lines.iter().map(|l| l.credit_minor).sum();
            total_debits != total_credits
        });

        let mut issues = Vec::new();
        if unbalanced {
            issues.push("UNBALANCED_ENTRIES".to_string());
        }

        Ok(ValidateCloseResult {
            can_close: issues.is_empty(),
            issues,
        })
    }

    /// Atomic close per SPEC_FULL §4.14: re-validates, snapshots the
    /// period per currency, and writes `closed_at`/`closed_by`/
    /// `close_reason`/`close_hash` under a row lock. Calling close on an
    /// already-closed period is idempotent and returns the original
    /// close status without mutating anything.
    pub async fn close(
        &self,
        tenant_id: &str,
        period_id: Uuid,
        closed_by: &str,
        close_reason: Option<&str>,
    ) -> Result<CloseStatus> {
        let period = self
            .periods
            .find_by_id(tenant_id, period_id)
            .await?
            .ok_or_else(|| Error::not_found("Accounting period not found"))?;

        if period.is_closed {
            return Ok(CloseStatus::Closed {
                closed_at: period.closed_at.unwrap_or_else(Utc::now),
                closed_by: period.closed_by.unwrap_or_default(),
                close_reason: period.close_reason,
                close_hash: period.close_hash.unwrap_or_default(),
            });
        }

        let validation = self.validate_close(tenant_id, period_id).await?;
        if !validation.can_close {
            return Err(Error::conflict(format!(
                "period cannot be closed: {}",
                validation.issues.join(", ")
            )));
        }

        let entries = self
            .journal
            .list_in_period(tenant_id, period.period_start, period.period_end)
            .await?;

        let mut by_currency: BTreeMap<String, Vec<(i64, i64, &str)>> = BTreeMap::new();
        for (entry, lines) in &entries {
            let bucket = by_currency.entry(entry.currency.clone()).or_default();
            for line in lines {
                bucket.push((line.debit_minor, line.credit_minor, line.account_ref.as_str()));
            }
        }

        for (currency, lines) in &by_currency {
            let journal_count = entries.iter().filter(|(e, _)| &e.currency == currency).count() as i64;
            let line_count = lines.len() as i64;
            let total_debits_minor: i64 = lines.iter().map(|(d, _, _)| d).sum();
            let total_credits_minor: i64 = lines.iter().map(|(_, c, _)| c).sum();
            let checksum = hex::encode(Sha256::digest(
                format!("{tenant_id}:{period_id}:{currency}:{journal_count}:{total_debits_minor}:{total_credits_minor}")
                    .as_bytes(),
            ));

            self.summaries
                .insert_if_absent(PeriodSummarySnapshot {
                    tenant_id: tenant_id.to_string(),
                    period_id,
                    currency: currency.clone(),
                    journal_count,
                    line_count,
                    total_debits_minor,
                    total_credits_minor,
                    checksum: Some(checksum),
                })
                .await?;
        }

        let total_journal_count = entries.len() as i64;
        let total_debits_minor: i64 = entries.iter().flat_map(|(_, l)| l.iter().map(|l| l.debit_minor)).sum();
        let total_credits_minor: i64 = entries.iter().flat_map(|(_, l)| l.iter().map(|l| l.credit_minor)).sum();
        let balance_row_count = entries
            .iter()
            .flat_map(|(_, l)| l.iter().map(|l| l.account_ref.as_str()))
            .collect::<HashSet<_>>()
            .len();

        let close_hash = hex::encode(Sha256::digest(
            format!(
                "{tenant_id}:{period_id}:{total_journal_count}:{total_debits_minor}:{total_credits_minor}:{balance_row_count}"
            )
            .as_bytes(),
        ));

        let closed_at = Utc::now();
        let closed = self
            .periods
            .close_locked(
                tenant_id,
                period_id,
                closed_by,
                close_reason.unwrap_or(""),
                &close_hash,
                closed_at,
            )
            .await?;

        Ok(CloseStatus::Closed {
            closed_at: closed.closed_at.unwrap_or(closed_at),
            closed_by: closed.closed_by.unwrap_or_else(|| closed_by.to_string()),
            close_reason: closed.close_reason,
            close_hash: closed.close_hash.unwrap_or(close_hash),
        })
    }

    pub async fn close_status(&self, tenant_id: &str, period_id: Uuid) -> Result<CloseStatus> {
        let period = self
            .periods
            .find_by_id(tenant_id, period_id)
            .await?
            .ok_or_else(|| Error::not_found("Accounting period not found"))?;

        if !period.is_closed {
            return Ok(CloseStatus::Open);
        }

        Ok(CloseStatus::Closed {
            closed_at: period.closed_at.unwrap_or_else(Utc::now),
            closed_by: period.closed_by.unwrap_or_default(),
            close_reason: period.close_reason,
            close_hash: period.close_hash.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountingPeriod, JournalEntry, JournalLine};
    use crate::repository::{InMemoryJournalRepository, InMemoryPeriodRepository, InMemoryPeriodSummaryRepository};

    fn workflow() -> (PeriodCloseWorkflow, Arc<InMemoryPeriodRepository>, Arc<InMemoryJournalRepository>) {
        let periods = Arc::new(InMemoryPeriodRepository::default());
        let journal = Arc::new(InMemoryJournalRepository::default());
        let summaries = Arc::new(InMemoryPeriodSummaryRepository::default());
        let workflow = PeriodCloseWorkflow::new(periods.clone(), journal.clone(), summaries);
        (workflow, periods, journal)
    }

    async fn seed_period(periods: &InMemoryPeriodRepository, tenant_id: &str) -> AccountingPeriod {
        let now = Utc::now();
        periods
            .insert(AccountingPeriod {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.to_string(),
                period_start: now - chrono::Duration::days(30),
                period_end: now,
                is_closed: false,
                close_requested_at: None,
                closed_at: None,
                closed_by: None,
                close_reason: None,
                close_hash: None,
            })
            .await
            .unwrap()
    }

    async fn seed_balanced_entry(journal: &InMemoryJournalRepository, tenant_id: &str, posted_at: DateTime<Utc>) {
        let entry_id = Uuid::new_v4();
        let entry = JournalEntry {
            id: entry_id,
            tenant_id: tenant_id.to_string(),
            source_module: "invoice".to_string(),
            source_event_id: format!("evt_{entry_id}"),
            source_subject: "inv_1".to_string(),
            posted_at,
            currency: "USD".to_string(),
            description: None,
            reference_type: None,
            reference_id: None,
            reverses_entry_id: None,
            created_at: posted_at,
        };
        let lines = vec![
            JournalLine {
                journal_entry_id: entry_id,
                line_no: 0,
                account_ref: "accounts_receivable".to_string(),
                debit_minor: 1000,
                credit_minor: 0,
                memo: None,
            },
            JournalLine {
                journal_entry_id: entry_id,
                line_no: 1,
                account_ref: "revenue".to_string(),
                debit_minor: 0,
                credit_minor: 1000,
                memo: None,
            },
        ];
        journal.insert(entry, lines).await.unwrap();
    }

    #[tokio::test]
    async fn missing_period_cannot_close() {
        let (workflow, _, _) = workflow();
        let result = workflow.validate_close("tenant-a", Uuid::new_v4()).await.unwrap();
        assert!(!result.can_close);
        assert_eq!(result.issues, vec!["PERIOD_NOT_FOUND".to_string()]);
    }

    #[tokio::test]
    async fn balanced_period_closes_with_hash() {
        let (workflow, periods, journal) = workflow();
        let period = seed_period(&periods, "tenant-a").await;
        seed_balanced_entry(&journal, "tenant-a", period.period_start + chrono::Duration::days(1)).await;

        let status = workflow.close("tenant-a", period.id, "admin@tenant-a", Some("month end")).await.unwrap();
        match status {
            CloseStatus::Closed { close_hash, closed_by, .. } => {
                assert!(!close_hash.is_empty());
                assert_eq!(closed_by, "admin@tenant-a");
            }
            CloseStatus::Open => panic!("expected closed status"),
        }
    }

    #[tokio::test]
    async fn closing_twice_is_idempotent() {
        let (workflow, periods, journal) = workflow();
        let period = seed_period(&periods, "tenant-a").await;
        seed_balanced_entry(&journal, "tenant-a", period.period_start + chrono::Duration::days(1)).await;

        let first = workflow.close("tenant-a", period.id, "admin@tenant-a", None).await.unwrap();
        let second = workflow.close("tenant-a", period.id, "someone-else", None).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unbalanced_entries_block_close() {
        let (workflow, periods, journal) = workflow();
        let period = seed_period(&periods, "tenant-a").await;

        let entry_id = Uuid::new_v4();
        let entry = JournalEntry {
            id: entry_id,
            tenant_id: "tenant-a".to_string(),
            source_module: "invoice".to_string(),
            source_event_id: "evt_unbalanced".to_string(),
            source_subject: "inv_1".to_string(),
            posted_at: period.period_start + chrono::Duration::days(1),
            currency: "USD".to_string(),
            description: None,
            reference_type: None,
            reference_id: None,
            reverses_entry_id: None,
            created_at: Utc::now(),
        };
        let lines = vec![JournalLine {
            journal_entry_id: entry_id,
            line_no: 0,
            account_ref: "accounts_receivable".to_string(),
            debit_minor: 1000,
            credit_minor: 0,
            memo: None,
        }];
        journal.insert(entry, lines).await.unwrap();

        let err = workflow.close("tenant-a", period.id, "admin@tenant-a", None).await.unwrap_err();
        assert_eq!(err.status_code(), 409);
    }
}
