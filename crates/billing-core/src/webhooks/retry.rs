//! Retry Controller (SPEC_FULL §4.9): pure decision logic over the
//! backoff schedule and non-retriable error classes already defined on
//! [`crate::models::webhook`]. Kept side-effect-free so the schedule
//! itself is unit-testable without a repository.

use chrono::{DateTime, Utc};

use crate::models::{backoff_for_attempt, is_non_retriable, MAX_WEBHOOK_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt(DateTime<Utc>),
    DeadLetter,
}

pub struct RetryController;

impl RetryController {
    /// `attempt_number` is the 1-indexed attempt that just failed.
    pub fn decide(attempt_number: i32, error_code: &str) -> RetryDecision {
        if is_non_retriable(error_code) {
            return RetryDecision::DeadLetter;
        }
        if attempt_number >= MAX_WEBHOOK_ATTEMPTS {
            return RetryDecision::DeadLetter;
        }
        match backoff_for_attempt(attempt_number) {
            Some(delay) => RetryDecision::RetryAt(Utc::now() + delay),
            None => RetryDecision::DeadLetter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retriable_error_dead_letters_on_first_attempt() {
        assert_eq!(RetryController::decide(1, "signature_invalid"), RetryDecision::DeadLetter);
    }

    #[test]
    fn transient_error_schedules_a_retry() {
        match RetryController::decide(1, "payment_processor") {
            RetryDecision::RetryAt(_) => {}
            RetryDecision::DeadLetter => panic!("expected a retry"),
        }
    }

    #[test]
    fn fifth_failed_attempt_dead_letters() {
        assert_eq!(RetryController::decide(5, "payment_processor"), RetryDecision::DeadLetter);
    }
}
