//! Idempotency Store (SPEC_FULL §4.2), grounded in the `check_idempotency`
//! middleware pattern: hash the request body, look up the key before
//! running the handler, replay a cached response on conflict, persist a
//! fresh record on success. The HTTP middleware in `billing-api` is a thin
//! wrapper around `begin`/`finalize` below — this module owns the policy.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::IdempotencyRecord;
use crate::repository::IdempotencyRepository;

/// Outcome of checking an `Idempotency-Key` before running a handler.
pub enum IdempotencyOutcome {
    /// No record existed; the caller should run its handler and call
    /// [`IdempotencyStore::finalize`] with the result.
    Fresh,
    /// A record existed with a matching request hash; replay it verbatim
    /// without re-running the handler.
    Replay { status_code: i32, body: JsonValue },
}

pub struct IdempotencyStore {
    repo: Arc<dyn IdempotencyRepository>,
    ttl_hours: i64,
}

impl IdempotencyStore {
    pub fn new(repo: Arc<dyn IdempotencyRepository>, ttl_hours: i64) -> Self {
        Self { repo, ttl_hours }
    }

    /// SHA-256 of the serialized request body, hex-encoded. Two requests
    /// under the same key with different hashes is a client bug, not a
    /// retry, and is rejected as a conflict rather than silently replayed.
    pub fn hash_request(body: &[u8]) -> String {
        format!("{:x}", Sha256::digest(body))
    }

    /// SPEC_FULL §4.2: same key + same hash -> replay; same key + different
    /// hash -> Conflict; no existing record -> Fresh.
    pub async fn begin(&self, app_id: &str, key: &str, request_hash: &str) -> Result<IdempotencyOutcome> {
        match self.repo.find(app_id, key).await? {
            Some(existing) if existing.expires_at < Utc::now() => Ok(IdempotencyOutcome::Fresh),
            Some(existing) if existing.request_hash == request_hash => Ok(IdempotencyOutcome::Replay {
                status_code: existing.status_code,
                body: existing.response_body,
            }),
            Some(_) => Err(Error::conflict(
                "Idempotency-Key reuse with a different request payload",
            )),
            None => Ok(IdempotencyOutcome::Fresh),
        }
    }

    /// Persists the handler's response for future replays. Only called
    /// after a `Fresh` outcome; callers only cache successful responses
    /// (2xx) per SPEC_FULL §4.2 — failed requests are safe to retry as-is.
    pub async fn finalize(
        &self,
        app_id: &str,
        key: &str,
        request_hash: &str,
        status_code: i32,
        response_body: JsonValue,
    ) -> Result<()> {
        let now = Utc::now();
        let record = IdempotencyRecord {
            app_id: app_id.to_string(),
            idempotency_key: key.to_string(),
            request_hash: request_hash.to_string(),
            status_code,
            response_body,
            expires_at: now + Duration::hours(self.ttl_hours),
            created_at: now,
        };
        self.repo.insert(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryIdempotencyRepository;
    use serde_json::json;

    fn store() -> IdempotencyStore {
        IdempotencyStore::new(Arc::new(InMemoryIdempotencyRepository::default()), 24)
    }

    #[tokio::test]
    async fn fresh_key_returns_fresh() {
        let store = store();
        let outcome = store.begin("tenant-a", "key-1", "hash-1").await.unwrap();
        assert!(matches!(outcome, IdempotencyOutcome::Fresh));
    }

    #[tokio::test]
    async fn matching_replay_returns_cached_response() {
        let store = store();
        store
            .finalize("tenant-a", "key-1", "hash-1", 201, json!({"id": "ch_1"}))
            .await
            .unwrap();

        let outcome = store.begin("tenant-a", "key-1", "hash-1").await.unwrap();
        match outcome {
            IdempotencyOutcome::Replay { status_code, body } => {
                assert_eq!(status_code, 201);
                assert_eq!(body, json!({"id": "ch_1"}));
            }
            IdempotencyOutcome::Fresh => panic!("expected replay"),
        }
    }

    #[tokio::test]
    async fn mismatched_hash_is_conflict() {
        let store = store();
        store
            .finalize("tenant-a", "key-1", "hash-1", 201, json!({"id": "ch_1"}))
            .await
            .unwrap();

        let err = store.begin("tenant-a", "key-1", "hash-2").await.unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn hash_request_is_deterministic() {
        assert_eq!(
            IdempotencyStore::hash_request(b"payload"),
            IdempotencyStore::hash_request(b"payload")
        );
        assert_ne!(
            IdempotencyStore::hash_request(b"payload-a"),
            IdempotencyStore::hash_request(b"payload-b")
        );
    }
}
