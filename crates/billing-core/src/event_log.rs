//! Event black-box writer (SPEC_FULL §3, §9): an append-only audit
//! trail. `append` awaits the write for callers that need the durability
//! guarantee before returning; domain code that doesn't never blocks on
//! it, and a failed write never unwinds the caller's transaction.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Event, EventSource, NewEvent};
use crate::repository::EventRepository;

pub struct EventLog {
    repo: Arc<dyn EventRepository>,
}

impl EventLog {
    pub fn new(repo: Arc<dyn EventRepository>) -> Self {
        Self { repo }
    }

    /// Awaits the write; use when the caller needs a guarantee the event
    /// landed before it returns (e.g. webhook ingress dedupe markers).
    pub async fn append(&self, new_event: NewEvent) -> Result<()> {
        let event = Event {
            id: Uuid::new_v4(),
            app_id: new_event.app_id,
            event_type: new_event.event_type,
            source: new_event.source,
            entity_type: new_event.entity_type,
            entity_id: new_event.entity_id,
            payload: new_event.payload,
            created_at: chrono::Utc::now(),
        };
        self.repo.append(event).await
    }

    /// Fire-and-forget: spawns the write and swallows failures, logging a
    /// warning instead. Used on the hot path of API handlers so a slow or
    /// failing audit write never delays or breaks the caller's response.
    pub fn append_async(&self, new_event: NewEvent) {
        let repo = self.repo.clone();
        tokio::spawn(async move {
            let event = Event {
                id: Uuid::new_v4(),
                app_id: new_event.app_id,
                event_type: new_event.event_type,
                source: new_event.source,
                entity_type: new_event.entity_type,
                entity_id: new_event.entity_id,
                payload: new_event.payload,
                created_at: chrono::Utc::now(),
            };
            if let Err(err) = repo.append(event).await {
                warn!(error = %err, "failed to persist billing event");
            }
        });
    }

    pub async fn list_for_entity(&self, app_id: &str, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        self.repo.list_for_entity(app_id, entity_type, entity_id).await
    }

    pub async fn purge_older_than(&self, app_id: &str, older_than: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        self.repo.purge_older_than(app_id, older_than).await
    }
}

pub fn system_event(app_id: &str, event_type: &str, entity_type: &str, entity_id: &str, payload: JsonValue) -> NewEvent {
    NewEvent {
        app_id: app_id.to_string(),
        event_type: event_type.to_string(),
        source: EventSource::System,
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryEventRepository;
    use serde_json::json;

    #[tokio::test]
    async fn appended_event_is_listed_for_its_entity() {
        let repo = Arc::new(InMemoryEventRepository::default());
        let log = EventLog::new(repo);

        log.append(NewEvent {
            app_id: "tenant-a".to_string(),
            event_type: "charge.created".to_string(),
            source: EventSource::Api,
            entity_type: "charge".to_string(),
            entity_id: "ch_1".to_string(),
            payload: json!({"amount_cents": 500}),
        })
        .await
        .unwrap();

        let events = log.list_for_entity("tenant-a", "charge", "ch_1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "charge.created");
    }
}
