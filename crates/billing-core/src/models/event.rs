//! Append-only forensics/dispatch log (SPEC_FULL §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "event_source", rename_all = "snake_case")]
pub enum EventSource {
    Api,
    Webhook,
    System,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub app_id: String,
    pub event_type: String,
    pub source: EventSource,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub app_id: String,
    pub event_type: String,
    pub source: EventSource,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: serde_json::Value,
}
