//! Invoice + line items (SPEC_FULL §3, §4.12).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "invoice_status", rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Void,
    Uncollectible,
    PastDue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "line_item_type", rename_all = "snake_case")]
pub enum LineItemType {
    Subscription,
    Usage,
    Tax,
    Discount,
    Fee,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub app_id: String,
    pub customer_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub status: InvoiceStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub billing_period_start: Option<DateTime<Utc>>,
    pub billing_period_end: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub item_type: LineItemType,
    pub description: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

impl LineItem {
    pub fn total_cents(&self) -> i64 {
        self.unit_price_cents * self.quantity as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub app_id: String,
    pub customer_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub currency: String,
    pub billing_period_start: Option<DateTime<Utc>>,
    pub billing_period_end: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub line_items: Vec<NewLineItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLineItem {
    pub item_type: LineItemType,
    pub description: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
}
