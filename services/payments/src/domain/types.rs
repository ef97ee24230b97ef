use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use payflow_domain::id::{
    AttemptId, IntentId, OrderId, PaymentId, RefundId, WebhookEventId,
};
use payflow_domain::status::{
    AttemptKind, IntentStatus, OrderPaymentStatus, OrderStatus, PaymentStatus, RefundStatus,
    WebhookEventStatus,
};

use crate::domain::provider::ProviderKind;

/// Error code recorded when the expiry sweep fails an abandoned intent.
pub const INTENT_EXPIRED: &str = "INTENT_EXPIRED";

/// Payment-facing view of an order.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: OrderPaymentStatus,
    pub refund_status: Option<RefundStatus>,
    pub refund_amount: Option<Decimal>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub last_payment_status: Option<String>,
    pub last_payment_error: Option<String>,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub id: IntentId,
    pub order_id: OrderId,
    pub provider: ProviderKind,
    pub provider_intent_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: IntentStatus,
    pub idempotency_key: String,
    pub client_secret: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub intent_id: IntentId,
    pub provider: ProviderKind,
    pub provider_txn_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Refund {
    pub id: RefundId,
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub intent_id: IntentId,
    pub provider: ProviderKind,
    pub provider_refund_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: RefundStatus,
    pub reason: Option<String>,
    pub idempotency_key: String,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ledger rows an event touched; written back onto its webhook event row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventLinks {
    pub order_id: Option<OrderId>,
    pub intent_id: Option<IntentId>,
    pub payment_id: Option<PaymentId>,
    pub refund_id: Option<RefundId>,
}

#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: WebhookEventId,
    pub provider: ProviderKind,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub signature: Option<String>,
    pub status: WebhookEventStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub links: EventLinks,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Row to insert for a newly seen event.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub provider: ProviderKind,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub signature: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Result of insert-if-absent on `(provider, event_id)`.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(WebhookEvent),
    Existing(WebhookEvent),
}

#[derive(Debug, Clone)]
pub struct PaymentAttempt {
    pub id: AttemptId,
    pub order_id: OrderId,
    pub intent_id: Option<IntentId>,
    pub refund_id: Option<RefundId>,
    pub provider: ProviderKind,
    pub kind: AttemptKind,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
