#![allow(async_fn_in_trait)]

use chrono::{DateTime, Utc};

use payflow_domain::event::NormalizedEvent;
use payflow_domain::id::{IntentId, OrderId, PaymentId, RefundId, WebhookEventId};

use crate::domain::provider::ProviderKind;
use crate::domain::types::{
    EventLinks, InsertOutcome, NewWebhookEvent, Order, Payment, PaymentAttempt, PaymentIntent,
    Refund, WebhookEvent,
};
use crate::error::PaymentServiceError;

/// Read access to orders; the engine never creates them.
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, PaymentServiceError>;
}

pub trait IntentRepository: Send + Sync {
    async fn find_by_id(&self, id: IntentId) -> Result<Option<PaymentIntent>, PaymentServiceError>;

    /// Most recent non-terminal intent of an order.
    async fn find_open_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Option<PaymentIntent>, PaymentServiceError>;

    async fn create(&self, intent: &PaymentIntent) -> Result<(), PaymentServiceError>;

    /// Move an awaiting intent to `processing`. Returns `false` when the intent
    /// already moved on (e.g. a webhook settled it first).
    async fn mark_processing(
        &self,
        id: IntentId,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentServiceError>;

    /// Open intents untouched since `cutoff` whose order is still unpaid.
    async fn list_expired(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<PaymentIntent>, PaymentServiceError>;

    /// Fail an expired intent, append its attempt row and update the order's
    /// last-attempt fields in one transaction. Returns `false` if the intent
    /// changed since it was listed.
    async fn expire(
        &self,
        intent: &PaymentIntent,
        attempt: &PaymentAttempt,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentServiceError>;
}

pub trait PaymentRepository: Send + Sync {
    async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>, PaymentServiceError>;

    /// Settled payment of an order that still has something left to refund.
    async fn find_refundable_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Option<Payment>, PaymentServiceError>;

    /// Succeeded payments whose order never recorded the settlement.
    async fn list_unsettled(&self, limit: u64) -> Result<Vec<Payment>, PaymentServiceError>;
}

pub trait RefundRepository: Send + Sync {
    /// Insert a `requested` refund and flag the order's refund status.
    async fn create(&self, refund: &Refund) -> Result<(), PaymentServiceError>;

    async fn find_by_id(&self, id: RefundId) -> Result<Option<Refund>, PaymentServiceError>;

    /// Refund of an order that is not `failed`, if any.
    async fn find_active_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Option<Refund>, PaymentServiceError>;

    /// `requested -> processing` once the provider accepted the request.
    async fn mark_submitted(
        &self,
        id: RefundId,
        provider_refund_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentServiceError>;

    /// `requested -> failed` when the provider rejected the call outright.
    async fn mark_rejected(
        &self,
        id: RefundId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentServiceError>;

    /// `failed -> requested` with a fresh idempotency key.
    async fn reset_for_retry(
        &self,
        id: RefundId,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentServiceError>;
}

pub trait AttemptRepository: Send + Sync {
    async fn record(&self, attempt: &PaymentAttempt) -> Result<(), PaymentServiceError>;
}

/// Storage of every inbound and synthesized event.
pub trait WebhookEventRepository: Send + Sync {
    /// Insert keyed on `(provider, event_id)`; an existing row is returned untouched.
    async fn insert_if_absent(
        &self,
        event: &NewWebhookEvent,
    ) -> Result<InsertOutcome, PaymentServiceError>;

    async fn find_by_event_id(
        &self,
        provider: ProviderKind,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, PaymentServiceError>;

    async fn mark_processed(
        &self,
        id: WebhookEventId,
        links: &EventLinks,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentServiceError>;

    /// Record a processing failure. `bump_retry` counts it against the replay budget.
    async fn mark_failed(
        &self,
        id: WebhookEventId,
        error: &str,
        bump_retry: bool,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentServiceError>;

    /// `failed` rows under the retry budget plus `received` rows older than `stale_before`.
    async fn list_replayable(
        &self,
        max_retries: i32,
        stale_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<WebhookEvent>, PaymentServiceError>;
}

/// Applies one normalized event to the ledger atomically.
pub trait EventProcessor: Send + Sync {
    async fn process(
        &self,
        event: &NormalizedEvent,
        now: DateTime<Utc>,
    ) -> Result<EventLinks, PaymentServiceError>;
}
