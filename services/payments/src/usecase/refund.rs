use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use payflow_core::clock::Clock;
use payflow_domain::event::{EventData, EventType, NormalizedEvent};
use payflow_domain::id::{AttemptId, OrderId, RefundId};
use payflow_domain::money::Amount;
use payflow_domain::status::{AttemptKind, OrderPaymentStatus, RefundStatus};

use crate::domain::provider::{PaymentProvider, ProviderDirectory, RefundOutcome, RefundRequest};
use crate::domain::repository::{
    AttemptRepository, EventProcessor, OrderRepository, PaymentRepository, RefundRepository,
    WebhookEventRepository,
};
use crate::domain::types::{Payment, PaymentAttempt, Refund};
use crate::error::PaymentServiceError;
use crate::usecase::event_store::EventStore;

pub struct RequestRefundInput {
    pub order_id: OrderId,
    pub amount: Decimal,
    pub reason: Option<String>,
}

/// Refund requests and manual retries of failed refunds.
///
/// Both paths submit through the same routine; a synchronous terminal result
/// is recorded as an event so the processor stays the only writer of refund
/// outcomes.
pub struct RefundUseCase<O, Pay, R, A, D, W, P>
where
    O: OrderRepository,
    Pay: PaymentRepository,
    R: RefundRepository,
    A: AttemptRepository,
    D: ProviderDirectory,
    W: WebhookEventRepository,
    P: EventProcessor,
{
    pub orders: O,
    pub payments: Pay,
    pub refunds: R,
    pub attempts: A,
    pub providers: D,
    pub store: EventStore<W, P>,
    pub clock: Arc<dyn Clock>,
}

fn idempotency_key(id: RefundId, now: DateTime<Utc>) -> String {
    format!("refund_{id}_{}", now.timestamp_millis())
}

impl<O, Pay, R, A, D, W, P> RefundUseCase<O, Pay, R, A, D, W, P>
where
    O: OrderRepository,
    Pay: PaymentRepository,
    R: RefundRepository,
    A: AttemptRepository,
    D: ProviderDirectory,
    W: WebhookEventRepository,
    P: EventProcessor,
{
    pub async fn request(&self, input: RequestRefundInput) -> Result<Refund, PaymentServiceError> {
        let amount = Amount::new(input.amount)
            .map_err(|e| PaymentServiceError::Validation(e.to_string()))?;

        let order = self
            .orders
            .find_by_id(input.order_id)
            .await?
            .ok_or(PaymentServiceError::OrderNotFound)?;
        if order.payment_status != OrderPaymentStatus::Paid {
            return Err(PaymentServiceError::InvalidState(format!(
                "order payment status is {}, only PAID orders can be refunded",
                order.payment_status
            )));
        }
        let payment = self
            .payments
            .find_refundable_for_order(order.id)
            .await?
            .ok_or(PaymentServiceError::PaymentNotFound)?;
        if amount.value() > payment.amount {
            return Err(PaymentServiceError::Validation(format!(
                "refund amount {amount} exceeds payment amount {}",
                payment.amount
            )));
        }
        let txn_id = charge_of(&payment)?;
        if self.refunds.find_active_for_order(order.id).await?.is_some() {
            return Err(PaymentServiceError::RefundInProgress);
        }

        let now = self.clock.now();
        let id = RefundId::new();
        let refund = Refund {
            id,
            order_id: order.id,
            payment_id: payment.id,
            intent_id: payment.intent_id,
            provider: payment.provider,
            provider_refund_id: None,
            amount: amount.value(),
            currency: payment.currency.clone(),
            status: RefundStatus::Requested,
            reason: input.reason,
            idempotency_key: idempotency_key(id, now),
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.refunds.create(&refund).await?;
        info!(
            refund_id = %refund.id,
            order_id = %refund.order_id,
            amount = %refund.amount,
            "refund requested"
        );
        self.submit(refund, txn_id, now).await
    }

    /// Resubmit a failed refund on the same row with a fresh idempotency key.
    pub async fn retry(&self, refund_id: RefundId) -> Result<Refund, PaymentServiceError> {
        let mut refund = self
            .refunds
            .find_by_id(refund_id)
            .await?
            .ok_or(PaymentServiceError::RefundNotFound)?;
        if refund.status != RefundStatus::Failed {
            return Err(PaymentServiceError::InvalidState(format!(
                "refund is {}, only failed refunds can be retried",
                refund.status
            )));
        }
        let payment = self
            .payments
            .find_by_id(refund.payment_id)
            .await?
            .ok_or(PaymentServiceError::PaymentNotFound)?;
        let txn_id = charge_of(&payment)?;

        let now = self.clock.now();
        let key = idempotency_key(refund.id, now);
        if !self.refunds.reset_for_retry(refund.id, &key, now).await? {
            return Err(PaymentServiceError::InvalidState(
                "refund changed while being retried".to_owned(),
            ));
        }
        refund.status = RefundStatus::Requested;
        refund.idempotency_key = key;
        refund.provider_refund_id = None;
        refund.last_error = None;
        info!(refund_id = %refund.id, order_id = %refund.order_id, "retrying refund");
        self.submit(refund, txn_id, now).await
    }

    async fn submit(
        &self,
        refund: Refund,
        provider_txn_id: String,
        now: DateTime<Utc>,
    ) -> Result<Refund, PaymentServiceError> {
        let result = self
            .providers
            .provider(refund.provider)
            .refund(&RefundRequest {
                provider_txn_id,
                amount: refund.amount,
                currency: refund.currency.clone(),
                idempotency_key: refund.idempotency_key.clone(),
                reason: refund.reason.clone(),
            })
            .await;

        let (status, error_code, error_message) = match &result {
            Ok(outcome) => (
                outcome.status.as_str().to_owned(),
                outcome.error_code.clone(),
                outcome.error_message.clone(),
            ),
            Err(e) => ("error".to_owned(), Some(e.kind().to_owned()), Some(e.to_string())),
        };
        self.attempts
            .record(&PaymentAttempt {
                id: AttemptId::new(),
                order_id: refund.order_id,
                intent_id: Some(refund.intent_id),
                refund_id: Some(refund.id),
                provider: refund.provider,
                kind: AttemptKind::Refund,
                status,
                error_code,
                error_message,
                created_at: now,
            })
            .await?;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(refund_id = %refund.id, error = %e, "provider rejected refund");
                self.refunds.mark_rejected(refund.id, &e.summary(), now).await?;
                return Err(e);
            }
        };

        if !self
            .refunds
            .mark_submitted(refund.id, &outcome.provider_refund_id, now)
            .await?
        {
            warn!(refund_id = %refund.id, "refund changed before submission was recorded");
        }
        if outcome.status.is_terminal() {
            let event = sync_refund_event(&refund, &outcome, now);
            let ingest = self.store.record(&event, None, now).await?;
            info!(
                refund_id = %refund.id,
                event_id = %ingest.event_id,
                processed = %ingest.status,
                "synchronous refund result recorded"
            );
        }

        self.refunds
            .find_by_id(refund.id)
            .await?
            .ok_or(PaymentServiceError::RefundNotFound)
    }
}

fn charge_of(payment: &Payment) -> Result<String, PaymentServiceError> {
    payment.provider_txn_id.clone().ok_or_else(|| {
        PaymentServiceError::InvalidState(format!(
            "payment {} has no provider transaction to refund",
            payment.id
        ))
    })
}

fn sync_refund_event(refund: &Refund, outcome: &RefundOutcome, now: DateTime<Utc>) -> NormalizedEvent {
    let event_type = if outcome.status == RefundStatus::Succeeded {
        EventType::RefundSucceeded
    } else {
        EventType::RefundFailed
    };
    NormalizedEvent {
        event_id: format!("sync_refund_{}_{}", refund.id, now.timestamp_millis()),
        event_type,
        provider: refund.provider.as_str().to_owned(),
        created_at: now,
        data: EventData {
            provider_intent_id: None,
            provider_txn_id: None,
            provider_refund_id: Some(outcome.provider_refund_id.clone()),
            amount: refund.amount,
            currency: refund.currency.clone(),
            status: outcome.status.as_str().to_owned(),
            error_code: outcome.error_code.clone(),
            error_message: outcome.error_message.clone(),
            metadata: None,
        },
    }
}
