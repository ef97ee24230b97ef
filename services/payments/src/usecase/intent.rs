use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use payflow_core::clock::Clock;
use payflow_domain::event::{EventData, EventType, NormalizedEvent};
use payflow_domain::id::{AttemptId, IntentId, OrderId};
use payflow_domain::money::{Amount, Currency};
use payflow_domain::status::{AttemptKind, IntentStatus, OrderPaymentStatus, OrderStatus};

use crate::domain::provider::{
    ConfirmIntentRequest, ConfirmOutcome, CreateIntentRequest, PaymentProvider,
    ProviderDirectory, ProviderIntentStatus, ProviderKind, Simulation,
};
use crate::domain::repository::{
    AttemptRepository, EventProcessor, IntentRepository, OrderRepository, WebhookEventRepository,
};
use crate::domain::types::{PaymentAttempt, PaymentIntent};
use crate::error::PaymentServiceError;
use crate::usecase::event_store::EventStore;

// ── CreateIntent ──────────────────────────────────────────────────────────────

pub struct CreateIntentInput {
    pub order_id: OrderId,
    pub provider: ProviderKind,
    pub amount: Decimal,
    pub currency: String,
}

pub struct CreateIntentUseCase<O, I, D>
where
    O: OrderRepository,
    I: IntentRepository,
    D: ProviderDirectory,
{
    pub orders: O,
    pub intents: I,
    pub providers: D,
    pub clock: Arc<dyn Clock>,
}

impl<O, I, D> CreateIntentUseCase<O, I, D>
where
    O: OrderRepository,
    I: IntentRepository,
    D: ProviderDirectory,
{
    pub async fn execute(
        &self,
        input: CreateIntentInput,
    ) -> Result<PaymentIntent, PaymentServiceError> {
        let amount = Amount::new(input.amount)
            .map_err(|e| PaymentServiceError::Validation(e.to_string()))?;
        let currency = input
            .currency
            .parse::<Currency>()
            .map_err(|e| PaymentServiceError::Validation(e.to_string()))?;

        let order = self
            .orders
            .find_by_id(input.order_id)
            .await?
            .ok_or(PaymentServiceError::OrderNotFound)?;
        if order.status != OrderStatus::PendingPayment
            || order.payment_status != OrderPaymentStatus::Unpaid
        {
            return Err(PaymentServiceError::InvalidState(format!(
                "order is {} / {}, not awaiting payment",
                order.status, order.payment_status
            )));
        }
        if amount.value() != order.amount {
            return Err(PaymentServiceError::PriceMismatch {
                expected: order.amount,
                actual: amount.value(),
            });
        }
        if !currency.as_str().eq_ignore_ascii_case(&order.currency) {
            return Err(PaymentServiceError::Validation(format!(
                "currency {currency} does not match order currency {}",
                order.currency
            )));
        }

        if let Some(open) = self.intents.find_open_for_order(order.id).await? {
            if open.status == IntentStatus::RequiresConfirmation && open.provider == input.provider
            {
                return Ok(open);
            }
            return Err(PaymentServiceError::IntentInProgress);
        }

        let id = IntentId::new();
        let idempotency_key = format!("intent_{}_{}", order.id, id);
        let created = self
            .providers
            .provider(input.provider)
            .create_intent(&CreateIntentRequest {
                amount: order.amount,
                currency: order.currency.clone(),
                idempotency_key: idempotency_key.clone(),
                metadata: json!({ "orderId": order.id, "intentId": id }),
            })
            .await?;

        let now = self.clock.now();
        let intent = PaymentIntent {
            id,
            order_id: order.id,
            provider: input.provider,
            provider_intent_id: created.provider_intent_id,
            amount: order.amount,
            currency: order.currency,
            status: created.status,
            idempotency_key,
            client_secret: created.client_secret,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.intents.create(&intent).await?;
        info!(
            intent_id = %intent.id,
            order_id = %intent.order_id,
            provider = %intent.provider,
            provider_intent_id = %intent.provider_intent_id,
            "payment intent created"
        );
        Ok(intent)
    }
}

// ── ConfirmIntent ─────────────────────────────────────────────────────────────

pub struct ConfirmIntentInput {
    pub intent_id: IntentId,
    pub payment_method: Option<String>,
    pub simulate: Option<Simulation>,
}

#[derive(Debug, Clone)]
pub struct ConfirmedIntent {
    pub intent: PaymentIntent,
    /// Provider instructions for the payer when the intent requires action.
    pub action_data: Option<serde_json::Value>,
}

pub struct ConfirmIntentUseCase<I, A, D, W, P>
where
    I: IntentRepository,
    A: AttemptRepository,
    D: ProviderDirectory,
    W: WebhookEventRepository,
    P: EventProcessor,
{
    pub intents: I,
    pub attempts: A,
    pub providers: D,
    pub store: EventStore<W, P>,
    pub clock: Arc<dyn Clock>,
}

impl<I, A, D, W, P> ConfirmIntentUseCase<I, A, D, W, P>
where
    I: IntentRepository,
    A: AttemptRepository,
    D: ProviderDirectory,
    W: WebhookEventRepository,
    P: EventProcessor,
{
    pub async fn execute(
        &self,
        input: ConfirmIntentInput,
    ) -> Result<ConfirmedIntent, PaymentServiceError> {
        let intent = self
            .intents
            .find_by_id(input.intent_id)
            .await?
            .ok_or(PaymentServiceError::IntentNotFound)?;
        match intent.status {
            IntentStatus::Succeeded => {
                return Ok(ConfirmedIntent {
                    intent,
                    action_data: None,
                });
            }
            IntentStatus::Failed => {
                return Err(PaymentServiceError::InvalidState(
                    "payment intent has failed; create a new one".to_owned(),
                ));
            }
            IntentStatus::Processing => {
                return Err(PaymentServiceError::InvalidState(
                    "payment intent is already processing".to_owned(),
                ));
            }
            IntentStatus::RequiresConfirmation | IntentStatus::RequiresAction => {}
        }

        let now = self.clock.now();
        let result = self
            .providers
            .provider(intent.provider)
            .confirm_intent(&ConfirmIntentRequest {
                provider_intent_id: intent.provider_intent_id.clone(),
                idempotency_key: format!("confirm_{}_{}", intent.id, now.timestamp_millis()),
                payment_method: input.payment_method,
                simulate: input.simulate,
            })
            .await;

        let attempt = match &result {
            Ok(outcome) => PaymentAttempt {
                id: AttemptId::new(),
                order_id: intent.order_id,
                intent_id: Some(intent.id),
                refund_id: None,
                provider: intent.provider,
                kind: AttemptKind::Confirm,
                status: outcome.status.as_str().to_owned(),
                error_code: outcome.error_code.clone(),
                error_message: outcome.error_message.clone(),
                created_at: now,
            },
            Err(e) => PaymentAttempt {
                id: AttemptId::new(),
                order_id: intent.order_id,
                intent_id: Some(intent.id),
                refund_id: None,
                provider: intent.provider,
                kind: AttemptKind::Confirm,
                status: "error".to_owned(),
                error_code: Some(e.kind().to_owned()),
                error_message: Some(e.to_string()),
                created_at: now,
            },
        };
        self.attempts.record(&attempt).await?;
        let outcome = result?;

        let action_data = outcome.action_data.clone();
        match outcome.status {
            IntentStatus::Processing => {
                if !self.intents.mark_processing(intent.id, now).await? {
                    info!(intent_id = %intent.id, "intent moved on before confirm returned");
                }
            }
            IntentStatus::Succeeded | IntentStatus::Failed | IntentStatus::RequiresAction => {
                let event = sync_event(&intent, &outcome, now);
                let ingest = self.store.record(&event, None, now).await?;
                info!(
                    intent_id = %intent.id,
                    event_id = %ingest.event_id,
                    status = %outcome.status,
                    processed = %ingest.status,
                    "synchronous confirm result recorded"
                );
            }
            IntentStatus::RequiresConfirmation => {
                warn!(intent_id = %intent.id, "provider left intent awaiting confirmation");
            }
        }

        let intent = self
            .intents
            .find_by_id(intent.id)
            .await?
            .ok_or(PaymentServiceError::IntentNotFound)?;
        Ok(ConfirmedIntent {
            intent,
            action_data,
        })
    }
}

/// Event standing in for the webhook a terminal confirm result implies.
fn sync_event(
    intent: &PaymentIntent,
    outcome: &ConfirmOutcome,
    now: chrono::DateTime<chrono::Utc>,
) -> NormalizedEvent {
    let event_type = match outcome.status {
        IntentStatus::Succeeded => EventType::PaymentSucceeded,
        IntentStatus::Failed => EventType::PaymentFailed,
        _ => EventType::PaymentRequiresAction,
    };
    NormalizedEvent {
        event_id: format!("sync_{}_{}", intent.id, now.timestamp_millis()),
        event_type,
        provider: intent.provider.as_str().to_owned(),
        created_at: now,
        data: EventData {
            provider_intent_id: Some(intent.provider_intent_id.clone()),
            provider_txn_id: outcome.provider_txn_id.clone(),
            provider_refund_id: None,
            amount: intent.amount,
            currency: intent.currency.clone(),
            status: outcome.status.as_str().to_owned(),
            error_code: outcome.error_code.clone(),
            error_message: outcome.error_message.clone(),
            metadata: outcome.action_data.clone(),
        },
    }
}

// ── QueryIntentStatus ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IntentStatusView {
    pub intent: PaymentIntent,
    /// `None` when the provider could not be asked.
    pub provider_status: Option<ProviderIntentStatus>,
}

impl IntentStatusView {
    pub fn diverged(&self) -> bool {
        self.provider_status
            .as_ref()
            .is_some_and(|p| p.status != self.intent.status)
    }
}

pub struct QueryIntentStatusUseCase<I, D>
where
    I: IntentRepository,
    D: ProviderDirectory,
{
    pub intents: I,
    pub providers: D,
}

impl<I, D> QueryIntentStatusUseCase<I, D>
where
    I: IntentRepository,
    D: ProviderDirectory,
{
    /// Engine and provider views of one intent. Read only: divergence is
    /// logged and left for events or reconciliation to resolve.
    pub async fn execute(&self, intent_id: IntentId) -> Result<IntentStatusView, PaymentServiceError> {
        let intent = self
            .intents
            .find_by_id(intent_id)
            .await?
            .ok_or(PaymentServiceError::IntentNotFound)?;
        let provider_status = match self
            .providers
            .provider(intent.provider)
            .query_status(&intent.provider_intent_id)
            .await
        {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(intent_id = %intent.id, error = %e, "provider status query failed");
                None
            }
        };
        let view = IntentStatusView {
            intent,
            provider_status,
        };
        if view.diverged() {
            warn!(
                intent_id = %view.intent.id,
                engine_status = %view.intent.status,
                provider_status = ?view.provider_status.as_ref().map(|p| p.status),
                "provider and engine disagree on intent status"
            );
        }
        Ok(view)
    }
}
