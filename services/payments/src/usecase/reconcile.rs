//! Periodic corrections. Each job works one batch per run and reports what
//! it did; the worker decides when to run them.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, error, info, warn};

use payflow_core::clock::Clock;
use payflow_domain::event::{EventData, EventType, NormalizedEvent};
use payflow_domain::id::AttemptId;
use payflow_domain::status::{AttemptKind, IntentStatus, PaymentStatus, WebhookEventStatus};

use crate::domain::provider::{PaymentProvider, ProviderDirectory};
use crate::domain::repository::{
    EventProcessor, IntentRepository, PaymentRepository, WebhookEventRepository,
};
use crate::domain::types::{INTENT_EXPIRED, PaymentAttempt};
use crate::error::PaymentServiceError;
use crate::usecase::event_store::EventStore;

/// Per-run counters of a reconciliation job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    pub scanned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

// ── Replay ────────────────────────────────────────────────────────────────────

pub struct ReplayEventsUseCase<W, P>
where
    W: WebhookEventRepository,
    P: EventProcessor,
{
    pub store: EventStore<W, P>,
    pub clock: Arc<dyn Clock>,
    pub max_retries: i32,
    pub stale_after: Duration,
    pub batch_size: u64,
}

impl<W, P> ReplayEventsUseCase<W, P>
where
    W: WebhookEventRepository,
    P: EventProcessor,
{
    pub async fn execute(&self) -> Result<JobReport, PaymentServiceError> {
        let now = self.clock.now();
        let rows = self
            .store
            .events
            .list_replayable(self.max_retries, now - self.stale_after, self.batch_size)
            .await?;

        let mut report = JobReport {
            scanned: rows.len(),
            ..JobReport::default()
        };
        for row in &rows {
            match self.store.replay(row, now).await {
                Ok(WebhookEventStatus::Processed) => report.succeeded += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    error!(event_id = %row.event_id, error = %e.summary(), "replay aborted");
                    report.failed += 1;
                }
            }
        }
        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                processed = report.succeeded,
                failed = report.failed,
                "replayed stored events"
            );
        }
        Ok(report)
    }
}

// ── Reconcile payments ────────────────────────────────────────────────────────

pub struct ReconcilePaymentsUseCase<Pay, I, W, P>
where
    Pay: PaymentRepository,
    I: IntentRepository,
    W: WebhookEventRepository,
    P: EventProcessor,
{
    pub payments: Pay,
    pub intents: I,
    pub store: EventStore<W, P>,
    pub clock: Arc<dyn Clock>,
    pub batch_size: u64,
}

impl<Pay, I, W, P> ReconcilePaymentsUseCase<Pay, I, W, P>
where
    Pay: PaymentRepository,
    I: IntentRepository,
    W: WebhookEventRepository,
    P: EventProcessor,
{
    /// Push a corrective `payment.succeeded` through the event store for
    /// every settled payment whose order was never marked paid.
    pub async fn execute(&self) -> Result<JobReport, PaymentServiceError> {
        let payments = self.payments.list_unsettled(self.batch_size).await?;
        let mut report = JobReport {
            scanned: payments.len(),
            ..JobReport::default()
        };

        for payment in payments {
            let Some(intent) = self.intents.find_by_id(payment.intent_id).await? else {
                warn!(payment_id = %payment.id, intent_id = %payment.intent_id, "payment has no intent");
                report.failed += 1;
                continue;
            };
            let now = self.clock.now();
            let event = NormalizedEvent {
                event_id: format!("reconcile_payment_{}", payment.id),
                event_type: EventType::PaymentSucceeded,
                provider: payment.provider.as_str().to_owned(),
                created_at: now,
                data: EventData {
                    provider_intent_id: Some(intent.provider_intent_id),
                    provider_txn_id: payment.provider_txn_id.clone(),
                    provider_refund_id: None,
                    amount: payment.amount,
                    currency: payment.currency.clone(),
                    status: PaymentStatus::Succeeded.as_str().to_owned(),
                    error_code: None,
                    error_message: None,
                    metadata: None,
                },
            };
            let outcome = match self.store.record(&event, None, now).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(payment_id = %payment.id, error = %e.summary(), "reconcile aborted");
                    report.failed += 1;
                    continue;
                }
            };
            if !outcome.is_new {
                debug!(payment_id = %payment.id, "payment already reconciled once");
                report.skipped += 1;
            } else if outcome.status == WebhookEventStatus::Processed {
                info!(
                    payment_id = %payment.id,
                    order_id = %payment.order_id,
                    "order settled by reconciliation"
                );
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }
        Ok(report)
    }
}

// ── Expire intents ────────────────────────────────────────────────────────────

pub struct ExpireIntentsUseCase<I, D>
where
    I: IntentRepository,
    D: ProviderDirectory,
{
    pub intents: I,
    pub providers: D,
    pub clock: Arc<dyn Clock>,
    pub expiry: Duration,
    pub batch_size: u64,
}

impl<I, D> ExpireIntentsUseCase<I, D>
where
    I: IntentRepository,
    D: ProviderDirectory,
{
    /// Fail open intents untouched for longer than `expiry` on unpaid orders.
    pub async fn execute(&self) -> Result<JobReport, PaymentServiceError> {
        let now = self.clock.now();
        let cutoff = now - self.expiry;
        let intents = self.intents.list_expired(cutoff, self.batch_size).await?;
        let mut report = JobReport {
            scanned: intents.len(),
            ..JobReport::default()
        };

        for intent in intents {
            // Read-only check; a late success still arrives as an event.
            match self
                .providers
                .provider(intent.provider)
                .query_status(&intent.provider_intent_id)
                .await
            {
                Ok(remote) if remote.status == IntentStatus::Succeeded => warn!(
                    intent_id = %intent.id,
                    provider_intent_id = %intent.provider_intent_id,
                    "expiring intent the provider reports as succeeded"
                ),
                Ok(_) => {}
                Err(e) => debug!(intent_id = %intent.id, error = %e, "provider status unavailable"),
            }

            let attempt = PaymentAttempt {
                id: AttemptId::new(),
                order_id: intent.order_id,
                intent_id: Some(intent.id),
                refund_id: None,
                provider: intent.provider,
                kind: AttemptKind::Expire,
                status: IntentStatus::Failed.as_str().to_owned(),
                error_code: Some(INTENT_EXPIRED.to_owned()),
                error_message: Some("payment intent expired before completion".to_owned()),
                created_at: now,
            };
            if self.intents.expire(&intent, &attempt, cutoff, now).await? {
                info!(intent_id = %intent.id, order_id = %intent.order_id, "payment intent expired");
                report.succeeded += 1;
            } else {
                report.skipped += 1;
            }
        }
        Ok(report)
    }
}
