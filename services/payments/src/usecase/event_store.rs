//! Idempotent ingestion of normalized events.
//!
//! Every ledger mutation enters here, whether the event came from a provider
//! webhook, a synchronous confirmation or a reconciliation job.

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use payflow_domain::event::NormalizedEvent;
use payflow_domain::id::WebhookEventId;
use payflow_domain::status::WebhookEventStatus;

use crate::domain::provider::ProviderKind;
use crate::domain::repository::{EventProcessor, WebhookEventRepository};
use crate::domain::types::{InsertOutcome, NewWebhookEvent, WebhookEvent};
use crate::error::PaymentServiceError;

/// What happened to one recorded event.
///
/// `is_new == false` is the duplicate case: the row already existed and the
/// ledger was not touched.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub webhook_event_id: WebhookEventId,
    pub event_id: String,
    pub is_new: bool,
    pub status: WebhookEventStatus,
    pub error: Option<String>,
}

pub struct EventStore<W, P>
where
    W: WebhookEventRepository,
    P: EventProcessor,
{
    pub events: W,
    pub processor: P,
}

impl<W, P> EventStore<W, P>
where
    W: WebhookEventRepository,
    P: EventProcessor,
{
    /// Persist `event` once and apply it on first sight.
    ///
    /// A processing failure is not an error for the caller: the row is left
    /// `failed` for the replay job and the outcome says so.
    pub async fn record(
        &self,
        event: &NormalizedEvent,
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, PaymentServiceError> {
        let provider: ProviderKind = event.provider.parse()?;
        let payload = serde_json::to_value(event).context("encode normalized event")?;
        let new = NewWebhookEvent {
            provider,
            event_id: event.event_id.clone(),
            event_type: event.event_type.as_str().to_owned(),
            payload,
            signature: signature.map(str::to_owned),
            received_at: now,
        };

        let row = match self.events.insert_if_absent(&new).await? {
            InsertOutcome::Existing(row) => {
                info!(
                    event_id = %row.event_id,
                    provider = %row.provider,
                    status = %row.status,
                    "duplicate event ignored"
                );
                return Ok(IngestOutcome {
                    webhook_event_id: row.id,
                    event_id: row.event_id,
                    is_new: false,
                    status: row.status,
                    error: row.last_error,
                });
            }
            InsertOutcome::Inserted(row) => row,
        };

        let (status, error) = self.apply(&row, event, false, now).await?;
        Ok(IngestOutcome {
            webhook_event_id: row.id,
            event_id: row.event_id,
            is_new: true,
            status,
            error,
        })
    }

    /// Re-run a stored row through the processor. Failures count against
    /// the row's retry budget.
    pub async fn replay(
        &self,
        row: &WebhookEvent,
        now: DateTime<Utc>,
    ) -> Result<WebhookEventStatus, PaymentServiceError> {
        let event: NormalizedEvent = match serde_json::from_value(row.payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                let err = PaymentServiceError::MalformedEvent(e.to_string());
                warn!(event_id = %row.event_id, error = %err, "stored event payload unreadable");
                self.events.mark_failed(row.id, &err.summary(), true, now).await?;
                return Ok(WebhookEventStatus::Failed);
            }
        };
        debug!(event_id = %row.event_id, retry_count = row.retry_count, "replaying event");
        let (status, _) = self.apply(row, &event, true, now).await?;
        Ok(status)
    }

    async fn apply(
        &self,
        row: &WebhookEvent,
        event: &NormalizedEvent,
        bump_retry: bool,
        now: DateTime<Utc>,
    ) -> Result<(WebhookEventStatus, Option<String>), PaymentServiceError> {
        match self.processor.process(event, now).await {
            Ok(links) => {
                self.events.mark_processed(row.id, &links, now).await?;
                info!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    provider = %event.provider,
                    order_id = ?links.order_id,
                    intent_id = ?links.intent_id,
                    refund_id = ?links.refund_id,
                    "event processed"
                );
                Ok((WebhookEventStatus::Processed, None))
            }
            Err(e) => {
                let summary = e.summary();
                warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    provider = %event.provider,
                    error = %summary,
                    "event processing failed"
                );
                self.events.mark_failed(row.id, &summary, bump_retry, now).await?;
                Ok((WebhookEventStatus::Failed, Some(summary)))
            }
        }
    }
}
