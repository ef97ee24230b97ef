use std::sync::Arc;

use tracing::{debug, warn};

use payflow_core::clock::Clock;

use crate::domain::provider::{PaymentProvider, ProviderDirectory, ProviderKind};
use crate::domain::repository::{EventProcessor, WebhookEventRepository};
use crate::error::PaymentServiceError;
use crate::usecase::event_store::{EventStore, IngestOutcome};

pub struct ReceiveWebhookInput {
    pub provider: String,
    pub payload: String,
    pub signature: Option<String>,
}

/// Acknowledgement returned to the provider.
///
/// `outcome` is `None` for authentic notifications of a type the engine ignores.
#[derive(Debug, Clone)]
pub struct WebhookReceipt {
    pub received: bool,
    pub event_id: Option<String>,
    pub outcome: Option<IngestOutcome>,
}

pub struct ReceiveWebhookUseCase<D, W, P>
where
    D: ProviderDirectory,
    W: WebhookEventRepository,
    P: EventProcessor,
{
    pub providers: D,
    pub store: EventStore<W, P>,
    pub clock: Arc<dyn Clock>,
}

impl<D, W, P> ReceiveWebhookUseCase<D, W, P>
where
    D: ProviderDirectory,
    W: WebhookEventRepository,
    P: EventProcessor,
{
    pub async fn execute(
        &self,
        input: ReceiveWebhookInput,
    ) -> Result<WebhookReceipt, PaymentServiceError> {
        let kind: ProviderKind = input.provider.parse()?;
        let provider = self.providers.provider(kind);

        let verification = provider
            .verify_webhook(&input.payload, input.signature.as_deref())
            .await?;
        if !verification.valid {
            let reason = verification
                .error
                .unwrap_or_else(|| "signature rejected".to_owned());
            warn!(provider = %kind, reason = %reason, "webhook signature rejected");
            return Err(PaymentServiceError::InvalidSignature(reason));
        }

        let Some(event) = verification.event else {
            debug!(provider = %kind, "webhook acknowledged without a ledger event");
            return Ok(WebhookReceipt {
                received: true,
                event_id: None,
                outcome: None,
            });
        };

        let outcome = self
            .store
            .record(&event, input.signature.as_deref(), self.clock.now())
            .await?;
        Ok(WebhookReceipt {
            received: true,
            event_id: Some(outcome.event_id.clone()),
            outcome: Some(outcome),
        })
    }
}
