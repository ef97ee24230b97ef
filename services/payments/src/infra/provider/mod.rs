pub mod reference;
pub mod signature;

use crate::domain::provider::{
    ConfirmIntentRequest, ConfirmOutcome, CreateIntentRequest, CreatedIntent, PaymentProvider,
    ProviderDirectory, ProviderIntentStatus, ProviderKind, RefundOutcome, RefundRequest,
    WebhookVerification,
};
use crate::error::PaymentServiceError;

use self::reference::ReferenceProvider;

/// Every backend the service ships with, dispatched statically.
#[derive(Clone)]
pub enum Provider {
    Reference(ReferenceProvider),
}

impl PaymentProvider for Provider {
    fn kind(&self) -> ProviderKind {
        match self {
            Self::Reference(p) => p.kind(),
        }
    }

    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<CreatedIntent, PaymentServiceError> {
        match self {
            Self::Reference(p) => p.create_intent(request).await,
        }
    }

    async fn confirm_intent(
        &self,
        request: &ConfirmIntentRequest,
    ) -> Result<ConfirmOutcome, PaymentServiceError> {
        match self {
            Self::Reference(p) => p.confirm_intent(request).await,
        }
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, PaymentServiceError> {
        match self {
            Self::Reference(p) => p.refund(request).await,
        }
    }

    async fn verify_webhook(
        &self,
        payload: &str,
        signature: Option<&str>,
    ) -> Result<WebhookVerification, PaymentServiceError> {
        match self {
            Self::Reference(p) => p.verify_webhook(payload, signature).await,
        }
    }

    async fn query_status(
        &self,
        provider_intent_id: &str,
    ) -> Result<ProviderIntentStatus, PaymentServiceError> {
        match self {
            Self::Reference(p) => p.query_status(provider_intent_id).await,
        }
    }
}

/// Kind-to-client lookup shared by handlers and jobs.
#[derive(Clone)]
pub struct ProviderRegistry {
    reference: Provider,
}

impl ProviderRegistry {
    pub fn new(reference: ReferenceProvider) -> Self {
        Self {
            reference: Provider::Reference(reference),
        }
    }

    pub fn reference(&self) -> &ReferenceProvider {
        match &self.reference {
            Provider::Reference(p) => p,
        }
    }
}

impl ProviderDirectory for ProviderRegistry {
    type Client = Provider;

    fn provider(&self, kind: ProviderKind) -> &Provider {
        match kind {
            ProviderKind::Reference => &self.reference,
        }
    }
}
