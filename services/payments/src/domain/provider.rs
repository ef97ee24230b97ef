//! Normalized contract every payment backend implements.
//!
//! Providers are stateless with respect to the ledger: they report what the
//! backend says and never touch intents, payments or refunds themselves.

#![allow(async_fn_in_trait)]

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use payflow_domain::event::NormalizedEvent;
use payflow_domain::status::{IntentStatus, RefundStatus};

use crate::error::PaymentServiceError;

/// Closed set of payment backends the engine can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Reference,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reference => "reference",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = PaymentServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reference" => Ok(Self::Reference),
            other => Err(PaymentServiceError::UnknownProvider(other.to_owned())),
        }
    }
}

/// How the reference backend should resolve a confirmation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Simulation {
    Succeed,
    Fail,
    RequireAction,
    #[default]
    SucceedLater,
    FailLater,
}

#[derive(Debug, Clone)]
pub struct CreateIntentRequest {
    pub amount: Decimal,
    pub currency: String,
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedIntent {
    pub provider_intent_id: String,
    pub client_secret: Option<String>,
    pub status: IntentStatus,
}

#[derive(Debug, Clone)]
pub struct ConfirmIntentRequest {
    pub provider_intent_id: String,
    pub idempotency_key: String,
    pub payment_method: Option<String>,
    pub simulate: Option<Simulation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmOutcome {
    /// One of `processing | succeeded | failed | requires_action`.
    pub status: IntentStatus,
    pub provider_txn_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Next step for the payer when `status` is `requires_action`.
    pub action_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub provider_txn_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub idempotency_key: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundOutcome {
    pub provider_refund_id: String,
    pub status: RefundStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Outcome of checking an inbound webhook.
///
/// `valid` with no `event` means the notification is authentic but of a type
/// the engine does not act on.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookVerification {
    pub valid: bool,
    pub event: Option<NormalizedEvent>,
    pub error: Option<String>,
}

impl WebhookVerification {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            event: None,
            error: Some(reason.into()),
        }
    }

    pub fn accepted(event: Option<NormalizedEvent>) -> Self {
        Self {
            valid: true,
            event,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderIntentStatus {
    pub status: IntentStatus,
    pub provider_txn_id: Option<String>,
}

pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<CreatedIntent, PaymentServiceError>;

    async fn confirm_intent(
        &self,
        request: &ConfirmIntentRequest,
    ) -> Result<ConfirmOutcome, PaymentServiceError>;

    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, PaymentServiceError>;

    /// Check the signature of a raw notification and normalize it.
    async fn verify_webhook(
        &self,
        payload: &str,
        signature: Option<&str>,
    ) -> Result<WebhookVerification, PaymentServiceError>;

    /// Provider's current view of an intent. Used for reconciliation only.
    async fn query_status(
        &self,
        provider_intent_id: &str,
    ) -> Result<ProviderIntentStatus, PaymentServiceError>;
}

/// Resolves a [`ProviderKind`] to its client.
pub trait ProviderDirectory: Send + Sync {
    type Client: PaymentProvider;

    fn provider(&self, kind: ProviderKind) -> &Self::Client;
}
