//! In-memory reference backend.
//!
//! Behaves like a hosted card processor: intents are created and confirmed
//! synchronously, while settlement and refunds are announced later through
//! signed webhooks. Webhooks are queued against the injected clock and handed
//! out by [`ReferenceProvider::take_due`] once their delay has elapsed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use payflow_core::clock::Clock;
use payflow_domain::event::{EventData, EventType, NormalizedEvent};
use payflow_domain::status::{IntentStatus, RefundStatus};

use crate::config::ReferenceProviderConfig;
use crate::domain::provider::{
    ConfirmIntentRequest, ConfirmOutcome, CreateIntentRequest, CreatedIntent, PaymentProvider,
    ProviderIntentStatus, ProviderKind, RefundOutcome, RefundRequest, Simulation,
    WebhookVerification,
};
use crate::error::PaymentServiceError;
use crate::infra::provider::signature;

const SECRET_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const DECLINE_CODE: &str = "card_declined";
const DECLINE_MESSAGE: &str = "Your card was declined.";
const REFUND_FAILURE: &str = "insufficient_funds";

/// A signed notification ready to be delivered to the webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub provider: ProviderKind,
    pub payload: String,
    pub signature: String,
}

#[derive(Clone)]
pub struct ReferenceProvider {
    inner: Arc<Inner>,
}

struct Inner {
    config: ReferenceProviderConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<SimState>,
}

#[derive(Default)]
struct SimState {
    intents: HashMap<String, SimIntent>,
    refunds: HashMap<String, SimRefund>,
    created: HashMap<String, CreatedIntent>,
    confirmed: HashMap<String, ConfirmOutcome>,
    refunded: HashMap<String, RefundOutcome>,
    outbox: Vec<Scheduled>,
    fail_refunds: bool,
}

struct SimIntent {
    amount: Decimal,
    currency: String,
    status: IntentStatus,
    txn_id: Option<String>,
    metadata: serde_json::Value,
}

struct SimRefund {
    payment_intent: String,
    txn_id: String,
    amount: Decimal,
    currency: String,
    status: RefundStatus,
}

struct Scheduled {
    due_at: DateTime<Utc>,
    notice: Notice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
    RequiresAction,
}

enum Notice {
    Payment { intent: String, outcome: Outcome },
    Refund { refund: String, succeeded: bool },
}

// ── Wire format ───────────────────────────────────────────────────────────────

const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
const PAYMENT_FAILED: &str = "payment_intent.payment_failed";
const PAYMENT_REQUIRES_ACTION: &str = "payment_intent.requires_action";
const REFUND_SUCCEEDED: &str = "refund.succeeded";
const REFUND_FAILED: &str = "refund.failed";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    created: i64,
    data: EnvelopeData<T>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeData<T> {
    object: T,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireObject {
    id: String,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: String,
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    latest_charge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    charge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payment_intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_payment_error: Option<WireError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireError {
    code: String,
    message: String,
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

fn client_secret(intent_id: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..24)
        .map(|_| SECRET_CHARSET[rng.random_range(0..SECRET_CHARSET.len())] as char)
        .collect();
    format!("{intent_id}_secret_{suffix}")
}

impl ReferenceProvider {
    pub fn new(config: ReferenceProviderConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                state: Mutex::new(SimState::default()),
            }),
        }
    }

    fn secret(&self) -> Result<&str, PaymentServiceError> {
        self.inner
            .config
            .webhook_secret
            .as_deref()
            .ok_or_else(|| PaymentServiceError::NotConfigured(ProviderKind::Reference.to_string()))
    }

    pub fn is_configured(&self) -> bool {
        self.inner.config.webhook_secret.is_some()
    }

    /// Make every subsequent refund fail when its webhook fires.
    pub fn set_refund_failure(&self, fail: bool) {
        self.inner.state.lock().fail_refunds = fail;
    }

    /// Number of webhooks still waiting for their due time.
    pub fn pending_webhooks(&self) -> usize {
        self.inner.state.lock().outbox.len()
    }

    /// Remove and sign every webhook whose due time has passed, oldest first.
    /// Deferred outcomes (`*_later`, refunds) take effect on the backend here.
    pub fn take_due(&self) -> Vec<WebhookDelivery> {
        let Ok(secret) = self.secret() else {
            return Vec::new();
        };
        let now = self.inner.clock.now();
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let (mut due, pending): (Vec<_>, Vec<_>) =
            state.outbox.drain(..).partition(|s| s.due_at <= now);
        state.outbox = pending;
        due.sort_by_key(|s| s.due_at);

        due.into_iter()
            .filter_map(|scheduled| {
                let envelope = state.fire(scheduled.notice, now)?;
                let payload = match serde_json::to_string(&envelope) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "failed to encode reference webhook");
                        return None;
                    }
                };
                match signature::sign(secret, now.timestamp(), &payload) {
                    Ok(signature) => Some(WebhookDelivery {
                        provider: ProviderKind::Reference,
                        payload,
                        signature,
                    }),
                    Err(e) => {
                        warn!(error = %e, "failed to sign reference webhook");
                        None
                    }
                }
            })
            .collect()
    }

    fn schedule(&self, state: &mut SimState, notice: Notice) {
        let due_at = self.inner.clock.now() + self.inner.config.webhook_delay;
        state.outbox.push(Scheduled { due_at, notice });
    }

    fn normalize(&self, payload: &str) -> Result<Option<NormalizedEvent>, PaymentServiceError> {
        let envelope: Envelope<serde_json::Value> = serde_json::from_str(payload)
            .map_err(|e| PaymentServiceError::MalformedEvent(e.to_string()))?;
        let event_type = match envelope.kind.as_str() {
            PAYMENT_SUCCEEDED => EventType::PaymentSucceeded,
            PAYMENT_FAILED => EventType::PaymentFailed,
            PAYMENT_REQUIRES_ACTION => EventType::PaymentRequiresAction,
            REFUND_SUCCEEDED => EventType::RefundSucceeded,
            REFUND_FAILED => EventType::RefundFailed,
            other => {
                debug!(event_id = %envelope.id, kind = other, "ignoring reference event type");
                return Ok(None);
            }
        };
        let object: WireObject = serde_json::from_value(envelope.data.object)
            .map_err(|e| PaymentServiceError::MalformedEvent(e.to_string()))?;
        let created_at = DateTime::from_timestamp(envelope.created, 0).ok_or_else(|| {
            PaymentServiceError::MalformedEvent(format!("bad created timestamp {}", envelope.created))
        })?;

        let (error_code, error_message) = match object.last_payment_error {
            Some(err) => (Some(err.code), Some(err.message)),
            None => (object.failure_reason, None),
        };
        let data = if event_type.is_refund() {
            EventData {
                provider_intent_id: object.payment_intent,
                provider_txn_id: object.charge,
                provider_refund_id: Some(object.id),
                amount: object.amount,
                currency: object.currency.to_ascii_uppercase(),
                status: object.status,
                error_code,
                error_message,
                metadata: object.metadata,
            }
        } else {
            EventData {
                provider_intent_id: Some(object.id),
                provider_txn_id: object.latest_charge,
                provider_refund_id: None,
                amount: object.amount,
                currency: object.currency.to_ascii_uppercase(),
                status: object.status,
                error_code,
                error_message,
                metadata: object.metadata,
            }
        };
        Ok(Some(NormalizedEvent {
            event_id: envelope.id,
            event_type,
            provider: ProviderKind::Reference.as_str().to_owned(),
            created_at,
            data,
        }))
    }
}

impl SimState {
    /// Apply a due notice to the backend and render its envelope.
    fn fire(&mut self, notice: Notice, now: DateTime<Utc>) -> Option<Envelope<WireObject>> {
        let (kind, object) = match notice {
            Notice::Payment { intent, outcome } => {
                let sim = self.intents.get_mut(&intent)?;
                match outcome {
                    Outcome::Succeeded => {
                        sim.status = IntentStatus::Succeeded;
                        if sim.txn_id.is_none() {
                            sim.txn_id = Some(new_id("ch"));
                        }
                    }
                    Outcome::Failed => sim.status = IntentStatus::Failed,
                    Outcome::RequiresAction => sim.status = IntentStatus::RequiresAction,
                }
                let kind = match outcome {
                    Outcome::Succeeded => PAYMENT_SUCCEEDED,
                    Outcome::Failed => PAYMENT_FAILED,
                    Outcome::RequiresAction => PAYMENT_REQUIRES_ACTION,
                };
                let object = WireObject {
                    id: intent,
                    amount: sim.amount,
                    currency: sim.currency.to_ascii_lowercase(),
                    status: sim.status.as_str().to_owned(),
                    latest_charge: sim.txn_id.clone(),
                    charge: None,
                    payment_intent: None,
                    last_payment_error: (outcome == Outcome::Failed).then(|| WireError {
                        code: DECLINE_CODE.to_owned(),
                        message: DECLINE_MESSAGE.to_owned(),
                    }),
                    failure_reason: None,
                    metadata: Some(sim.metadata.clone()),
                };
                (kind, object)
            }
            Notice::Refund { refund, succeeded } => {
                let sim = self.refunds.get_mut(&refund)?;
                sim.status = if succeeded {
                    RefundStatus::Succeeded
                } else {
                    RefundStatus::Failed
                };
                let object = WireObject {
                    id: refund,
                    amount: sim.amount,
                    currency: sim.currency.to_ascii_lowercase(),
                    status: sim.status.as_str().to_owned(),
                    latest_charge: None,
                    charge: Some(sim.txn_id.clone()),
                    payment_intent: Some(sim.payment_intent.clone()),
                    last_payment_error: None,
                    failure_reason: (!succeeded).then(|| REFUND_FAILURE.to_owned()),
                    metadata: None,
                };
                (if succeeded { REFUND_SUCCEEDED } else { REFUND_FAILED }, object)
            }
        };
        Some(Envelope {
            id: new_id("evt"),
            kind: kind.to_owned(),
            created: now.timestamp(),
            data: EnvelopeData { object },
        })
    }
}

impl PaymentProvider for ReferenceProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Reference
    }

    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<CreatedIntent, PaymentServiceError> {
        self.secret()?;
        let mut state = self.inner.state.lock();
        if let Some(existing) = state.created.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }
        let id = new_id("pi");
        let created = CreatedIntent {
            client_secret: Some(client_secret(&id)),
            provider_intent_id: id.clone(),
            status: IntentStatus::RequiresConfirmation,
        };
        state.intents.insert(
            id,
            SimIntent {
                amount: request.amount,
                currency: request.currency.clone(),
                status: IntentStatus::RequiresConfirmation,
                txn_id: None,
                metadata: request.metadata.clone(),
            },
        );
        state
            .created
            .insert(request.idempotency_key.clone(), created.clone());
        Ok(created)
    }

    async fn confirm_intent(
        &self,
        request: &ConfirmIntentRequest,
    ) -> Result<ConfirmOutcome, PaymentServiceError> {
        self.secret()?;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if let Some(existing) = state.confirmed.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }
        let sim = state
            .intents
            .get_mut(&request.provider_intent_id)
            .ok_or_else(|| {
                PaymentServiceError::Provider(format!(
                    "no such payment intent {}",
                    request.provider_intent_id
                ))
            })?;

        let mut outcome = ConfirmOutcome {
            status: IntentStatus::Processing,
            provider_txn_id: None,
            error_code: None,
            error_message: None,
            action_data: None,
        };
        let mut notice = None;
        if sim.status == IntentStatus::Succeeded {
            outcome.status = IntentStatus::Succeeded;
            outcome.provider_txn_id = sim.txn_id.clone();
        } else {
            let intent = request.provider_intent_id.clone();
            match request.simulate.unwrap_or_default() {
                Simulation::Succeed => {
                    let txn_id = new_id("ch");
                    sim.status = IntentStatus::Succeeded;
                    sim.txn_id = Some(txn_id.clone());
                    outcome.status = IntentStatus::Succeeded;
                    outcome.provider_txn_id = Some(txn_id);
                    notice = Some(Notice::Payment { intent, outcome: Outcome::Succeeded });
                }
                Simulation::Fail => {
                    sim.status = IntentStatus::Failed;
                    outcome.status = IntentStatus::Failed;
                    outcome.error_code = Some(DECLINE_CODE.to_owned());
                    outcome.error_message = Some(DECLINE_MESSAGE.to_owned());
                    notice = Some(Notice::Payment { intent, outcome: Outcome::Failed });
                }
                Simulation::RequireAction => {
                    sim.status = IntentStatus::RequiresAction;
                    outcome.status = IntentStatus::RequiresAction;
                    outcome.action_data = Some(serde_json::json!({
                        "type": "redirect_to_url",
                        "url": format!("https://reference.invalid/authenticate/{intent}"),
                    }));
                    notice = Some(Notice::Payment { intent, outcome: Outcome::RequiresAction });
                }
                Simulation::SucceedLater => {
                    sim.status = IntentStatus::Processing;
                    notice = Some(Notice::Payment { intent, outcome: Outcome::Succeeded });
                }
                Simulation::FailLater => {
                    sim.status = IntentStatus::Processing;
                    notice = Some(Notice::Payment { intent, outcome: Outcome::Failed });
                }
            }
        }
        if let Some(notice) = notice {
            self.schedule(state, notice);
        }
        state
            .confirmed
            .insert(request.idempotency_key.clone(), outcome.clone());
        Ok(outcome)
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, PaymentServiceError> {
        self.secret()?;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if let Some(existing) = state.refunded.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }
        let (intent_id, charged) = state
            .intents
            .iter()
            .find(|(_, sim)| sim.txn_id.as_deref() == Some(request.provider_txn_id.as_str()))
            .map(|(id, sim)| (id.clone(), sim.amount))
            .ok_or_else(|| {
                PaymentServiceError::Provider(format!("no such charge {}", request.provider_txn_id))
            })?;
        if request.amount > charged {
            return Err(PaymentServiceError::Provider(format!(
                "refund {} exceeds charge {charged}",
                request.amount
            )));
        }

        let refund_id = new_id("re");
        state.refunds.insert(
            refund_id.clone(),
            SimRefund {
                payment_intent: intent_id,
                txn_id: request.provider_txn_id.clone(),
                amount: request.amount,
                currency: request.currency.clone(),
                status: RefundStatus::Processing,
            },
        );
        let succeeded = !state.fail_refunds;
        self.schedule(
            state,
            Notice::Refund {
                refund: refund_id.clone(),
                succeeded,
            },
        );
        let outcome = RefundOutcome {
            provider_refund_id: refund_id,
            status: RefundStatus::Processing,
            error_code: None,
            error_message: None,
        };
        state
            .refunded
            .insert(request.idempotency_key.clone(), outcome.clone());
        Ok(outcome)
    }

    async fn verify_webhook(
        &self,
        payload: &str,
        signature: Option<&str>,
    ) -> Result<WebhookVerification, PaymentServiceError> {
        let secret = self.secret()?;
        let Some(header) = signature else {
            return Ok(WebhookVerification::rejected("missing signature header"));
        };
        let now = self.inner.clock.now();
        if let Err(e) = signature::verify(
            secret,
            payload,
            header,
            now,
            self.inner.config.signature_tolerance,
        ) {
            return Ok(WebhookVerification::rejected(e.to_string()));
        }
        Ok(WebhookVerification::accepted(self.normalize(payload)?))
    }

    async fn query_status(
        &self,
        provider_intent_id: &str,
    ) -> Result<ProviderIntentStatus, PaymentServiceError> {
        self.secret()?;
        let state = self.inner.state.lock();
        let sim = state.intents.get(provider_intent_id).ok_or_else(|| {
            PaymentServiceError::Provider(format!("no such payment intent {provider_intent_id}"))
        })?;
        Ok(ProviderIntentStatus {
            status: sim.status,
            provider_txn_id: sim.txn_id.clone(),
        })
    }
}
