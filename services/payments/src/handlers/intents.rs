use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use payflow_core::serde::to_rfc3339_ms;
use payflow_domain::id::{IntentId, OrderId};
use payflow_domain::status::IntentStatus;

use crate::domain::provider::{ProviderKind, Simulation};
use crate::domain::types::PaymentIntent;
use crate::error::PaymentServiceError;
use crate::state::AppState;
use crate::usecase::intent::{
    ConfirmIntentInput, ConfirmIntentUseCase, CreateIntentInput, CreateIntentUseCase,
    QueryIntentStatusUseCase,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub order_id: OrderId,
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Reference
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmIntentRequest {
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub simulate: Option<Simulation>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResponse {
    pub id: IntentId,
    pub order_id: OrderId,
    pub provider: ProviderKind,
    pub provider_intent_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub status: IntentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<IntentStatus>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub updated_at: DateTime<Utc>,
}

impl From<PaymentIntent> for IntentResponse {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            id: intent.id,
            order_id: intent.order_id,
            provider: intent.provider,
            provider_intent_id: intent.provider_intent_id,
            amount: intent.amount,
            currency: intent.currency,
            status: intent.status,
            client_secret: intent.client_secret,
            last_error: intent.last_error,
            action_data: None,
            provider_status: None,
            created_at: intent.created_at,
            updated_at: intent.updated_at,
        }
    }
}

pub async fn create_intent(
    State(state): State<AppState>,
    Json(body): Json<CreateIntentRequest>,
) -> Result<(StatusCode, Json<IntentResponse>), PaymentServiceError> {
    let usecase = CreateIntentUseCase {
        orders: state.order_repo(),
        intents: state.intent_repo(),
        providers: state.providers.clone(),
        clock: state.clock.clone(),
    };
    let intent = usecase
        .execute(CreateIntentInput {
            order_id: body.order_id,
            provider: body.provider,
            amount: body.amount,
            currency: body.currency,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(intent.into())))
}

pub async fn confirm_intent(
    State(state): State<AppState>,
    Path(id): Path<IntentId>,
    body: Option<Json<ConfirmIntentRequest>>,
) -> Result<Json<IntentResponse>, PaymentServiceError> {
    let Json(body) = body.unwrap_or_default();
    let usecase = ConfirmIntentUseCase {
        intents: state.intent_repo(),
        attempts: state.attempt_repo(),
        providers: state.providers.clone(),
        store: state.event_store(),
        clock: state.clock.clone(),
    };
    let confirmed = usecase
        .execute(ConfirmIntentInput {
            intent_id: id,
            payment_method: body.payment_method,
            simulate: body.simulate,
        })
        .await?;
    let mut response = IntentResponse::from(confirmed.intent);
    response.action_data = confirmed.action_data;
    Ok(Json(response))
}

pub async fn get_intent(
    State(state): State<AppState>,
    Path(id): Path<IntentId>,
) -> Result<Json<IntentResponse>, PaymentServiceError> {
    let usecase = QueryIntentStatusUseCase {
        intents: state.intent_repo(),
        providers: state.providers.clone(),
    };
    let view = usecase.execute(id).await?;
    let provider_status = view.provider_status.map(|p| p.status);
    let mut response = IntentResponse::from(view.intent);
    response.provider_status = provider_status;
    Ok(Json(response))
}
