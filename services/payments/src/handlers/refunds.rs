use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use payflow_core::serde::to_rfc3339_ms;
use payflow_domain::id::{IntentId, OrderId, PaymentId, RefundId};
use payflow_domain::status::RefundStatus;

use crate::domain::types::Refund;
use crate::error::PaymentServiceError;
use crate::infra::db::{
    DbAttemptRepository, DbOrderRepository, DbPaymentRepository, DbRefundRepository,
    DbWebhookEventRepository,
};
use crate::infra::ledger::DbEventProcessor;
use crate::infra::provider::ProviderRegistry;
use crate::state::AppState;
use crate::usecase::refund::{RefundUseCase, RequestRefundInput};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRefundRequest {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub id: RefundId,
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub intent_id: IntentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_refund_id: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub status: RefundStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub updated_at: DateTime<Utc>,
}

impl From<Refund> for RefundResponse {
    fn from(r: Refund) -> Self {
        Self {
            id: r.id,
            order_id: r.order_id,
            payment_id: r.payment_id,
            intent_id: r.intent_id,
            provider_refund_id: r.provider_refund_id,
            amount: r.amount,
            currency: r.currency,
            status: r.status,
            reason: r.reason,
            last_error: r.last_error,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn refund_usecase(
    state: &AppState,
) -> RefundUseCase<
    DbOrderRepository,
    DbPaymentRepository,
    DbRefundRepository,
    DbAttemptRepository,
    ProviderRegistry,
    DbWebhookEventRepository,
    DbEventProcessor,
> {
    RefundUseCase {
        orders: state.order_repo(),
        payments: state.payment_repo(),
        refunds: state.refund_repo(),
        attempts: state.attempt_repo(),
        providers: state.providers.clone(),
        store: state.event_store(),
        clock: state.clock.clone(),
    }
}

pub async fn request_refund(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    Json(body): Json<RequestRefundRequest>,
) -> Result<(StatusCode, Json<RefundResponse>), PaymentServiceError> {
    let refund = refund_usecase(&state)
        .request(RequestRefundInput {
            order_id,
            amount: body.amount,
            reason: body.reason,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(refund.into())))
}

pub async fn retry_refund(
    State(state): State<AppState>,
    Path(id): Path<RefundId>,
) -> Result<Json<RefundResponse>, PaymentServiceError> {
    let refund = refund_usecase(&state).retry(id).await?;
    Ok(Json(refund.into()))
}
