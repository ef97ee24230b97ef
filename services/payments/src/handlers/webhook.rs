use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::PaymentServiceError;
use crate::router::SIGNATURE_HEADER;
use crate::state::AppState;
use crate::usecase::webhook::{ReceiveWebhookInput, ReceiveWebhookUseCase};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookError {
    pub error: String,
}

/// `POST /webhooks/{provider}`. The body is passed through untouched since
/// the signature covers the raw bytes.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let usecase = ReceiveWebhookUseCase {
        providers: state.providers.clone(),
        store: state.event_store(),
        clock: state.clock.clone(),
    };
    match usecase
        .execute(ReceiveWebhookInput {
            provider,
            payload: body,
            signature,
        })
        .await
    {
        Ok(receipt) => (
            StatusCode::OK,
            Json(WebhookAck {
                received: receipt.received,
                event_id: receipt.event_id,
            }),
        )
            .into_response(),
        Err(e) => {
            if let PaymentServiceError::Internal(ref inner) = e {
                tracing::error!(error = %format!("{inner:#}"), "webhook ingestion failed");
            }
            (
                e.status_code(),
                Json(WebhookError {
                    error: e.kind().to_owned(),
                }),
            )
                .into_response()
        }
    }
}
