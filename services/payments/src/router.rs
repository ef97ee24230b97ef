use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;

use payflow_core::health::healthz;
use payflow_core::middleware::{propagate_request_id_layer, request_id_layer, trace_layer};

use crate::handlers::{
    intents::{confirm_intent, create_intent, get_intent},
    readyz,
    refunds::{request_refund, retry_refund},
    webhook::receive_webhook,
};
use crate::state::AppState;

/// Header carrying the provider's webhook signature.
pub const SIGNATURE_HEADER: &str = "x-payflow-signature";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Provider notifications
        .route("/webhooks/{provider}", post(receive_webhook))
        // Checkout
        .route("/payments/intents", post(create_intent))
        .route("/payments/intents/{id}", get(get_intent))
        .route("/payments/intents/{id}/confirm", post(confirm_intent))
        // Refunds
        .route("/orders/{id}/refunds", post(request_refund))
        .route("/refunds/{id}/retry", post(retry_refund))
        .layer(
            ServiceBuilder::new()
                .layer(request_id_layer())
                .layer(trace_layer())
                .layer(propagate_request_id_layer()),
        )
        .with_state(state)
}
