use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;

/// Payment service error variants.
#[derive(Debug, thiserror::Error)]
pub enum PaymentServiceError {
    #[error("provider {0} is not configured")]
    NotConfigured(String),
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),
    #[error("unknown provider {0:?}")]
    UnknownProvider(String),
    #[error("order not found")]
    OrderNotFound,
    #[error("payment intent not found")]
    IntentNotFound,
    #[error("payment not found")]
    PaymentNotFound,
    #[error("refund not found")]
    RefundNotFound,
    #[error("amount {actual} does not match order amount {expected}")]
    PriceMismatch { expected: Decimal, actual: Decimal },
    #[error("event amount {actual} does not match intent amount {expected}")]
    AmountMismatch { expected: Decimal, actual: Decimal },
    #[error("{0}")]
    Validation(String),
    #[error("another payment intent is in progress for this order")]
    IntentInProgress,
    #[error("{0}")]
    InvalidState(String),
    #[error("a refund is already in progress for this order")]
    RefundInProgress,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl PaymentServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "NOT_CONFIGURED",
            Self::InvalidSignature(_) => "INVALID_SIGNATURE",
            Self::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::IntentNotFound => "INTENT_NOT_FOUND",
            Self::PaymentNotFound => "PAYMENT_NOT_FOUND",
            Self::RefundNotFound => "REFUND_NOT_FOUND",
            Self::PriceMismatch { .. } => "PRICE_MISMATCH",
            Self::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            Self::Validation(_) => "VALIDATION",
            Self::IntentInProgress => "INTENT_IN_PROGRESS",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::RefundInProgress => "REFUND_IN_PROGRESS",
            Self::Provider(_) => "PROVIDER",
            Self::MalformedEvent(_) => "MALFORMED_EVENT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidSignature(_) | Self::MalformedEvent(_) | Self::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::UnknownProvider(_)
            | Self::OrderNotFound
            | Self::IntentNotFound
            | Self::PaymentNotFound
            | Self::RefundNotFound => StatusCode::NOT_FOUND,
            Self::PriceMismatch { .. } | Self::AmountMismatch { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::IntentInProgress | Self::InvalidState(_) | Self::RefundInProgress => {
                StatusCode::CONFLICT
            }
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// `"KIND: message"`, the form persisted on failed webhook events and attempts.
    pub fn summary(&self) -> String {
        match self {
            // keep the root cause on the row; the response only says "internal error"
            Self::Internal(e) => format!("{}: {e:#}", self.kind()),
            other => format!("{}: {other}", other.kind()),
        }
    }
}

impl IntoResponse for PaymentServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // TraceLayer records every request; only internal errors need their chain logged.
        if let Self::Internal(ref e) = self {
            tracing::error!(error = %format!("{e:#}"), kind = "INTERNAL", "internal error");
        }
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
