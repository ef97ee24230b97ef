pub mod intents;
pub mod refunds;
pub mod webhook;

use axum::extract::State;
use axum::http::StatusCode;

use crate::state::AppState;

/// Handler for `GET /readyz`: ready once the database answers.
pub async fn readyz(State(state): State<AppState>) -> StatusCode {
    payflow_core::health::database_ready(&state.db).await
}
