use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use std::time::Duration;

const LEDGER_TIMEOUT: Duration = Duration::from_secs(5);

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Upload ledger unreachable")
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match tokio::time::timeout(LEDGER_TIMEOUT, state.core.ledger.health_check()).await {
        Ok(Ok(())) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Ledger health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable", "ledger": "error" })),
            )
        }
        Err(_) => {
            tracing::error!("Ledger health check timed out");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable", "ledger": "timeout" })),
            )
        }
    }
}
