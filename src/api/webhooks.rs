use super::{ApiResult, AppState};
use crate::core::payment::{SIGNATURE_HEADER, WebhookOutcome};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};
use chrono::Utc;
use std::sync::Arc;

/// Takes the raw body so the signature is checked against the exact bytes received.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookOutcome>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let outcome = state
        .payments
        .handle_webhook(&body, signature, Utc::now())
        .await?;
    Ok(Json(outcome))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/payment", post(payment_webhook))
}
