use super::{ApiResult, AppState, UserId};
use crate::core::redemption::{ClaimLookup, GoalSetup, Redemption};
use axum::{Json, Router, extract::State, routing::post};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
struct LookupRequest {
    code: String,
}

/// Anyone holding a code may look it up; no identity required.
async fn lookup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LookupRequest>,
) -> ApiResult<Json<ClaimLookup>> {
    Ok(Json(state.engine.lookup_claim(&body.code, Utc::now()).await?))
}

#[derive(Deserialize)]
struct RedeemRequest {
    code: String,
    #[serde(flatten)]
    setup: GoalSetup,
}

async fn redeem(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Json(body): Json<RedeemRequest>,
) -> ApiResult<Json<Redemption>> {
    let redemption = state
        .engine
        .redeem(&user_id, &body.code, body.setup, Utc::now())
        .await?;
    Ok(Json(redemption))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/claims/lookup", post(lookup))
        .route("/claims/redeem", post(redeem))
}
