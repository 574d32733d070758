//! HTTP surface.
//!
//! Handlers are thin: they extract the caller and the request body, call one
//! [`GoalEngine`] or [`PaymentProcessor`] operation, and map the crate error onto a
//! status code through [`ApiError`]. The caller is identified by the `x-user-id` header.

mod claims;
mod error;
mod goals;
mod webhooks;

pub use error::{ApiError, ApiResult};

use crate::{
    core::{engine::GoalEngine, payment::PaymentProcessor},
    errors::Error,
};
use axum::{Json, Router, extract::FromRequestParts, http::request::Parts, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared state handed to every handler.
pub struct AppState {
    /// Goal operations
    pub engine: GoalEngine,
    /// Payment webhook processing
    pub payments: PaymentProcessor,
}

/// Authenticated caller, taken from the `x-user-id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self(value.to_string()))
            .ok_or(ApiError(Error::Unauthenticated))
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Builds the application router.
pub fn app_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(goals::router())
        .merge(claims::router())
        .merge(webhooks::router());

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .with_state(state)
}
