use super::{ApiResult, AppState, UserId};
use crate::core::{
    approval::GoalSuggestion,
    engine::{GoalView, SessionOutcome},
};
use crate::entities::{goal, goal_hint};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post, put},
};
use chrono::Utc;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

const DEFAULT_HISTORY_LIMIT: u64 = 20;

async fn get_goal(
    Path(goal_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> ApiResult<Json<GoalView>> {
    Ok(Json(state.engine.goal_view(goal_id, &user_id).await?))
}

async fn list_goals(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> ApiResult<Json<Vec<GoalView>>> {
    Ok(Json(state.engine.list_goals(&user_id).await?))
}

async fn start_session(
    Path(goal_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> ApiResult<Json<goal::Model>> {
    let goal = state.engine.start_session(goal_id, &user_id, Utc::now()).await?;
    Ok(Json(goal))
}

async fn finish_session(
    Path(goal_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> ApiResult<Json<SessionOutcome>> {
    let outcome = state.engine.finish_session(goal_id, &user_id, Utc::now()).await?;
    Ok(Json(outcome))
}

async fn cancel_session(
    Path(goal_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> ApiResult<Json<goal::Model>> {
    let goal = state.engine.cancel_session(goal_id, &user_id, Utc::now()).await?;
    Ok(Json(goal))
}

#[derive(Serialize)]
struct HintResponse {
    session: i32,
    hint: String,
}

async fn get_hint(
    Path((goal_id, session)): Path<(i64, i32)>,
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> ApiResult<Json<HintResponse>> {
    let hint = state.engine.hint_for_session(goal_id, &user_id, session).await?;
    Ok(Json(HintResponse { session, hint }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<u64>,
}

async fn get_hint_history(
    Path(goal_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> ApiResult<Json<Vec<goal_hint::Model>>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let hints = state.engine.hint_history(goal_id, &user_id, limit).await?;
    Ok(Json(hints))
}

async fn approve(
    Path(goal_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> ApiResult<Json<goal::Model>> {
    Ok(Json(state.engine.approve(goal_id, &user_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestRequest {
    target_count: i32,
    sessions_per_week: i32,
    #[serde(default)]
    message: Option<String>,
}

async fn suggest(
    Path(goal_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Json(body): Json<SuggestRequest>,
) -> ApiResult<Json<goal::Model>> {
    let suggestion = GoalSuggestion {
        target_count: body.target_count,
        sessions_per_week: body.sessions_per_week,
        message: body.message,
    };
    Ok(Json(state.engine.suggest(goal_id, &user_id, suggestion).await?))
}

async fn accept_suggestion(
    Path(goal_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> ApiResult<Json<goal::Model>> {
    Ok(Json(state.engine.accept_suggestion(goal_id, &user_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonalizedHintRequest {
    text: String,
    #[serde(default)]
    for_session: Option<i32>,
}

async fn set_personalized_hint(
    Path(goal_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Json(body): Json<PersonalizedHintRequest>,
) -> ApiResult<Json<goal::Model>> {
    let goal = state
        .engine
        .set_personalized_hint(goal_id, &user_id, &body.text, body.for_session)
        .await?;
    Ok(Json(goal))
}

/// Live updates for one goal and its partner, as server-sent events.
async fn stream_goal_events(
    Path(goal_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    // Visibility check before subscribing.
    state.engine.goal_view(goal_id, &user_id).await?;

    let receiver = BroadcastStream::new(state.engine.events().subscribe());
    let stream = tokio_stream::StreamExt::filter_map(receiver, move |event| match event {
        Ok(evt) if evt.concerns(goal_id) => match SseEvent::default().event(evt.name()).json_data(&evt) {
            Ok(sse_event) => Some(Ok(sse_event)),
            Err(err) => {
                tracing::error!("Failed to serialize SSE payload for {}: {}", evt.name(), err);
                None
            }
        },
        Ok(_) | Err(BroadcastStreamRecvError::Lagged(_)) => None,
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/goals", get(list_goals))
        .route("/goals/{id}", get(get_goal))
        .route("/goals/{id}/session/start", post(start_session))
        .route("/goals/{id}/session/finish", post(finish_session))
        .route("/goals/{id}/session/cancel", post(cancel_session))
        .route("/goals/{id}/hints", get(get_hint_history))
        .route("/goals/{id}/hints/{session}", get(get_hint))
        .route("/goals/{id}/approval/approve", post(approve))
        .route("/goals/{id}/approval/suggest", post(suggest))
        .route("/goals/{id}/approval/accept", post(accept_suggestion))
        .route("/goals/{id}/personalized-hint", put(set_personalized_hint))
        .route("/goals/{id}/events", get(stream_goal_events))
}
