//! Session hints - personalized giver messages and generated coaching tips.
//!
//! A hint is resolved for a session number after the session commits. A giver's
//! personalized hint wins when it is tagged for exactly that session and is consumed in
//! the same transaction that records it. Otherwise a generated hint is served from the
//! in-memory cache, then the `hint_cache` table, then the external generator, and a
//! static encouragement when generation fails. The `goal_hints` history has one row per
//! `(goal, session)`, so a session never yields two hints.

use crate::{
    config::HintsConfig,
    core::goal::{get_goal, save_goal},
    entities::{
        Experience, GoalHint, HintCacheEntry, goal,
        goal_hint::{self, HintSource},
        hint_cache,
    },
    errors::{Error, Result},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait, sea_query::OnConflict,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Writing styles rotated by session number.
pub const HINT_STYLES: [&str; 3] = ["motivational", "practical", "reflective"];

/// Longest personalized hint a giver may write.
pub const MAX_PERSONALIZED_HINT_CHARS: usize = 500;

/// Style for a session, rotating through [`HINT_STYLES`].
#[must_use]
pub fn style_for_session(session_number: i32) -> &'static str {
    let index = usize::try_from(session_number.rem_euclid(3)).unwrap_or_default();
    HINT_STYLES[index]
}

/// Context sent to the hint generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HintRequest {
    /// Goal display title
    pub goal_title: String,
    /// Title of the experience being worked towards
    pub experience_title: Option<String>,
    /// Category of the experience
    pub experience_category: Option<String>,
    /// Session the hint is for, 1-based
    pub session_number: i32,
    /// Sessions the goal requires in total
    pub total_sessions: i32,
    /// Writing style
    pub style: String,
    /// Most recent hints, newest first, to avoid repetition
    pub recent_hints: Vec<String>,
}

/// Produces hint text for a request.
#[async_trait]
pub trait HintGenerator: Send + Sync {
    /// Generates one hint.
    async fn generate(&self, request: &HintRequest) -> Result<String>;
}

#[derive(Deserialize)]
struct HintResponse {
    hint: String,
}

/// Calls an external text generation endpoint with the request as JSON.
///
/// The endpoint answers `{"hint": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpHintGenerator {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpHintGenerator {
    /// Creates a generator posting to `url`.
    pub fn new(url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl HintGenerator for HttpHintGenerator {
    async fn generate(&self, request: &HintRequest) -> Result<String> {
        let mut call = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response: HintResponse = call.send().await?.error_for_status()?.json().await?;
        let hint = response.hint.trim();
        if hint.is_empty() {
            return Err(Error::validation("hint generator returned an empty hint"));
        }
        Ok(hint.to_string())
    }
}

/// Always answers with the same text; used when no generator is configured.
#[derive(Debug, Clone)]
pub struct StaticHintGenerator {
    text: String,
}

impl StaticHintGenerator {
    /// Creates a generator answering `text`.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl HintGenerator for StaticHintGenerator {
    async fn generate(&self, _request: &HintRequest) -> Result<String> {
        Ok(self.text.clone())
    }
}

/// A hint shown for a completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedHint {
    /// Session the hint belongs to
    pub session_number: i32,
    /// Hint text
    pub text: String,
    /// Where the text came from
    pub source: HintSource,
}

/// Records a consumed hint; `false` when the session already has one.
async fn record_hint<C>(
    db: &C,
    goal_id: i64,
    session_number: i32,
    text: &str,
    source: HintSource,
    now: DateTime<Utc>,
) -> Result<bool>
where
    C: ConnectionTrait,
{
    let row = goal_hint::ActiveModel {
        goal_id: Set(goal_id),
        session_number: Set(session_number),
        text: Set(text.to_string()),
        source: Set(source),
        created_at: Set(now),
    };
    let inserted = GoalHint::insert(row)
        .on_conflict(
            OnConflict::columns([goal_hint::Column::GoalId, goal_hint::Column::SessionNumber])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(inserted > 0)
}

/// Cache of hints keyed by `(goal, session)`, backed by memory and the `hint_cache` table.
#[derive(Clone)]
pub struct HintCache {
    db: DatabaseConnection,
    generator: Arc<dyn HintGenerator>,
    memory: Arc<RwLock<HashMap<(i64, i32), String>>>,
    fallback_text: String,
    history_window: u64,
}

impl HintCache {
    /// Creates a cache generating misses with `generator`.
    pub fn new(db: DatabaseConnection, generator: Arc<dyn HintGenerator>, config: &HintsConfig) -> Self {
        Self {
            db,
            generator,
            memory: Arc::new(RwLock::new(HashMap::new())),
            fallback_text: config.fallback_text.clone(),
            history_window: config.history_window,
        }
    }

    /// Cached text for a session, from memory or the durable table.
    pub async fn cached(&self, goal_id: i64, session_number: i32) -> Result<Option<String>> {
        if let Some(text) = self.memory.read().await.get(&(goal_id, session_number)) {
            return Ok(Some(text.clone()));
        }

        let stored = HintCacheEntry::find_by_id((goal_id, session_number))
            .one(&self.db)
            .await?;
        Ok(match stored {
            Some(entry) => {
                self.memory
                    .write()
                    .await
                    .insert((goal_id, session_number), entry.text.clone());
                Some(entry.text)
            }
            None => None,
        })
    }

    async fn store(&self, goal_id: i64, session_number: i32, text: &str) -> Result<()> {
        let row = hint_cache::ActiveModel {
            goal_id: Set(goal_id),
            session_number: Set(session_number),
            text: Set(text.to_string()),
            style: Set(style_for_session(session_number).to_string()),
            created_at: Set(Utc::now()),
        };
        HintCacheEntry::insert(row)
            .on_conflict(
                OnConflict::columns([
                    hint_cache::Column::GoalId,
                    hint_cache::Column::SessionNumber,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        self.memory
            .write()
            .await
            .insert((goal_id, session_number), text.to_string());
        Ok(())
    }

    async fn build_request(&self, goal: &goal::Model, session_number: i32) -> Result<HintRequest> {
        let experience = match &goal.experience_id {
            Some(id) => Experience::find_by_id(id.clone()).one(&self.db).await?,
            None => None,
        };
        let recent_hints = self
            .history(goal.id, self.history_window)
            .await?
            .into_iter()
            .map(|h| h.text)
            .collect();

        Ok(HintRequest {
            goal_title: goal.title.clone(),
            experience_title: experience.as_ref().map(|e| e.title.clone()),
            experience_category: experience.map(|e| e.category),
            session_number,
            total_sessions: goal.total_sessions(),
            style: style_for_session(session_number).to_string(),
            recent_hints,
        })
    }

    /// Returns the cached hint for a session, generating and caching it on a miss.
    ///
    /// Generator failures fall back to the static text, which is not cached so a later
    /// call can still produce a real hint.
    #[instrument(skip(self, goal), fields(goal_id = goal.id))]
    pub async fn get_or_generate(
        &self,
        goal: &goal::Model,
        session_number: i32,
    ) -> Result<(String, HintSource)> {
        if let Some(text) = self.cached(goal.id, session_number).await? {
            debug!(session_number, "Hint cache hit");
            return Ok((text, HintSource::Generated));
        }

        let request = self.build_request(goal, session_number).await?;
        match self.generator.generate(&request).await {
            Ok(text) => {
                self.store(goal.id, session_number, &text).await?;
                Ok((text, HintSource::Generated))
            }
            Err(e) => {
                warn!(session_number, error = %e, "Hint generation failed, using fallback");
                Ok((self.fallback_text.clone(), HintSource::Fallback))
            }
        }
    }

    /// Warms the cache for a session; failures are only logged.
    pub async fn prefetch(&self, goal: &goal::Model, session_number: i32) {
        if let Err(e) = self.get_or_generate(goal, session_number).await {
            warn!(goal_id = goal.id, session_number, error = %e, "Hint prefetch failed");
        }
    }

    /// Consumes the personalized hint when it is tagged for `session_number`.
    async fn take_personalized(
        &self,
        goal_id: i64,
        session_number: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<ResolvedHint>> {
        let txn = self.db.begin().await?;

        let mut goal = get_goal(&txn, goal_id).await?;
        if goal.personalized_hint_session != Some(session_number) {
            return Ok(None);
        }
        let Some(text) = goal.personalized_next_hint.take() else {
            return Ok(None);
        };
        goal.personalized_hint_session = None;
        save_goal(&txn, goal).await?;

        if !record_hint(&txn, goal_id, session_number, &text, HintSource::Personalized, now).await? {
            return Ok(None);
        }
        txn.commit().await?;

        info!(goal_id, session_number, "Personalized hint consumed");
        Ok(Some(ResolvedHint {
            session_number,
            text,
            source: HintSource::Personalized,
        }))
    }

    /// Resolves the hint shown after `session_number` was completed.
    ///
    /// Returns `None` when this session already produced a hint.
    #[instrument(skip(self))]
    pub async fn resolve_for_session(
        &self,
        goal_id: i64,
        session_number: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<ResolvedHint>> {
        if GoalHint::find_by_id((goal_id, session_number))
            .one(&self.db)
            .await?
            .is_some()
        {
            debug!("Hint already consumed for this session");
            return Ok(None);
        }

        if let Some(hint) = self.take_personalized(goal_id, session_number, now).await? {
            return Ok(Some(hint));
        }

        let goal = get_goal(&self.db, goal_id).await?;
        let (text, source) = self.get_or_generate(&goal, session_number).await?;
        if !record_hint(&self.db, goal_id, session_number, &text, source, now).await? {
            return Ok(None);
        }

        Ok(Some(ResolvedHint {
            session_number,
            text,
            source,
        }))
    }

    /// Most recent consumed hints of a goal, newest first.
    pub async fn history(&self, goal_id: i64, limit: u64) -> Result<Vec<goal_hint::Model>> {
        GoalHint::find()
            .filter(goal_hint::Column::GoalId.eq(goal_id))
            .order_by_desc(goal_hint::Column::SessionNumber)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(Into::into)
    }
}

/// Stores a giver's hint for an upcoming session of an empowered goal.
///
/// Without an explicit session the hint targets the next session to be completed.
pub async fn set_personalized_hint(
    db: &DatabaseConnection,
    goal_id: i64,
    giver_id: &str,
    text: &str,
    for_session: Option<i32>,
) -> Result<goal::Model> {
    let mut goal = get_goal(db, goal_id).await?;
    if goal.empowered_by.as_deref() != Some(giver_id) {
        return Err(Error::forbidden(format!(
            "only the giver of goal {goal_id} can leave a hint"
        )));
    }

    let text = text.trim();
    if text.is_empty() || text.chars().count() > MAX_PERSONALIZED_HINT_CHARS {
        return Err(Error::validation(format!(
            "hint must be between 1 and {MAX_PERSONALIZED_HINT_CHARS} characters"
        )));
    }

    let next_session = goal.total_sessions_done() + 1;
    let session = for_session.unwrap_or(next_session);
    if session < next_session || session > goal.total_sessions() {
        return Err(Error::validation(format!(
            "hint session must be between {next_session} and {}",
            goal.total_sessions()
        )));
    }

    goal.personalized_next_hint = Some(text.to_string());
    goal.personalized_hint_session = Some(session);
    let goal = save_goal(db, goal).await?;

    info!(goal_id, session, "Personalized hint stored");
    Ok(goal)
}
