//! Session timers - in-memory view of running sessions.
//!
//! The start timestamp is persisted on the goal, so the map here is only a read model:
//! it is hydrated from the database at boot, updated after each committed session
//! action, and ticked by a single background task. A tick recomputes elapsed time from
//! the persisted start and never touches the store.

use crate::{
    core::goal::list_running_sessions,
    entities::goal,
    errors::Result,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{debug, info};

/// Timer state of one goal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimerEntry {
    /// A session is running
    pub running: bool,
    /// When the running session started
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds elapsed at the last tick
    pub elapsed_seconds: i64,
    /// Hint waiting to be shown to the client
    pub pending_hint: Option<String>,
}

/// Shared map of goal id to timer state.
#[derive(Clone, Debug, Default)]
pub struct SessionTimers {
    entries: Arc<RwLock<HashMap<i64, TimerEntry>>>,
}

impl SessionTimers {
    /// Creates an empty timer map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every running session from the database.
    pub async fn hydrate(&self, db: &sea_orm::DatabaseConnection, now: DateTime<Utc>) -> Result<usize> {
        let running = list_running_sessions(db).await?;
        let count = running.len();
        for goal in &running {
            self.sync_goal(goal, now).await;
        }
        info!(count, "Hydrated running session timers");
        Ok(count)
    }

    /// Mirrors the goal's persisted session state into the map.
    pub async fn sync_goal(&self, goal: &goal::Model, now: DateTime<Utc>) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(goal.id).or_default();
        entry.started_at = goal.session_started_at;
        entry.running = goal.session_started_at.is_some();
        entry.elapsed_seconds = goal
            .session_started_at
            .map_or(0, |started| (now - started).num_seconds().max(0));
    }

    /// Attaches a hint for the client to pick up.
    pub async fn set_pending_hint(&self, goal_id: i64, hint: String) {
        self.entries
            .write()
            .await
            .entry(goal_id)
            .or_default()
            .pending_hint = Some(hint);
    }

    /// Removes and returns the pending hint.
    pub async fn take_pending_hint(&self, goal_id: i64) -> Option<String> {
        self.entries
            .write()
            .await
            .get_mut(&goal_id)
            .and_then(|entry| entry.pending_hint.take())
    }

    /// Recomputes elapsed seconds for all running timers. Returns how many ran.
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let mut running = 0;
        for entry in entries.values_mut().filter(|e| e.running) {
            if let Some(started) = entry.started_at {
                entry.elapsed_seconds = (now - started).num_seconds().max(0);
                running += 1;
            }
        }
        running
    }

    /// Current timer state of a goal.
    pub async fn get(&self, goal_id: i64) -> Option<TimerEntry> {
        self.entries.read().await.get(&goal_id).cloned()
    }

    /// Spawns the single background ticker.
    pub fn spawn_ticker(&self, period: Duration) -> JoinHandle<()> {
        let timers = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let running = timers.tick(Utc::now()).await;
                if running > 0 {
                    debug!(running, "Ticked session timers");
                }
            }
        })
    }
}
