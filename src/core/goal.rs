//! Goal business logic - creation, lookups and the progress projection.
//!
//! Lookups are generic over `ConnectionTrait` so the same function serves plain
//! connections and open transactions. Mutation of the progress counters lives in
//! [`crate::core::progression`]; this module only creates goals and reads them.

use crate::{
    entities::{
        Goal,
        goal::{self, ApprovalStatus, GoalKind, GoalKindTag, LogDates},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveModelTrait, IntoActiveModel, QueryOrder, Set, prelude::*};
use serde::Serialize;

/// Days in one progress window.
pub const DAYS_PER_WEEK: i64 = 7;

/// Largest number of weeks a goal may target.
pub const MAX_TARGET_WEEKS: i32 = 52;

/// Largest number of sessions per week.
pub const MAX_SESSIONS_PER_WEEK: i32 = 7;

/// Length of one progress window.
#[must_use]
pub fn week() -> Duration {
    Duration::days(DAYS_PER_WEEK)
}

/// Everything needed to create a goal.
#[derive(Debug, Clone)]
pub struct NewGoal {
    /// Recipient who will progress the goal
    pub user_id: String,
    /// Role of the goal
    pub kind: GoalKind,
    /// Experience the goal unlocks
    pub experience_id: Option<String>,
    /// Gift the goal was redeemed from
    pub experience_gift_id: Option<i64>,
    /// Display title
    pub title: String,
    /// Weeks to complete
    pub target_count: i32,
    /// Sessions per week
    pub sessions_per_week: i32,
    /// Informational session duration, hours
    pub target_hours: i32,
    /// Informational session duration, minutes
    pub target_minutes: i32,
    /// Initial approval state
    pub approval_status: ApprovalStatus,
}

/// Validates the target shape of a goal.
pub fn validate_shape(target_count: i32, sessions_per_week: i32) -> Result<()> {
    if !(1..=MAX_TARGET_WEEKS).contains(&target_count) {
        return Err(Error::validation(format!(
            "target_count must be between 1 and {MAX_TARGET_WEEKS}, got {target_count}"
        )));
    }
    if !(1..=MAX_SESSIONS_PER_WEEK).contains(&sessions_per_week) {
        return Err(Error::validation(format!(
            "sessions_per_week must be between 1 and {MAX_SESSIONS_PER_WEEK}, got {sessions_per_week}"
        )));
    }
    Ok(())
}

/// Inserts a new goal with zeroed counters and its first window anchored at `now`.
pub async fn create_goal<C>(db: &C, new_goal: NewGoal, now: DateTime<Utc>) -> Result<goal::Model>
where
    C: ConnectionTrait,
{
    validate_shape(new_goal.target_count, new_goal.sessions_per_week)?;
    if !(0..60).contains(&new_goal.target_minutes) || new_goal.target_hours < 0 {
        return Err(Error::validation("session duration is out of range"));
    }

    let (kind, empowered_by, challenge_id, partner_goal_id) = match new_goal.kind {
        GoalKind::SelfGoal => (GoalKindTag::SelfGoal, None, None, None),
        GoalKind::EmpoweredGoal { giver_id } => (GoalKindTag::Empowered, Some(giver_id), None, None),
        GoalKind::PairedGoal {
            challenge_id,
            partner_goal_id,
        } => (GoalKindTag::Paired, None, Some(challenge_id), partner_goal_id),
    };

    let approval_requested_at = new_goal
        .approval_status
        .is_awaiting_decision()
        .then_some(now);

    let model = goal::ActiveModel {
        user_id: Set(new_goal.user_id),
        kind: Set(kind),
        empowered_by: Set(empowered_by),
        experience_id: Set(new_goal.experience_id),
        experience_gift_id: Set(new_goal.experience_gift_id),
        title: Set(new_goal.title),
        target_count: Set(new_goal.target_count),
        sessions_per_week: Set(new_goal.sessions_per_week),
        target_hours: Set(new_goal.target_hours),
        target_minutes: Set(new_goal.target_minutes),
        current_count: Set(0),
        weekly_count: Set(0),
        weekly_log_dates: Set(LogDates::default()),
        week_start_at: Set(now),
        is_week_completed: Set(false),
        is_completed: Set(false),
        completed_at: Set(None),
        is_finished: Set(false),
        is_unlocked: Set(false),
        unlocked_at: Set(None),
        approval_status: Set(new_goal.approval_status),
        approval_requested_at: Set(approval_requested_at),
        suggested_target_count: Set(None),
        suggested_sessions_per_week: Set(None),
        suggestion_message: Set(None),
        personalized_next_hint: Set(None),
        personalized_hint_session: Set(None),
        valentine_challenge_id: Set(challenge_id),
        partner_goal_id: Set(partner_goal_id),
        session_started_at: Set(None),
        last_session_at: Set(None),
        created_at: Set(now),
        ..Default::default()
    };

    model.insert(db).await.map_err(Into::into)
}

/// Retrieves a goal by id.
pub async fn get_goal<C>(db: &C, goal_id: i64) -> Result<goal::Model>
where
    C: ConnectionTrait,
{
    Goal::find_by_id(goal_id)
        .one(db)
        .await?
        .ok_or(Error::GoalNotFound { id: goal_id })
}

/// Retrieves a goal and checks that `user_id` owns it.
///
/// Only the owner may mutate a goal; givers and partners only read it.
pub async fn get_owned_goal<C>(db: &C, goal_id: i64, user_id: &str) -> Result<goal::Model>
where
    C: ConnectionTrait,
{
    let goal = get_goal(db, goal_id).await?;
    if goal.user_id != user_id {
        return Err(Error::forbidden(format!(
            "goal {goal_id} does not belong to the requesting user"
        )));
    }
    Ok(goal)
}

/// Retrieves a goal the user may read: the owner, the giver or the paired partner.
pub async fn get_visible_goal<C>(db: &C, goal_id: i64, user_id: &str) -> Result<goal::Model>
where
    C: ConnectionTrait,
{
    let goal = get_goal(db, goal_id).await?;
    if goal.user_id == user_id || goal.empowered_by.as_deref() == Some(user_id) {
        return Ok(goal);
    }
    if let Some(partner_id) = goal.partner_goal_id {
        let partner = get_goal(db, partner_id).await?;
        if partner.user_id == user_id {
            return Ok(goal);
        }
    }
    Err(Error::forbidden(format!(
        "goal {goal_id} is not visible to the requesting user"
    )))
}

/// All goals owned by a user, newest first.
pub async fn list_goals_for_user(db: &DatabaseConnection, user_id: &str) -> Result<Vec<goal::Model>> {
    Goal::find()
        .filter(goal::Column::UserId.eq(user_id))
        .order_by_desc(goal::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// All goals with a running session timer.
pub async fn list_running_sessions(db: &DatabaseConnection) -> Result<Vec<goal::Model>> {
    Goal::find()
        .filter(goal::Column::SessionStartedAt.is_not_null())
        .all(db)
        .await
        .map_err(Into::into)
}

/// Writes every column of `goal` back to the database.
pub async fn save_goal<C>(db: &C, goal: goal::Model) -> Result<goal::Model>
where
    C: ConnectionTrait,
{
    goal.into_active_model()
        .reset_all()
        .update(db)
        .await
        .map_err(Into::into)
}

/// When the next weekly window opens, if the goal is waiting for it.
///
/// Finishing a week advances `week_start_at` to the next window, so the anchor itself is
/// the opening date.
#[must_use]
pub fn next_window_opens_at(goal: &goal::Model) -> Option<DateTime<Utc>> {
    (goal.is_week_completed && !goal.is_completed).then_some(goal.week_start_at)
}

/// Read-only projection of a goal's progress for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalProgress {
    /// Sessions completed across all weeks
    pub total_sessions_done: i32,
    /// Sessions the goal requires
    pub total_sessions: i32,
    /// Completion percentage, 0-100
    pub percent: f64,
    /// Sessions still needed in the current week
    pub sessions_remaining_this_week: i32,
    /// Paired goal finished on this side, partner still working
    pub waiting_for_partner: bool,
    /// Opening of the next window while the weekly target is met
    pub next_window_opens_at: Option<DateTime<Utc>>,
    /// Role of the goal
    pub kind: GoalKind,
}

/// Calculates the progress projection of a goal.
#[must_use]
pub fn progress(goal: &goal::Model) -> GoalProgress {
    let total_sessions = goal.total_sessions();
    let total_sessions_done = goal.total_sessions_done();
    let percent = if total_sessions > 0 {
        (f64::from(total_sessions_done) / f64::from(total_sessions) * 100.0).min(100.0)
    } else {
        0.0
    };
    let sessions_remaining_this_week = if goal.is_week_completed || goal.is_completed {
        0
    } else {
        goal.sessions_per_week - goal.weekly_count
    };

    GoalProgress {
        total_sessions_done,
        total_sessions,
        percent,
        sessions_remaining_this_week,
        waiting_for_partner: goal.is_finished && !goal.is_unlocked,
        next_window_opens_at: next_window_opens_at(goal),
        kind: goal.kind(),
    }
}
