//! Giver approval of empowered goals.
//!
//! A goal redeemed from someone else's gift starts `pending`. The giver either approves
//! it or suggests a different target; the recipient then accepts the suggestion. Until
//! a decision lands the session gate limits progress (see [`crate::core::gating`]).

use crate::{
    core::goal::{get_goal, get_owned_goal, save_goal, validate_shape},
    entities::goal::{self, ApprovalStatus},
    errors::{Error, Result},
};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{info, instrument};

/// A giver's proposed change to the goal's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalSuggestion {
    /// Proposed number of weeks
    pub target_count: i32,
    /// Proposed sessions per week
    pub sessions_per_week: i32,
    /// Optional note to the recipient
    pub message: Option<String>,
}

fn ensure_giver(goal: &goal::Model, giver_id: &str) -> Result<()> {
    if goal.empowered_by.as_deref() == Some(giver_id) {
        Ok(())
    } else {
        Err(Error::forbidden(format!(
            "only the giver of goal {} can decide on it",
            goal.id
        )))
    }
}

/// Approves an empowered goal. Approving twice is a no-op.
#[instrument(skip(db))]
pub async fn approve_goal(
    db: &DatabaseConnection,
    goal_id: i64,
    giver_id: &str,
) -> Result<goal::Model> {
    let txn = db.begin().await?;

    let mut goal = get_goal(&txn, goal_id).await?;
    ensure_giver(&goal, giver_id)?;
    if goal.approval_status == ApprovalStatus::Approved {
        return Ok(goal);
    }

    goal.approval_status = ApprovalStatus::Approved;
    goal.suggested_target_count = None;
    goal.suggested_sessions_per_week = None;
    goal.suggestion_message = None;
    let goal = save_goal(&txn, goal).await?;
    txn.commit().await?;

    info!(goal_id, "Goal approved by giver");
    Ok(goal)
}

/// Proposes a different target for an empowered goal.
///
/// The proposal cannot go below progress already made: the target must exceed the
/// completed weeks and the cadence must exceed this week's logged sessions.
#[instrument(skip(db, suggestion))]
pub async fn suggest_goal_change(
    db: &DatabaseConnection,
    goal_id: i64,
    giver_id: &str,
    suggestion: GoalSuggestion,
) -> Result<goal::Model> {
    validate_shape(suggestion.target_count, suggestion.sessions_per_week)?;

    let txn = db.begin().await?;

    let mut goal = get_goal(&txn, goal_id).await?;
    ensure_giver(&goal, giver_id)?;
    if goal.is_completed {
        return Err(Error::validation("a completed goal cannot be changed"));
    }
    if suggestion.target_count <= goal.current_count {
        return Err(Error::validation(format!(
            "target_count must exceed the {} weeks already completed",
            goal.current_count
        )));
    }
    if suggestion.sessions_per_week <= goal.weekly_count {
        return Err(Error::validation(format!(
            "sessions_per_week must exceed the {} sessions logged this week",
            goal.weekly_count
        )));
    }

    goal.approval_status = ApprovalStatus::SuggestedChange;
    goal.suggested_target_count = Some(suggestion.target_count);
    goal.suggested_sessions_per_week = Some(suggestion.sessions_per_week);
    goal.suggestion_message = suggestion.message.filter(|m| !m.trim().is_empty());
    let goal = save_goal(&txn, goal).await?;
    txn.commit().await?;

    info!(goal_id, "Giver suggested a goal change");
    Ok(goal)
}

/// Applies the giver's suggestion; the goal becomes approved.
///
/// The suggestion is checked again against current progress, since sessions may have
/// been logged after it was made.
#[instrument(skip(db))]
pub async fn accept_suggested_change(
    db: &DatabaseConnection,
    goal_id: i64,
    user_id: &str,
) -> Result<goal::Model> {
    let txn = db.begin().await?;

    let mut goal = get_owned_goal(&txn, goal_id, user_id).await?;
    let (Some(target_count), Some(sessions_per_week)) =
        (goal.suggested_target_count, goal.suggested_sessions_per_week)
    else {
        return Err(Error::validation("there is no suggestion to accept"));
    };
    if goal.approval_status != ApprovalStatus::SuggestedChange {
        return Err(Error::validation("there is no suggestion to accept"));
    }
    // Sessions logged since the suggestion may have caught up with it.
    if goal.is_completed || target_count <= goal.current_count {
        return Err(Error::validation(format!(
            "the suggested target of {target_count} weeks no longer exceeds the {} already completed",
            goal.current_count
        )));
    }
    if sessions_per_week <= goal.weekly_count {
        return Err(Error::validation(format!(
            "the suggested {sessions_per_week} sessions per week no longer exceed the {} logged this week",
            goal.weekly_count
        )));
    }

    goal.target_count = target_count;
    goal.sessions_per_week = sessions_per_week;
    goal.approval_status = ApprovalStatus::Approved;
    goal.suggested_target_count = None;
    goal.suggested_sessions_per_week = None;
    goal.suggestion_message = None;
    let goal = save_goal(&txn, goal).await?;
    txn.commit().await?;

    info!(goal_id, target_count, sessions_per_week, "Suggested change accepted");
    Ok(goal)
}
