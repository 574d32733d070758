//! Session gating - the single predicate deciding whether a session action is allowed.
//!
//! Start, finish and cancel all consult [`can_act_on_goal`], so the approval rules cannot
//! drift between call sites. Timing rules that need the configured thresholds (minimum
//! session length, throttle, same-day logging) are checked by [`check_finish_timing`].

use crate::{
    config::ProgressionConfig,
    entities::goal,
    errors::SessionRejection,
};
use chrono::{DateTime, Utc};

/// A session operation on a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalAction {
    /// Start the session timer
    StartSession,
    /// Finish the running session and log it
    FinishSession,
    /// Abandon the running session
    CancelSession,
}

/// Outcome of the gating predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// The action may proceed
    Allowed,
    /// The action is refused for the given reason
    Blocked(SessionRejection),
}

impl Gate {
    /// Converts the gate into a `Result`, blocked gates becoming the rejection.
    pub const fn into_result(self) -> Result<(), SessionRejection> {
        match self {
            Self::Allowed => Ok(()),
            Self::Blocked(reason) => Err(reason),
        }
    }
}

/// Whether the giver's pending decision blocks another session.
///
/// The very first session of a week is always allowed so the recipient is not penalized
/// for a decision they do not control. The exception is the 1 week × 1 session cadence,
/// where that first session would complete the whole goal.
#[must_use]
pub fn approval_blocks(goal: &goal::Model) -> bool {
    if !goal.approval_status.is_awaiting_decision() {
        return false;
    }
    if goal.target_count == 1 && goal.sessions_per_week == 1 {
        return true;
    }
    goal.weekly_count >= 1
}

/// Decides whether `action` may be performed on `goal` at `now`.
#[must_use]
pub fn can_act_on_goal(goal: &goal::Model, action: GoalAction, now: DateTime<Utc>) -> Gate {
    match action {
        GoalAction::StartSession if goal.is_session_running() => {
            return Gate::Blocked(SessionRejection::AlreadyRunning);
        }
        GoalAction::FinishSession | GoalAction::CancelSession if !goal.is_session_running() => {
            return Gate::Blocked(SessionRejection::NotRunning);
        }
        GoalAction::CancelSession => return Gate::Allowed,
        _ => {}
    }

    if goal.is_completed {
        return Gate::Blocked(SessionRejection::GoalCompleted);
    }
    if approval_blocks(goal) {
        return Gate::Blocked(SessionRejection::NotApproved);
    }
    if goal.is_week_completed && now < goal.week_start_at {
        return Gate::Blocked(SessionRejection::WaitingForNextWeek {
            opens_at: goal.week_start_at,
        });
    }
    Gate::Allowed
}

/// Timing checks for finishing a session, evaluated before any mutation.
///
/// Order matters for the reported reason: the session floor first, then the throttle
/// between logged sessions, then the one-session-per-day rule.
pub fn check_finish_timing(
    goal: &goal::Model,
    now: DateTime<Utc>,
    config: &ProgressionConfig,
) -> Result<(), SessionRejection> {
    let Some(started_at) = goal.session_started_at else {
        return Err(SessionRejection::NotRunning);
    };

    let elapsed_seconds = (now - started_at).num_seconds();
    if elapsed_seconds < config.min_session_seconds {
        return Err(SessionRejection::TooShort {
            elapsed_seconds,
            minimum_seconds: config.min_session_seconds,
        });
    }

    // Only a last session strictly before `now` throttles; one at or after it comes from
    // clock skew or time-travel tooling.
    if let Some(last) = goal.last_session_at {
        let seconds_since_last = (now - last).num_seconds();
        if last < now && seconds_since_last < config.min_interval_seconds {
            return Err(SessionRejection::TooFast {
                seconds_since_last,
                minimum_seconds: config.min_interval_seconds,
            });
        }
    }

    if !config.debug_mode && goal.weekly_log_dates.contains(now.date_naive()) {
        return Err(SessionRejection::AlreadyLoggedToday);
    }

    Ok(())
}
