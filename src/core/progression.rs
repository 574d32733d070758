//! Goal progression - the transactional session state machine of a single goal.
//!
//! Starting, finishing and cancelling a session each run inside one database
//! transaction: the goal is re-read, gated, mutated and written back before commit, so
//! two devices acting on the same goal cannot interleave into a corrupted state.
//! Everything that happens after a successful commit (hints, notifications, events) is
//! orchestrated by [`crate::core::engine`] and never re-runs the counter update.

use crate::{
    config::ProgressionConfig,
    core::{
        gating::{GoalAction, can_act_on_goal, check_finish_timing},
        goal::{DAYS_PER_WEEK, get_owned_goal, save_goal, week},
        pairing::{self, PairSettlement},
    },
    entities::goal::{self, LogDates},
    errors::Result,
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{debug, info, instrument};

/// What logging one session changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionEffects {
    /// This session met the weekly target
    pub week_completed: bool,
    /// This session completed the whole goal
    pub goal_completed: bool,
}

/// Result of a committed session.
#[derive(Debug, Clone)]
pub struct CommittedSession {
    /// Goal as written by the transaction
    pub goal: goal::Model,
    /// Counter changes made by the session
    pub effects: SessionEffects,
    /// Partner state for paired goals, read in the same transaction
    pub pairing: PairSettlement,
}

/// Moves the rolling window forward when it has opened or lapsed.
///
/// After a completed week the anchor already points at the next window, which opens once
/// `now` reaches it. When a week lapses without meeting the target, its partial progress
/// is dropped and the anchor advances by whole weeks. Returns whether anything changed.
pub fn roll_window(goal: &mut goal::Model, now: DateTime<Utc>) -> bool {
    let mut changed = false;

    if goal.is_week_completed && now >= goal.week_start_at {
        goal.is_week_completed = false;
        changed = true;
    }

    if !goal.is_week_completed && !goal.is_completed && now >= goal.week_start_at + week() {
        let lapsed_weeks = (now - goal.week_start_at).num_days() / DAYS_PER_WEEK;
        goal.week_start_at += Duration::days(lapsed_weeks * DAYS_PER_WEEK);
        goal.weekly_count = 0;
        goal.weekly_log_dates = LogDates::default();
        changed = true;
    }

    changed
}

/// Applies one logged session to the counters.
///
/// The weekly counter resets to zero when it reaches the cadence, which bumps the week
/// counter and moves the window anchor by seven days. Completion is reached exactly when
/// the week counter hits the target, so `weekly_count <= sessions_per_week` and
/// `current_count <= target_count` hold after every call. Each calendar day counts once
/// per week; a second session on a logged day only clears the timer.
pub fn apply_session(goal: &mut goal::Model, now: DateTime<Utc>) -> SessionEffects {
    let mut effects = SessionEffects::default();

    // A repeat on an already logged day (debug mode only) ends the session uncounted.
    if goal.weekly_log_dates.contains(now.date_naive()) {
        goal.session_started_at = None;
        goal.last_session_at = Some(now);
        return effects;
    }

    goal.weekly_count += 1;
    goal.weekly_log_dates.insert(now.date_naive());

    if goal.weekly_count >= goal.sessions_per_week {
        effects.week_completed = true;
        goal.is_week_completed = true;
        goal.current_count = (goal.current_count + 1).min(goal.target_count);
        goal.weekly_count = 0;
        goal.weekly_log_dates = LogDates::default();
        goal.week_start_at += week();
    }

    if goal.current_count >= goal.target_count && !goal.is_completed {
        effects.goal_completed = true;
        goal.is_completed = true;
        goal.completed_at = Some(now);
    }

    goal.session_started_at = None;
    goal.last_session_at = Some(now);

    effects
}

/// Starts a session timer on a goal owned by `user_id`.
///
/// The start timestamp is persisted on the goal; elapsed time is always derived as
/// `now - session_started_at`, so app suspension does not lose time.
#[instrument(skip(db))]
pub async fn begin_session(
    db: &DatabaseConnection,
    goal_id: i64,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<goal::Model> {
    let txn = db.begin().await?;

    let mut goal = get_owned_goal(&txn, goal_id, user_id).await?;
    can_act_on_goal(&goal, GoalAction::StartSession, now).into_result()?;
    if roll_window(&mut goal, now) {
        debug!(goal_id, week_start_at = %goal.week_start_at, "Rolled goal window forward");
    }
    // Rolling may have reset the weekly counter, which changes what the gate allows.
    can_act_on_goal(&goal, GoalAction::StartSession, now).into_result()?;

    goal.session_started_at = Some(now);
    let goal = save_goal(&txn, goal).await?;
    txn.commit().await?;

    info!(goal_id, "Session started");
    Ok(goal)
}

/// Logs the running session of a goal owned by `user_id`.
///
/// All preconditions are checked before anything is written. The counter update and,
/// for paired goals, the partner reconciliation happen in one transaction: either all of
/// it commits or none of it does.
#[instrument(skip(db, config))]
pub async fn commit_session(
    db: &DatabaseConnection,
    goal_id: i64,
    user_id: &str,
    now: DateTime<Utc>,
    config: &ProgressionConfig,
) -> Result<CommittedSession> {
    let txn = db.begin().await?;

    let mut goal = get_owned_goal(&txn, goal_id, user_id).await?;
    can_act_on_goal(&goal, GoalAction::FinishSession, now).into_result()?;
    check_finish_timing(&goal, now, config)?;

    let effects = apply_session(&mut goal, now);
    let pairing = if goal.is_paired() {
        pairing::settle_completion(&txn, &mut goal, now).await?
    } else {
        PairSettlement::default()
    };

    let goal = save_goal(&txn, goal).await?;
    txn.commit().await?;

    info!(
        goal_id,
        weekly_count = goal.weekly_count,
        current_count = goal.current_count,
        week_completed = effects.week_completed,
        goal_completed = effects.goal_completed,
        "Session logged"
    );

    Ok(CommittedSession {
        goal,
        effects,
        pairing,
    })
}

/// Cancels the running session of a goal owned by `user_id` without touching counters.
#[instrument(skip(db))]
pub async fn abandon_session(
    db: &DatabaseConnection,
    goal_id: i64,
    user_id: &str,
) -> Result<goal::Model> {
    let txn = db.begin().await?;

    let mut goal = get_owned_goal(&txn, goal_id, user_id).await?;
    can_act_on_goal(&goal, GoalAction::CancelSession, Utc::now()).into_result()?;

    goal.session_started_at = None;
    let goal = save_goal(&txn, goal).await?;
    txn.commit().await?;

    info!(goal_id, "Session cancelled");
    Ok(goal)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        core::goal::{create_goal, get_goal},
        entities::goal::ApprovalStatus,
        errors::{Error, SessionRejection},
        test_utils::*,
    };

    fn assert_rejected(result: Result<CommittedSession>, expected: SessionRejection) {
        match result {
            Err(Error::Session { reason }) => assert_eq!(reason, expected),
            other => panic!("expected {expected:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_apply_session_rolls_week_over() {
        let mut goal = goal_model(2, 3);
        let start = goal.week_start_at;

        let first = apply_session(&mut goal, base_time());
        assert_eq!(goal.weekly_count, 1);
        assert!(!first.week_completed);

        apply_session(&mut goal, base_time() + Duration::days(1));
        assert_eq!(goal.weekly_count, 2);

        let third = apply_session(&mut goal, base_time() + Duration::days(2));
        assert!(third.week_completed);
        assert!(!third.goal_completed);
        assert_eq!(goal.weekly_count, 0);
        assert_eq!(goal.current_count, 1);
        assert_eq!(goal.week_start_at, start + Duration::days(7));
        assert!(goal.weekly_log_dates.is_empty());
        assert!(goal.is_week_completed);
    }

    #[test]
    fn test_apply_session_counts_each_day_once() {
        let mut goal = goal_model(2, 3);
        goal.session_started_at = Some(base_time() + Duration::hours(2));

        apply_session(&mut goal, base_time());
        let repeat = apply_session(&mut goal, base_time() + Duration::hours(3));

        assert_eq!(repeat, SessionEffects::default());
        assert_eq!(goal.weekly_count, 1);
        assert_eq!(goal.weekly_log_dates.len(), 1);
        assert!(goal.session_started_at.is_none());
        assert_eq!(goal.last_session_at, Some(base_time() + Duration::hours(3)));
    }

    #[test]
    fn test_apply_session_counter_invariants() {
        let mut goal = goal_model(3, 2);
        let mut day = base_time();

        for _ in 0..20 {
            apply_session(&mut goal, day);
            day += Duration::days(1);
            assert!(goal.weekly_count <= goal.sessions_per_week);
            assert!(goal.current_count <= goal.target_count);
            assert_eq!(goal.is_completed, goal.current_count == goal.target_count);
        }
        assert!(goal.is_completed);
    }

    #[test]
    fn test_roll_window_opens_next_week() {
        let mut goal = goal_model(3, 1);
        goal.is_week_completed = true;
        goal.week_start_at = base_time() + Duration::days(7);

        assert!(!roll_window(&mut goal, base_time() + Duration::days(6)));
        assert!(goal.is_week_completed);

        assert!(roll_window(&mut goal, base_time() + Duration::days(7)));
        assert!(!goal.is_week_completed);
        assert_eq!(goal.week_start_at, base_time() + Duration::days(7));
    }

    #[test]
    fn test_roll_window_drops_lapsed_partial_week() {
        let mut goal = goal_model(3, 3);
        goal.weekly_count = 2;
        goal.weekly_log_dates.insert(base_time().date_naive());

        assert!(roll_window(&mut goal, base_time() + Duration::days(15)));
        assert_eq!(goal.weekly_count, 0);
        assert!(goal.weekly_log_dates.is_empty());
        assert_eq!(goal.week_start_at, base_time() + Duration::days(14));
    }

    #[tokio::test]
    async fn test_week_rollover_through_database() -> Result<()> {
        let db = setup_test_db().await?;
        let config = ProgressionConfig::default();
        let goal = create_goal(&db, new_self_goal("alice", 2, 3), base_time()).await?;
        let start = goal.week_start_at;

        let mut weekly = Vec::new();
        for day in 0..3 {
            let t = base_time() + Duration::days(day);
            begin_session(&db, goal.id, "alice", t).await?;
            let done = commit_session(&db, goal.id, "alice", t + Duration::seconds(30), &config)
                .await?;
            weekly.push(done.goal.weekly_count);
        }

        assert_eq!(weekly, vec![1, 2, 0]);
        let goal = get_goal(&db, goal.id).await?;
        assert_eq!(goal.current_count, 1);
        assert_eq!(goal.week_start_at, start + Duration::days(7));
        assert!(!goal.is_completed);

        Ok(())
    }

    #[tokio::test]
    async fn test_single_session_goal_completes() -> Result<()> {
        let db = setup_test_db().await?;
        let mut new_goal = new_empowered_goal("bob", "giver", 1, 1);
        new_goal.approval_status = ApprovalStatus::Approved;
        let goal = create_goal(&db, new_goal, base_time()).await?;

        begin_session(&db, goal.id, "bob", base_time()).await?;
        let done = commit_session(
            &db,
            goal.id,
            "bob",
            base_time() + Duration::seconds(3),
            &ProgressionConfig::default(),
        )
        .await?;

        assert_eq!(done.goal.weekly_count, 0);
        assert_eq!(done.goal.current_count, 1);
        assert!(done.goal.is_completed);
        assert!(done.effects.goal_completed);
        assert!(done.goal.session_started_at.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_pending_single_session_goal_rejects_start() -> Result<()> {
        let db = setup_test_db().await?;
        let goal = create_goal(&db, new_empowered_goal("bob", "giver", 1, 1), base_time()).await?;

        let result = begin_session(&db, goal.id, "bob", base_time()).await;
        assert!(matches!(
            result,
            Err(Error::Session {
                reason: SessionRejection::NotApproved
            })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_pending_goal_allows_only_first_session() -> Result<()> {
        let db = setup_test_db().await?;
        let config = ProgressionConfig::default();
        let goal = create_goal(&db, new_empowered_goal("bob", "giver", 2, 2), base_time()).await?;

        begin_session(&db, goal.id, "bob", base_time()).await?;
        let first = commit_session(&db, goal.id, "bob", base_time() + Duration::seconds(5), &config)
            .await?;
        assert_eq!(first.goal.weekly_count, 1);

        let next_day = base_time() + Duration::days(1);
        let result = begin_session(&db, goal.id, "bob", next_day).await;
        assert!(matches!(
            result,
            Err(Error::Session {
                reason: SessionRejection::NotApproved
            })
        ));

        let mut approved = get_goal(&db, goal.id).await?;
        approved.approval_status = ApprovalStatus::Approved;
        crate::core::goal::save_goal(&db, approved).await?;

        begin_session(&db, goal.id, "bob", next_day).await?;
        let second = commit_session(&db, goal.id, "bob", next_day + Duration::seconds(5), &config)
            .await?;
        assert_eq!(second.goal.current_count, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_finish_too_short_leaves_counters() -> Result<()> {
        let db = setup_test_db().await?;
        let goal = create_goal(&db, new_self_goal("alice", 2, 3), base_time()).await?;

        begin_session(&db, goal.id, "alice", base_time()).await?;
        let result = commit_session(
            &db,
            goal.id,
            "alice",
            base_time() + Duration::seconds(1),
            &ProgressionConfig::default(),
        )
        .await;
        assert_rejected(
            result,
            SessionRejection::TooShort {
                elapsed_seconds: 1,
                minimum_seconds: 2,
            },
        );

        let stored = get_goal(&db, goal.id).await?;
        assert_eq!(stored.weekly_count, 0);
        assert!(stored.session_started_at.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn test_finish_too_fast_leaves_counters() -> Result<()> {
        let db = setup_test_db().await?;
        let config = ProgressionConfig::default();
        let goal = create_goal(&db, new_self_goal("alice", 2, 3), base_time()).await?;

        begin_session(&db, goal.id, "alice", base_time()).await?;
        commit_session(&db, goal.id, "alice", base_time() + Duration::seconds(3), &config).await?;

        begin_session(&db, goal.id, "alice", base_time() + Duration::seconds(5)).await?;
        let result =
            commit_session(&db, goal.id, "alice", base_time() + Duration::seconds(13), &config)
                .await;
        assert_rejected(
            result,
            SessionRejection::TooFast {
                seconds_since_last: 10,
                minimum_seconds: 60,
            },
        );

        let stored = get_goal(&db, goal.id).await?;
        assert_eq!(stored.weekly_count, 1);
        assert_eq!(stored.weekly_log_dates.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_finish_same_day_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        let config = ProgressionConfig::default();
        let goal = create_goal(&db, new_self_goal("alice", 2, 3), base_time()).await?;

        begin_session(&db, goal.id, "alice", base_time()).await?;
        commit_session(&db, goal.id, "alice", base_time() + Duration::seconds(3), &config).await?;

        let later = base_time() + Duration::hours(2);
        begin_session(&db, goal.id, "alice", later).await?;
        let result = commit_session(&db, goal.id, "alice", later + Duration::minutes(20), &config)
            .await;
        assert_rejected(result, SessionRejection::AlreadyLoggedToday);

        Ok(())
    }

    #[tokio::test]
    async fn test_start_twice_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        let goal = create_goal(&db, new_self_goal("alice", 2, 3), base_time()).await?;

        begin_session(&db, goal.id, "alice", base_time()).await?;
        let result = begin_session(&db, goal.id, "alice", base_time()).await;
        assert!(matches!(
            result,
            Err(Error::Session {
                reason: SessionRejection::AlreadyRunning
            })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_clears_timer_only() -> Result<()> {
        let db = setup_test_db().await?;
        let goal = create_goal(&db, new_self_goal("alice", 2, 3), base_time()).await?;

        begin_session(&db, goal.id, "alice", base_time()).await?;
        let cancelled = abandon_session(&db, goal.id, "alice").await?;
        assert!(cancelled.session_started_at.is_none());
        assert_eq!(cancelled.weekly_count, 0);

        let again = abandon_session(&db, goal.id, "alice").await;
        assert!(matches!(
            again,
            Err(Error::Session {
                reason: SessionRejection::NotRunning
            })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_start_waits_for_next_window() -> Result<()> {
        let db = setup_test_db().await?;
        let config = ProgressionConfig::default();
        let goal = create_goal(&db, new_self_goal("alice", 2, 1), base_time()).await?;

        begin_session(&db, goal.id, "alice", base_time()).await?;
        commit_session(&db, goal.id, "alice", base_time() + Duration::seconds(3), &config).await?;

        let result = begin_session(&db, goal.id, "alice", base_time() + Duration::days(2)).await;
        assert!(matches!(
            result,
            Err(Error::Session {
                reason: SessionRejection::WaitingForNextWeek { .. }
            })
        ));

        let reopened = begin_session(&db, goal.id, "alice", base_time() + Duration::days(7)).await?;
        assert!(!reopened.is_week_completed);
        assert!(reopened.session_started_at.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn test_other_user_cannot_start() -> Result<()> {
        let db = setup_test_db().await?;
        let goal = create_goal(&db, new_self_goal("alice", 2, 3), base_time()).await?;

        let result = begin_session(&db, goal.id, "mallory", base_time()).await;
        assert!(matches!(result, Err(Error::Forbidden { .. })));

        Ok(())
    }
}
