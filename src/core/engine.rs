//! Goal engine - the service the HTTP layer talks to.
//!
//! Each operation runs its transactional core first. Everything after the commit is a
//! side channel: pair reconciliation, hint resolution, notifications, timer updates and
//! event publication. Side channels are individually caught and logged, so a failing
//! generator or notification pipeline can never fail or repeat a committed session.

use crate::{
    config::ProgressionConfig,
    core::{
        approval::{self, GoalSuggestion},
        events::{EventBus, GoalEvent},
        goal::{GoalProgress, get_visible_goal, list_goals_for_user, progress},
        hints::{self, HintCache, ResolvedHint},
        milestones::partner_milestone,
        notify::{NewNotification, Notifier, notify_best_effort},
        pairing::reconcile_pair,
        progression::{self, SessionEffects, abandon_session, begin_session},
        redemption::{self, ClaimLookup, GoalSetup, Redemption},
        timer::{SessionTimers, TimerEntry},
    },
    entities::{
        goal::{self, GoalKind},
        goal_hint,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Result of finishing a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    /// Goal after the session
    pub goal: goal::Model,
    /// Display projection of the goal
    pub progress: GoalProgress,
    /// This session met the weekly target
    pub week_completed: bool,
    /// This session completed the goal
    pub goal_completed: bool,
    /// Both paired goals are now unlocked
    pub unlocked: bool,
    /// Hint for the completed session, if one was produced
    pub hint: Option<ResolvedHint>,
}

/// A goal as shown to a reader.
#[derive(Debug, Clone, Serialize)]
pub struct GoalView {
    /// Stored goal
    pub goal: goal::Model,
    /// Display projection
    pub progress: GoalProgress,
    /// Live timer state
    pub timer: Option<TimerEntry>,
}

/// Orchestrates goal operations and their side channels.
#[derive(Clone)]
pub struct GoalEngine {
    db: DatabaseConnection,
    config: ProgressionConfig,
    hints: HintCache,
    notifier: Arc<dyn Notifier>,
    events: EventBus,
    timers: SessionTimers,
}

impl GoalEngine {
    /// Assembles an engine from its collaborators.
    pub fn new(
        db: DatabaseConnection,
        config: ProgressionConfig,
        hints: HintCache,
        notifier: Arc<dyn Notifier>,
        events: EventBus,
        timers: SessionTimers,
    ) -> Self {
        Self {
            db,
            config,
            hints,
            notifier,
            events,
            timers,
        }
    }

    /// Event bus the engine publishes to.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Live session timers.
    #[must_use]
    pub const fn timers(&self) -> &SessionTimers {
        &self.timers
    }

    async fn notify(&self, notification: NewNotification) {
        notify_best_effort(self.notifier.as_ref(), notification).await;
    }

    fn publish_goal(&self, goal: &goal::Model) {
        self.events.publish(GoalEvent::GoalUpdated { goal: goal.clone() });
        if let Some(partner_id) = goal.partner_goal_id {
            self.events.publish(GoalEvent::PartnerUpdated {
                goal_id: partner_id,
                partner: goal.clone(),
            });
        }
    }

    /// Reads a goal visible to `user_id`, with progress and timer.
    pub async fn goal_view(&self, goal_id: i64, user_id: &str) -> Result<GoalView> {
        let goal = get_visible_goal(&self.db, goal_id, user_id).await?;
        Ok(GoalView {
            progress: progress(&goal),
            timer: self.timers.get(goal.id).await,
            goal,
        })
    }

    /// Every goal the user owns, newest first.
    pub async fn list_goals(&self, user_id: &str) -> Result<Vec<GoalView>> {
        let goals = list_goals_for_user(&self.db, user_id).await?;
        let mut views = Vec::with_capacity(goals.len());
        for goal in goals {
            views.push(GoalView {
                progress: progress(&goal),
                timer: self.timers.get(goal.id).await,
                goal,
            });
        }
        Ok(views)
    }

    /// Starts a session and prefetches the hint for it in the background.
    #[instrument(skip(self))]
    pub async fn start_session(
        &self,
        goal_id: i64,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<goal::Model> {
        let goal = begin_session(&self.db, goal_id, user_id, now).await?;
        self.timers.sync_goal(&goal, now).await;

        let hints = self.hints.clone();
        let target = goal.clone();
        let upcoming = goal.total_sessions_done() + 1;
        tokio::spawn(async move {
            hints.prefetch(&target, upcoming).await;
        });

        self.publish_goal(&goal);
        Ok(goal)
    }

    /// Cancels the running session.
    #[instrument(skip(self))]
    pub async fn cancel_session(
        &self,
        goal_id: i64,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<goal::Model> {
        let goal = abandon_session(&self.db, goal_id, user_id).await?;
        self.timers.sync_goal(&goal, now).await;
        self.publish_goal(&goal);
        Ok(goal)
    }

    /// Finishes the running session and runs the post-commit side channels.
    #[instrument(skip(self))]
    pub async fn finish_session(
        &self,
        goal_id: i64,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionOutcome> {
        let committed =
            progression::commit_session(&self.db, goal_id, user_id, now, &self.config).await?;

        let mut goal = committed.goal;
        let mut partner = committed.pairing.partner;
        let mut unlocked = committed.pairing.unlocked_now;

        if goal.is_finished && !goal.is_unlocked {
            match reconcile_pair(&self.db, goal.id, now).await {
                Ok(Some((reconciled, reconciled_partner))) => {
                    goal = reconciled;
                    partner = Some(reconciled_partner);
                    unlocked = true;
                }
                Ok(None) => {}
                Err(e) => warn!(goal_id, error = %e, "Pair reconciliation failed"),
            }
        }

        let session_number = goal.total_sessions_done();
        let hint = match self.hints.resolve_for_session(goal.id, session_number, now).await {
            Ok(hint) => hint,
            Err(e) => {
                warn!(goal_id, session_number, error = %e, "Hint resolution failed");
                None
            }
        };
        if let Some(hint) = &hint {
            self.timers.set_pending_hint(goal.id, hint.text.clone()).await;
        }
        self.timers.sync_goal(&goal, now).await;

        self.send_session_notifications(&goal, committed.effects, partner.as_ref(), unlocked)
            .await;

        self.publish_goal(&goal);
        if unlocked {
            if let Some(partner) = &partner {
                self.events.publish(GoalEvent::Unlocked {
                    goal_id: goal.id,
                    partner_goal_id: partner.id,
                });
            }
        }

        Ok(SessionOutcome {
            progress: progress(&goal),
            week_completed: committed.effects.week_completed,
            goal_completed: committed.effects.goal_completed,
            unlocked,
            hint,
            goal,
        })
    }

    async fn send_session_notifications(
        &self,
        goal: &goal::Model,
        effects: SessionEffects,
        partner: Option<&goal::Model>,
        unlocked: bool,
    ) {
        match goal.kind() {
            GoalKind::PairedGoal { .. } => {
                let Some(partner) = partner else {
                    return;
                };
                if unlocked {
                    self.notify(
                        NewNotification::to_user(
                            &partner.user_id,
                            "valentine_unlocked",
                            "Your reward is unlocked!",
                            "You both completed your goals. Time to enjoy your experience together.",
                        )
                        .for_goal(partner.id),
                    )
                    .await;
                } else if let Some(tone) = partner_milestone(goal, effects.week_completed, partner) {
                    self.notify(
                        NewNotification::to_user(&partner.user_id, tone.kind(), tone.title(), tone.body())
                            .for_goal(partner.id),
                    )
                    .await;
                }
            }
            GoalKind::EmpoweredGoal { giver_id } => {
                let (kind, title) = if effects.goal_completed {
                    ("goal_completed", format!("{} completed their goal!", goal.title))
                } else if effects.week_completed {
                    ("week_completed", format!("Another week done on {}", goal.title))
                } else {
                    ("session_logged", format!("New session logged on {}", goal.title))
                };
                let body = format!(
                    "{} of {} sessions completed.",
                    goal.total_sessions_done(),
                    goal.total_sessions()
                );
                self.notify(NewNotification::to_user(giver_id, kind, title, body).for_goal(goal.id))
                    .await;
            }
            GoalKind::SelfGoal => debug!(goal_id = goal.id, "No one to notify for a self goal"),
        }
    }

    /// Resolves a claim code without side effects.
    pub async fn lookup_claim(&self, code: &str, now: DateTime<Utc>) -> Result<ClaimLookup> {
        redemption::lookup_claim_code(&self.db, code, now).await
    }

    /// Redeems a claim code and tells the giver or partner about it.
    #[instrument(skip(self, setup))]
    pub async fn redeem(
        &self,
        user_id: &str,
        code: &str,
        setup: GoalSetup,
        now: DateTime<Utc>,
    ) -> Result<Redemption> {
        let redemption = redemption::redeem_claim_code(&self.db, user_id, code, setup, now).await?;
        let goal = &redemption.goal;

        if let GoalKind::EmpoweredGoal { giver_id } = goal.kind() {
            self.notify(
                NewNotification::to_user(
                    giver_id,
                    "approval_requested",
                    "Your gift was redeemed",
                    format!("Review the goal \"{}\" and approve it or suggest a change.", goal.title),
                )
                .for_goal(goal.id),
            )
            .await;
        }
        if let Some(partner) = &redemption.partner_goal {
            self.notify(
                NewNotification::to_user(
                    &partner.user_id,
                    "partner_joined",
                    "Your partner joined the challenge",
                    "You can now see each other's progress.",
                )
                .for_goal(partner.id),
            )
            .await;
            self.publish_goal(partner);
        }

        self.publish_goal(goal);
        Ok(redemption)
    }

    /// Giver approves the goal.
    pub async fn approve(&self, goal_id: i64, giver_id: &str) -> Result<goal::Model> {
        let goal = approval::approve_goal(&self.db, goal_id, giver_id).await?;
        self.notify(
            NewNotification::to_user(
                &goal.user_id,
                "goal_approved",
                "Your goal was approved",
                format!("\"{}\" is approved. Keep going!", goal.title),
            )
            .for_goal(goal.id),
        )
        .await;
        self.publish_goal(&goal);
        Ok(goal)
    }

    /// Giver suggests a different target.
    pub async fn suggest(
        &self,
        goal_id: i64,
        giver_id: &str,
        suggestion: GoalSuggestion,
    ) -> Result<goal::Model> {
        let goal = approval::suggest_goal_change(&self.db, goal_id, giver_id, suggestion).await?;
        let body = goal.suggestion_message.clone().unwrap_or_else(|| {
            format!(
                "Suggested: {} weeks, {} sessions per week.",
                goal.suggested_target_count.unwrap_or(goal.target_count),
                goal.suggested_sessions_per_week.unwrap_or(goal.sessions_per_week)
            )
        });
        self.notify(
            NewNotification::to_user(&goal.user_id, "goal_change_suggested", "Your giver suggested a change", body)
                .for_goal(goal.id),
        )
        .await;
        self.publish_goal(&goal);
        Ok(goal)
    }

    /// Recipient accepts the giver's suggestion.
    pub async fn accept_suggestion(&self, goal_id: i64, user_id: &str) -> Result<goal::Model> {
        let goal = approval::accept_suggested_change(&self.db, goal_id, user_id).await?;
        if let Some(giver_id) = &goal.empowered_by {
            self.notify(
                NewNotification::to_user(
                    giver_id,
                    "suggestion_accepted",
                    "Your suggestion was accepted",
                    format!("\"{}\" now runs with the target you suggested.", goal.title),
                )
                .for_goal(goal.id),
            )
            .await;
        }
        self.publish_goal(&goal);
        Ok(goal)
    }

    /// Giver leaves a hint for an upcoming session.
    pub async fn set_personalized_hint(
        &self,
        goal_id: i64,
        giver_id: &str,
        text: &str,
        for_session: Option<i32>,
    ) -> Result<goal::Model> {
        hints::set_personalized_hint(&self.db, goal_id, giver_id, text, for_session).await
    }

    /// Cached or generated hint for a session of a goal the user can see.
    pub async fn hint_for_session(
        &self,
        goal_id: i64,
        user_id: &str,
        session_number: i32,
    ) -> Result<String> {
        let goal = get_visible_goal(&self.db, goal_id, user_id).await?;
        if !(1..=goal.total_sessions()).contains(&session_number) {
            return Err(Error::validation(format!(
                "session must be between 1 and {}",
                goal.total_sessions()
            )));
        }
        let (text, _) = self.hints.get_or_generate(&goal, session_number).await?;
        Ok(text)
    }

    /// Hints already shown for a goal, newest first.
    pub async fn hint_history(
        &self,
        goal_id: i64,
        user_id: &str,
        limit: u64,
    ) -> Result<Vec<goal_hint::Model>> {
        let goal = get_visible_goal(&self.db, goal_id, user_id).await?;
        self.hints.history(goal.id, limit).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        core::goal::{create_goal, get_goal},
        entities::{Notification, goal::ApprovalStatus, goal_hint::HintSource},
        errors::SessionRejection,
        test_utils::*,
    };
    use chrono::Duration;
    use sea_orm::EntityTrait;

    #[tokio::test]
    async fn test_single_session_scenario() -> Result<()> {
        let db = setup_test_db().await?;
        let (engine, notifier) = test_engine(&db);
        let mut new_goal = new_empowered_goal("bob", "giver", 1, 1);
        new_goal.approval_status = ApprovalStatus::Approved;
        let goal = create_goal(&db, new_goal, base_time()).await?;

        engine.start_session(goal.id, "bob", base_time()).await?;
        let outcome = engine
            .finish_session(goal.id, "bob", base_time() + Duration::seconds(3))
            .await?;

        assert_eq!(outcome.goal.weekly_count, 0);
        assert_eq!(outcome.goal.current_count, 1);
        assert!(outcome.goal_completed);
        assert!(outcome.week_completed);
        assert_eq!(outcome.progress.percent.round() as i64, 100);
        assert_eq!(outcome.hint.as_ref().map(|h| h.session_number), Some(1));

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, "goal_completed");

        Ok(())
    }

    #[tokio::test]
    async fn test_rejection_leaves_state_and_sends_nothing() -> Result<()> {
        let db = setup_test_db().await?;
        let (engine, notifier) = test_engine(&db);
        let goal = create_goal(&db, new_empowered_goal("bob", "giver", 2, 2), base_time()).await?;

        engine.start_session(goal.id, "bob", base_time()).await?;
        let result = engine
            .finish_session(goal.id, "bob", base_time() + Duration::seconds(1))
            .await;

        assert!(matches!(
            result,
            Err(Error::Session {
                reason: SessionRejection::TooShort { .. }
            })
        ));
        assert!(notifier.sent().is_empty());
        assert_eq!(get_goal(&db, goal.id).await?.weekly_count, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_personalized_hint_in_outcome() -> Result<()> {
        let db = setup_test_db().await?;
        let (engine, _) = test_engine(&db);
        let goal = create_goal(&db, new_empowered_goal("bob", "giver", 2, 2), base_time()).await?;

        engine
            .set_personalized_hint(goal.id, "giver", "You've got this", None)
            .await?;
        engine.start_session(goal.id, "bob", base_time()).await?;
        let outcome = engine
            .finish_session(goal.id, "bob", base_time() + Duration::minutes(30))
            .await?;

        let hint = outcome.hint.unwrap();
        assert_eq!(hint.text, "You've got this");
        assert_eq!(hint.source, HintSource::Personalized);
        assert_eq!(
            engine.timers().take_pending_hint(goal.id).await.as_deref(),
            Some("You've got this")
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_failing_notifier_does_not_fail_session() -> Result<()> {
        let db = setup_test_db().await?;
        let engine = test_engine_with(&db, Arc::new(FailingNotifier), Arc::new(StubHintGenerator::failing()));
        let mut new_goal = new_empowered_goal("bob", "giver", 2, 2);
        new_goal.approval_status = ApprovalStatus::Approved;
        let goal = create_goal(&db, new_goal, base_time()).await?;

        engine.start_session(goal.id, "bob", base_time()).await?;
        let outcome = engine
            .finish_session(goal.id, "bob", base_time() + Duration::seconds(5))
            .await?;

        assert_eq!(outcome.goal.weekly_count, 1);
        assert_eq!(outcome.hint.map(|h| h.source), Some(HintSource::Fallback));

        Ok(())
    }

    #[tokio::test]
    async fn test_partner_gets_milestone_and_unlock() -> Result<()> {
        let db = setup_test_db().await?;
        let (engine, notifier) = test_engine(&db);
        let (a, b) = create_test_pair(&db, 1, 2).await?;
        let mut events = engine.events().subscribe();

        engine.start_session(a.id, "alice", base_time()).await?;
        engine
            .finish_session(a.id, "alice", base_time() + Duration::seconds(5))
            .await?;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, "partner_first_session");
        assert_eq!(
            sent[0].recipient,
            crate::core::notify::Recipient::User("bob".to_string())
        );

        let day2 = base_time() + Duration::days(1);
        engine.start_session(a.id, "alice", day2).await?;
        engine.finish_session(a.id, "alice", day2 + Duration::seconds(5)).await?;

        for t in [base_time(), day2] {
            engine.start_session(b.id, "bob", t).await?;
            engine.finish_session(b.id, "bob", t + Duration::seconds(5)).await?;
        }

        let last = notifier.sent().pop().unwrap();
        assert_eq!(last.kind, "valentine_unlocked");
        assert!(get_goal(&db, a.id).await?.is_unlocked);
        assert!(get_goal(&db, b.id).await?.is_unlocked);

        let mut saw_unlock = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, GoalEvent::Unlocked { .. }) {
                saw_unlock = true;
            }
        }
        assert!(saw_unlock);

        Ok(())
    }

    #[tokio::test]
    async fn test_redeem_notifies_giver() -> Result<()> {
        let db = setup_test_db().await?;
        let (engine, notifier) = test_engine(&db);
        create_test_experience(&db, "exp-1").await?;
        insert_test_gift(&db, "exp-1", "GIFTCODE2345", "giver").await?;

        let setup = GoalSetup {
            title: Some("Climb".to_string()),
            target_count: 2,
            sessions_per_week: 2,
            target_hours: 1,
            target_minutes: 0,
        };
        let redemption = engine.redeem("bob", "GIFTCODE2345", setup, base_time()).await?;
        assert_eq!(redemption.goal.title, "Climb");

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, "approval_requested");

        let approved = engine.approve(redemption.goal.id, "giver").await?;
        assert_eq!(approved.approval_status, ApprovalStatus::Approved);
        assert_eq!(notifier.sent().len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_hint_for_session_checks_range() -> Result<()> {
        let db = setup_test_db().await?;
        let (engine, _) = test_engine(&db);
        let goal = create_goal(&db, new_self_goal("alice", 1, 2), base_time()).await?;

        assert!(engine.hint_for_session(goal.id, "alice", 2).await.is_ok());
        assert!(matches!(
            engine.hint_for_session(goal.id, "alice", 3).await,
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            engine.hint_for_session(goal.id, "mallory", 1).await,
            Err(Error::Forbidden { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_db_notifier_rows_after_session() -> Result<()> {
        let db = setup_test_db().await?;
        let engine = test_engine_with(
            &db,
            Arc::new(crate::core::notify::DbNotifier::new(db.clone())),
            Arc::new(StubHintGenerator::new("Keep going")),
        );
        let mut new_goal = new_empowered_goal("bob", "giver", 2, 2);
        new_goal.approval_status = ApprovalStatus::Approved;
        let goal = create_goal(&db, new_goal, base_time()).await?;

        engine.start_session(goal.id, "bob", base_time()).await?;
        engine
            .finish_session(goal.id, "bob", base_time() + Duration::seconds(5))
            .await?;

        let rows = Notification::find().all(&db).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].recipient_user_id.as_deref(), Some("giver"));

        Ok(())
    }
}
