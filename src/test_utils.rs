//! Shared test utilities.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults, plus scripted stand-ins for the
//! code source, notifier and hint generator.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use crate::{
    config::{HintsConfig, ProgressionConfig},
    core::{
        claim_code::CodeSource,
        engine::GoalEngine,
        events::EventBus,
        goal::{NewGoal, create_goal, save_goal},
        hints::{HintCache, HintGenerator, HintRequest},
        notify::{NewNotification, Notifier},
        timer::SessionTimers,
    },
    entities::{
        experience, experience_gift,
        goal::{self, ApprovalStatus, GoalKind, GoalKindTag, LogDates},
        valentine_challenge::{self, ChallengeMode, ChallengeStatus},
    },
    errors::{Error, Result},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, IntoActiveModel, Set};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Fixed reference instant: Monday 2025-03-03 09:00 UTC.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
}

/// An unsaved self goal for pure state-machine tests.
///
/// # Defaults
/// * `id`: 1, `user_id`: `"alice"`
/// * window anchored at [`base_time`], no approval involved
pub fn goal_model(target_count: i32, sessions_per_week: i32) -> goal::Model {
    goal::Model {
        id: 1,
        user_id: "alice".to_string(),
        kind: GoalKindTag::SelfGoal,
        empowered_by: None,
        experience_id: None,
        experience_gift_id: None,
        title: "Test goal".to_string(),
        target_count,
        sessions_per_week,
        target_hours: 1,
        target_minutes: 0,
        current_count: 0,
        weekly_count: 0,
        weekly_log_dates: LogDates::default(),
        week_start_at: base_time(),
        is_week_completed: false,
        is_completed: false,
        completed_at: None,
        is_finished: false,
        is_unlocked: false,
        unlocked_at: None,
        approval_status: ApprovalStatus::NotRequired,
        approval_requested_at: None,
        suggested_target_count: None,
        suggested_sessions_per_week: None,
        suggestion_message: None,
        personalized_next_hint: None,
        personalized_hint_session: None,
        valentine_challenge_id: None,
        partner_goal_id: None,
        session_started_at: None,
        last_session_at: None,
        created_at: base_time(),
    }
}

fn new_goal(user_id: &str, kind: GoalKind, target_count: i32, sessions_per_week: i32) -> NewGoal {
    let approval_status = match kind {
        GoalKind::EmpoweredGoal { .. } => ApprovalStatus::Pending,
        _ => ApprovalStatus::NotRequired,
    };
    NewGoal {
        user_id: user_id.to_string(),
        kind,
        experience_id: None,
        experience_gift_id: None,
        title: "Test goal".to_string(),
        target_count,
        sessions_per_week,
        target_hours: 1,
        target_minutes: 0,
        approval_status,
    }
}

/// A self goal ready for [`create_goal`].
pub fn new_self_goal(user_id: &str, target_count: i32, sessions_per_week: i32) -> NewGoal {
    new_goal(user_id, GoalKind::SelfGoal, target_count, sessions_per_week)
}

/// An empowered goal waiting for `giver_id`'s approval.
pub fn new_empowered_goal(
    user_id: &str,
    giver_id: &str,
    target_count: i32,
    sessions_per_week: i32,
) -> NewGoal {
    new_goal(
        user_id,
        GoalKind::EmpoweredGoal {
            giver_id: giver_id.to_string(),
        },
        target_count,
        sessions_per_week,
    )
}

/// Creates a catalog experience.
pub async fn create_test_experience(
    db: &DatabaseConnection,
    id: &str,
) -> Result<experience::Model> {
    experience::ActiveModel {
        id: Set(id.to_string()),
        title: Set(format!("Experience {id}")),
        category: Set("adventure".to_string()),
        description: Set("A test experience".to_string()),
        price_cents: Set(5000),
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates a pending gift expiring 365 days after [`base_time`].
pub async fn insert_test_gift(
    db: &DatabaseConnection,
    experience_id: &str,
    claim_code: &str,
    giver_id: &str,
) -> Result<experience_gift::Model> {
    experience_gift::ActiveModel {
        claim_code: Set(claim_code.to_string()),
        experience_id: Set(experience_id.to_string()),
        giver_id: Set(giver_id.to_string()),
        giver_name: Set(Some("Gina".to_string())),
        personal_message: Set(None),
        status: Set(experience_gift::GiftStatus::Pending),
        payment_intent_id: Set("pi_test".to_string()),
        claimed_by: Set(None),
        claimed_at: Set(None),
        // Far enough out that wall-clock lookups in HTTP tests still see it open.
        expires_at: Set(base_time() + Duration::days(365 * 100)),
        created_at: Set(base_time()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates an unredeemed revealed-mode challenge of 2 weeks × 2 sessions.
pub async fn insert_test_challenge(
    db: &DatabaseConnection,
    experience_id: &str,
    purchaser_code: &str,
    partner_code: &str,
) -> Result<valentine_challenge::Model> {
    insert_challenge(db, experience_id, purchaser_code, partner_code, 2, 2).await
}

async fn insert_challenge(
    db: &DatabaseConnection,
    experience_id: &str,
    purchaser_code: &str,
    partner_code: &str,
    target_count: i32,
    sessions_per_week: i32,
) -> Result<valentine_challenge::Model> {
    valentine_challenge::ActiveModel {
        purchaser_code: Set(purchaser_code.to_string()),
        partner_code: Set(partner_code.to_string()),
        purchaser_code_redeemed: Set(false),
        partner_code_redeemed: Set(false),
        purchaser_user_id: Set(None),
        partner_user_id: Set(None),
        purchaser_goal_id: Set(None),
        partner_goal_id: Set(None),
        purchaser_email: Set("romeo@example.com".to_string()),
        purchaser_name: Set(None),
        experience_id: Set(experience_id.to_string()),
        mode: Set(ChallengeMode::Revealed),
        target_count: Set(target_count),
        sessions_per_week: Set(sessions_per_week),
        status: Set(ChallengeStatus::PendingRedemption),
        payment_intent_id: Set("pi_valentine".to_string()),
        created_at: Set(base_time()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates an active challenge with linked goals for `"alice"` and `"bob"`.
pub async fn create_test_pair(
    db: &DatabaseConnection,
    target_count: i32,
    sessions_per_week: i32,
) -> Result<(goal::Model, goal::Model)> {
    let challenge = insert_challenge(
        db,
        "exp-pair",
        "PAIRCODEA234",
        "PAIRCODEB234",
        target_count,
        sessions_per_week,
    )
    .await?;

    let alice = create_goal(
        db,
        new_goal(
            "alice",
            GoalKind::PairedGoal {
                challenge_id: challenge.id,
                partner_goal_id: None,
            },
            target_count,
            sessions_per_week,
        ),
        base_time(),
    )
    .await?;
    let bob = create_goal(
        db,
        new_goal(
            "bob",
            GoalKind::PairedGoal {
                challenge_id: challenge.id,
                partner_goal_id: Some(alice.id),
            },
            target_count,
            sessions_per_week,
        ),
        base_time(),
    )
    .await?;

    let mut alice = alice;
    alice.partner_goal_id = Some(bob.id);
    let alice = save_goal(db, alice).await?;

    let mut active = challenge.into_active_model();
    active.purchaser_code_redeemed = Set(true);
    active.partner_code_redeemed = Set(true);
    active.purchaser_user_id = Set(Some("alice".to_string()));
    active.partner_user_id = Set(Some("bob".to_string()));
    active.purchaser_goal_id = Set(Some(alice.id));
    active.partner_goal_id = Set(Some(bob.id));
    active.status = Set(ChallengeStatus::Active);
    active.update(db).await?;

    Ok((alice, bob))
}

/// Code source replaying a script; the last code repeats once the script runs out.
pub struct ScriptedCodeSource {
    codes: Vec<String>,
    draws: usize,
}

impl ScriptedCodeSource {
    /// Creates a source replaying `codes`.
    pub fn new(codes: &[&str]) -> Self {
        Self {
            codes: codes.iter().map(ToString::to_string).collect(),
            draws: 0,
        }
    }

    /// Number of codes handed out so far.
    pub const fn draws(&self) -> usize {
        self.draws
    }
}

impl CodeSource for ScriptedCodeSource {
    fn next_code(&mut self, _length: usize) -> String {
        let index = self.draws.min(self.codes.len() - 1);
        self.draws += 1;
        self.codes[index].clone()
    }
}

/// Notifier remembering everything it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<NewNotification>>,
}

impl RecordingNotifier {
    /// Notifications sent so far, oldest first.
    pub fn sent(&self) -> Vec<NewNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: NewNotification) -> Result<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Notifier that always fails.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _notification: NewNotification) -> Result<()> {
        Err(Error::Config {
            message: "notification pipeline unavailable".to_string(),
        })
    }
}

/// Hint generator with a fixed answer that counts calls.
pub struct StubHintGenerator {
    text: Option<String>,
    calls: AtomicUsize,
    last_request: Mutex<Option<HintRequest>>,
}

impl StubHintGenerator {
    /// Generator answering `text`.
    pub fn new(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Generator failing every call.
    pub fn failing() -> Self {
        Self {
            text: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Number of generate calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent request.
    pub fn last_request(&self) -> Option<HintRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl HintGenerator for StubHintGenerator {
    async fn generate(&self, request: &HintRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        self.text
            .clone()
            .ok_or_else(|| Error::validation("generator offline"))
    }
}

/// Engine with the given notifier and generator over `db`.
pub fn test_engine_with(
    db: &DatabaseConnection,
    notifier: Arc<dyn Notifier>,
    generator: Arc<dyn HintGenerator>,
) -> GoalEngine {
    GoalEngine::new(
        db.clone(),
        ProgressionConfig::default(),
        HintCache::new(db.clone(), generator, &HintsConfig::default()),
        notifier,
        EventBus::new(64),
        SessionTimers::new(),
    )
}

/// Engine with a recording notifier and a stub generator answering `"Keep going"`.
pub fn test_engine(db: &DatabaseConnection) -> (GoalEngine, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = test_engine_with(
        db,
        notifier.clone(),
        Arc::new(StubHintGenerator::new("Keep going")),
    );
    (engine, notifier)
}
