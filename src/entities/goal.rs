//! Goal entity - A recipient's tracked commitment.
//!
//! A goal holds the target shape (weeks × sessions per week), the progress counters,
//! the approval gate, the pending personalized hint and, for Valentine challenges, the
//! link to the partner's goal. Goals are never hard-deleted since they represent
//! redeemed value.

use chrono::NaiveDate;
use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Approval state set by the giver of an empowered goal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// No approval involved (self-gifted and paired goals)
    #[sea_orm(string_value = "none")]
    #[serde(rename = "none")]
    NotRequired,
    /// Waiting for the giver's decision
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Giver approved the goal
    #[sea_orm(string_value = "approved")]
    Approved,
    /// Giver proposed a different target
    #[sea_orm(string_value = "suggested_change")]
    SuggestedChange,
}

impl ApprovalStatus {
    /// Whether the giver still owes a decision.
    #[must_use]
    pub const fn is_awaiting_decision(self) -> bool {
        matches!(self, Self::Pending | Self::SuggestedChange)
    }
}

/// Stored discriminant of [`GoalKind`].
///
/// Stored as `"self"`, `"empowered"` and `"paired"`. `ActiveEnum` is implemented by
/// hand because `DeriveActiveEnum` turns the `"self"` string value into a `Self`
/// identifier, which does not compile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalKindTag {
    /// Recipient gifted the experience to themselves
    #[serde(rename = "self")]
    SelfGoal,
    /// A giver empowers the recipient and approves the goal
    Empowered,
    /// One half of a Valentine challenge
    Paired,
}

/// Iden naming the [`GoalKindTag`] enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalKindTagEnum;

impl sea_orm::sea_query::Iden for GoalKindTagEnum {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", "GoalKindTag").unwrap();
    }
}

impl ActiveEnum for GoalKindTag {
    type Value = String;

    type ValueVec = Vec<String>;

    fn name() -> sea_orm::sea_query::DynIden {
        sea_orm::sea_query::SeaRc::new(GoalKindTagEnum) as sea_orm::sea_query::DynIden
    }

    fn to_value(&self) -> Self::Value {
        match self {
            Self::SelfGoal => "self",
            Self::Empowered => "empowered",
            Self::Paired => "paired",
        }
        .to_owned()
    }

    fn try_from_value(v: &Self::Value) -> Result<Self, DbErr> {
        match v.as_ref() {
            "self" => Ok(Self::SelfGoal),
            "empowered" => Ok(Self::Empowered),
            "paired" => Ok(Self::Paired),
            _ => Err(DbErr::Type(format!("unexpected value for GoalKindTag enum: {v}"))),
        }
    }

    fn db_type() -> ColumnDef {
        ColumnTypeTrait::def(ColumnType::String(StringLen::None))
    }
}

impl From<GoalKindTag> for sea_orm::sea_query::Value {
    fn from(tag: GoalKindTag) -> Self {
        tag.to_value().into()
    }
}

impl sea_orm::TryGetable for GoalKindTag {
    fn try_get_by<I: sea_orm::ColIdx>(res: &QueryResult, idx: I) -> Result<Self, sea_orm::TryGetError> {
        let value = <String as sea_orm::TryGetable>::try_get_by(res, idx)?;
        Self::try_from_value(&value).map_err(sea_orm::TryGetError::DbErr)
    }
}

impl sea_orm::sea_query::ValueType for GoalKindTag {
    fn try_from(v: sea_orm::sea_query::Value) -> Result<Self, sea_orm::sea_query::ValueTypeErr> {
        let value = <String as sea_orm::sea_query::ValueType>::try_from(v)?;
        Self::try_from_value(&value).map_err(|_| sea_orm::sea_query::ValueTypeErr)
    }

    fn type_name() -> String {
        <String as sea_orm::sea_query::ValueType>::type_name()
    }

    fn array_type() -> sea_orm::sea_query::ArrayType {
        <String as sea_orm::sea_query::ValueType>::array_type()
    }

    fn column_type() -> sea_orm::sea_query::ColumnType {
        Self::db_type().get_column_type().to_owned()
    }

    fn enum_type_name() -> Option<&'static str> {
        Some("GoalKindTag")
    }
}

impl sea_orm::sea_query::Nullable for GoalKindTag {
    fn null() -> sea_orm::sea_query::Value {
        <String as sea_orm::sea_query::Nullable>::null()
    }
}

/// The role a goal plays, with the data each role needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoalKind {
    /// Self-gifted goal, no giver involved
    SelfGoal,
    /// Goal empowered by a giver
    EmpoweredGoal {
        /// User id of the giver
        giver_id: String,
    },
    /// Valentine goal linked to a partner
    PairedGoal {
        /// Shared challenge id
        challenge_id: i64,
        /// Partner's goal, absent until the partner redeems their code
        partner_goal_id: Option<i64>,
    },
}

/// Ordered set of calendar days logged in the current week.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct LogDates(pub Vec<NaiveDate>);

impl LogDates {
    /// Whether `day` is already logged.
    #[must_use]
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.0.contains(&day)
    }

    /// Inserts `day` keeping the set ordered; logging the same day twice is a no-op.
    pub fn insert(&mut self, day: NaiveDate) {
        if let Err(pos) = self.0.binary_search(&day) {
            self.0.insert(pos, day);
        }
    }

    /// Number of distinct days logged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no day is logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Goal database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "goals")]
pub struct Model {
    /// Unique identifier for the goal
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Recipient who owns and progresses the goal
    pub user_id: String,
    /// Role of the goal, see [`Model::kind`]
    pub kind: GoalKindTag,
    /// Giver who empowered the goal, used for notification routing
    pub empowered_by: Option<String>,
    /// Experience unlocked by the goal
    pub experience_id: Option<String>,
    /// Gift this goal was created from
    pub experience_gift_id: Option<i64>,
    /// Display title
    pub title: String,
    /// Number of weeks to complete
    pub target_count: i32,
    /// Sessions required per week
    pub sessions_per_week: i32,
    /// Informational per-session duration (hours part)
    pub target_hours: i32,
    /// Informational per-session duration (minutes part)
    pub target_minutes: i32,
    /// Completed weeks
    pub current_count: i32,
    /// Sessions done in the current week
    pub weekly_count: i32,
    /// Days logged in the current week
    pub weekly_log_dates: LogDates,
    /// Anchor of the rolling 7-day window
    pub week_start_at: DateTimeUtc,
    /// Weekly target met; waiting for the next window
    pub is_week_completed: bool,
    /// All weeks completed
    pub is_completed: bool,
    /// When the goal was completed
    pub completed_at: Option<DateTimeUtc>,
    /// Paired goals: this side reached completion
    pub is_finished: bool,
    /// Paired goals: both sides reached completion
    pub is_unlocked: bool,
    /// When the shared reward was unlocked
    pub unlocked_at: Option<DateTimeUtc>,
    /// Giver approval gate
    pub approval_status: ApprovalStatus,
    /// When approval was requested, consumed by the external auto-approval job
    pub approval_requested_at: Option<DateTimeUtc>,
    /// Target proposed by the giver
    pub suggested_target_count: Option<i32>,
    /// Cadence proposed by the giver
    pub suggested_sessions_per_week: Option<i32>,
    /// Message accompanying the giver's suggestion
    pub suggestion_message: Option<String>,
    /// Giver-authored hint waiting to be shown
    pub personalized_next_hint: Option<String>,
    /// Session number the personalized hint is meant for
    pub personalized_hint_session: Option<i32>,
    /// Valentine challenge shared with the partner
    pub valentine_challenge_id: Option<i64>,
    /// Partner's goal, set once the partner redeems their code
    pub partner_goal_id: Option<i64>,
    /// Start of the running session, `None` when no session runs
    pub session_started_at: Option<DateTimeUtc>,
    /// When the last session was logged
    pub last_session_at: Option<DateTimeUtc>,
    /// When the goal was created
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Explicit role of this goal.
    #[must_use]
    pub fn kind(&self) -> GoalKind {
        match (self.kind, &self.empowered_by, self.valentine_challenge_id) {
            (GoalKindTag::Empowered, Some(giver), _) => GoalKind::EmpoweredGoal {
                giver_id: giver.clone(),
            },
            (GoalKindTag::Paired, _, Some(challenge_id)) => GoalKind::PairedGoal {
                challenge_id,
                partner_goal_id: self.partner_goal_id,
            },
            _ => GoalKind::SelfGoal,
        }
    }

    /// Total sessions the goal requires.
    #[must_use]
    pub const fn total_sessions(&self) -> i32 {
        self.target_count * self.sessions_per_week
    }

    /// Sessions completed so far across all weeks.
    #[must_use]
    pub const fn total_sessions_done(&self) -> i32 {
        self.current_count * self.sessions_per_week + self.weekly_count
    }

    /// Whether a session timer is running.
    #[must_use]
    pub const fn is_session_running(&self) -> bool {
        self.session_started_at.is_some()
    }

    /// Whether this is a paired goal.
    #[must_use]
    pub fn is_paired(&self) -> bool {
        matches!(self.kind(), GoalKind::PairedGoal { .. })
    }
}

/// Defines relationships between Goal and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One goal has many consumed hints
    #[sea_orm(has_many = "super::goal_hint::Entity")]
    Hints,
}

impl Related<super::goal_hint::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Hints.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
