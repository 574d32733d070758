//! Valentine challenge entity - A paired reward unit with two redemption codes.
//!
//! Exactly one challenge exists per qualifying payment. Each partner redeems their own
//! code and progresses their own goal; the reward unlocks once both goals complete.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of a challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    /// Neither code redeemed
    #[sea_orm(string_value = "pending_redemption")]
    PendingRedemption,
    /// One code redeemed, waiting for the partner
    #[sea_orm(string_value = "awaiting_partner")]
    AwaitingPartner,
    /// Both goals exist and are progressing
    #[sea_orm(string_value = "active")]
    Active,
    /// Both goals completed and the reward is unlocked
    #[sea_orm(string_value = "completed")]
    Completed,
}

/// Whether the partners know the experience up front.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum ChallengeMode {
    /// Experience is shown from the start
    #[sea_orm(string_value = "revealed")]
    Revealed,
    /// Experience stays hidden until unlocked
    #[sea_orm(string_value = "secret")]
    Secret,
}

impl std::str::FromStr for ChallengeMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "revealed" => Ok(Self::Revealed),
            "secret" => Ok(Self::Secret),
            other => Err(format!("unknown challenge mode '{other}'")),
        }
    }
}

/// Valentine challenge database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "valentine_challenges")]
pub struct Model {
    /// Unique identifier for the challenge
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Code kept by the purchaser
    #[sea_orm(unique)]
    pub purchaser_code: String,
    /// Code handed to the partner
    #[sea_orm(unique)]
    pub partner_code: String,
    /// Purchaser code already redeemed
    pub purchaser_code_redeemed: bool,
    /// Partner code already redeemed
    pub partner_code_redeemed: bool,
    /// User who redeemed the purchaser code
    pub purchaser_user_id: Option<String>,
    /// User who redeemed the partner code
    pub partner_user_id: Option<String>,
    /// Goal created from the purchaser code
    pub purchaser_goal_id: Option<i64>,
    /// Goal created from the partner code
    pub partner_goal_id: Option<i64>,
    /// Where the codes are delivered
    pub purchaser_email: String,
    /// Purchaser's display name
    pub purchaser_name: Option<String>,
    /// Shared reward
    pub experience_id: String,
    /// Reveal mode
    pub mode: ChallengeMode,
    /// Weeks each partner must complete
    pub target_count: i32,
    /// Sessions per week each partner must complete
    pub sessions_per_week: i32,
    /// Lifecycle state
    pub status: ChallengeStatus,
    /// Payment that produced this challenge
    pub payment_intent_id: String,
    /// When the challenge was created
    pub created_at: DateTimeUtc,
}

/// `ValentineChallenge` has no navigable relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
