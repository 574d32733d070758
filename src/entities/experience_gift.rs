//! Experience gift entity - A single-recipient reward unit.
//!
//! One purchased unit is one gift, one claim code and eventually one goal.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Redemption state of a gift.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum GiftStatus {
    /// Waiting for the recipient
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Redeemed into a goal
    #[sea_orm(string_value = "claimed")]
    Claimed,
}

/// Experience gift database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "experience_gifts")]
pub struct Model {
    /// Unique identifier for the gift
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Code the recipient enters to claim the gift
    #[sea_orm(unique)]
    pub claim_code: String,
    /// Experience being gifted
    pub experience_id: String,
    /// User id of the purchaser
    pub giver_id: String,
    /// Purchaser's display name
    pub giver_name: Option<String>,
    /// Message from the purchaser
    pub personal_message: Option<String>,
    /// Redemption state
    pub status: GiftStatus,
    /// Payment that produced this gift
    pub payment_intent_id: String,
    /// Recipient who claimed the gift
    pub claimed_by: Option<String>,
    /// When the gift was claimed
    pub claimed_at: Option<DateTimeUtc>,
    /// Claim deadline
    pub expires_at: DateTimeUtc,
    /// When the gift was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `ExperienceGift` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each gift belongs to one experience
    #[sea_orm(
        belongs_to = "super::experience::Entity",
        from = "Column::ExperienceId",
        to = "super::experience::Column::Id"
    )]
    Experience,
}

impl Related<super::experience::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Experience.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
