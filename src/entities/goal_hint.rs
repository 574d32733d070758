//! Goal hint entity - Append-only history of hints shown to a recipient.
//!
//! The composite primary key `(goal_id, session_number)` guarantees that at most one
//! hint is ever consumed per session transition.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Where a hint came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum HintSource {
    /// Written by the giver
    #[sea_orm(string_value = "personalized")]
    Personalized,
    /// Produced by the text generator (or read from its cache)
    #[sea_orm(string_value = "generated")]
    Generated,
    /// Static encouragement used when generation failed
    #[sea_orm(string_value = "fallback")]
    Fallback,
}

/// Consumed hint database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "goal_hints")]
pub struct Model {
    /// Goal the hint was shown for
    #[sea_orm(primary_key, auto_increment = false)]
    pub goal_id: i64,
    /// Session number the hint belongs to
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_number: i32,
    /// Hint text
    pub text: String,
    /// Origin of the hint
    pub source: HintSource,
    /// When the hint was shown
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `GoalHint` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each hint belongs to one goal
    #[sea_orm(
        belongs_to = "super::goal::Entity",
        from = "Column::GoalId",
        to = "super::goal::Column::Id"
    )]
    Goal,
}

impl Related<super::goal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Goal.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
