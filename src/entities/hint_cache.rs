//! Hint cache entity - Durable copy of generated hints keyed by goal and session.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Cached generated hint
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "hint_cache")]
pub struct Model {
    /// Goal the hint was generated for
    #[sea_orm(primary_key, auto_increment = false)]
    pub goal_id: i64,
    /// Session number the hint was generated for
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_number: i32,
    /// Generated text
    pub text: String,
    /// Style requested from the generator
    pub style: String,
    /// When the entry was written
    pub created_at: DateTimeUtc,
}

/// `HintCache` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
