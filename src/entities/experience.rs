//! Experience entity - Catalog entry a goal unlocks.
//!
//! The catalog is owned by the surrounding system; this crate only reads it to validate
//! purchases and to give the hint generator some context.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Experience database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "experiences")]
pub struct Model {
    /// Catalog identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Display title (e.g., "Sunset kayak tour")
    pub title: String,
    /// Catalog category (e.g., "adventure", "wellness")
    pub category: String,
    /// Short description used as generator context
    pub description: String,
    /// Price in cents
    pub price_cents: i64,
}

/// Defines relationships between Experience and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One experience is sold as many gifts
    #[sea_orm(has_many = "super::experience_gift::Entity")]
    Gifts,
}

impl Related<super::experience_gift::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Gifts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
