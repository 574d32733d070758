//! Processed payment entity - Idempotency marker for the payment webhook.
//!
//! The payment intent id is the primary key, so two deliveries of the same event can
//! never both commit a marker. Its presence is the single source of truth that the
//! payment's records were materialized.

use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Ids of the gifts produced by one payment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct IdList(pub Vec<i64>);

/// Processed payment database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "processed_payments")]
pub struct Model {
    /// Payment intent id from the payment provider
    #[sea_orm(primary_key, auto_increment = false)]
    pub payment_intent_id: String,
    /// `"standard"` or `"valentine"`
    pub purchase_type: String,
    /// Gifts created for a standard purchase
    pub gift_ids: IdList,
    /// Challenge created for a Valentine purchase
    pub challenge_id: Option<i64>,
    /// When the payment was materialized
    pub processed_at: DateTimeUtc,
}

/// `ProcessedPayment` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
