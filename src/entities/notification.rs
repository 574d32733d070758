//! Notification entity - Fire-and-forget notification records.
//!
//! Rows are picked up by a delivery pipeline outside this crate.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Notification database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    /// Unique identifier for the notification
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Recipient user id, if the recipient has an account
    pub recipient_user_id: Option<String>,
    /// Recipient e-mail, for purchasers without an account
    pub recipient_email: Option<String>,
    /// Machine-readable kind (e.g., `"valentine_codes"`, `"partner_halfway"`)
    pub kind: String,
    /// Short title
    pub title: String,
    /// Message body
    pub body: String,
    /// Goal the notification is about
    pub goal_id: Option<i64>,
    /// Whether the recipient has read it
    pub read: bool,
    /// When the notification was created
    pub created_at: DateTimeUtc,
}

/// `Notification` has no navigable relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
