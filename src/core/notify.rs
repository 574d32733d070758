//! Notification hook.
//!
//! Notifications are fire-and-forget: they are sent only after the state change they
//! describe has committed, and a failure to send is logged and swallowed so it can never
//! roll back or fail the operation that triggered it.

use crate::{
    entities::notification,
    errors::Result,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tracing::{debug, warn};

/// Who a notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// A registered user
    User(String),
    /// An email address without an account, e.g. a Valentine purchaser
    Email(String),
}

/// A notification to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    /// Addressee
    pub recipient: Recipient,
    /// Machine-readable kind, e.g. `"partner_milestone"`
    pub kind: String,
    /// Short title
    pub title: String,
    /// Body text
    pub body: String,
    /// Goal the notification is about
    pub goal_id: Option<i64>,
}

impl NewNotification {
    /// Builds a notification for a registered user.
    pub fn to_user(
        user_id: impl Into<String>,
        kind: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: Recipient::User(user_id.into()),
            kind: kind.into(),
            title: title.into(),
            body: body.into(),
            goal_id: None,
        }
    }

    /// Attaches the goal the notification is about.
    #[must_use]
    pub const fn for_goal(mut self, goal_id: i64) -> Self {
        self.goal_id = Some(goal_id);
        self
    }
}

/// Delivery channel for notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one notification.
    async fn send(&self, notification: NewNotification) -> Result<()>;
}

/// Stores notifications in the `notifications` table for an external delivery pipeline.
#[derive(Debug, Clone)]
pub struct DbNotifier {
    db: DatabaseConnection,
}

impl DbNotifier {
    /// Creates a notifier writing to `db`.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Notifier for DbNotifier {
    async fn send(&self, notification: NewNotification) -> Result<()> {
        let (recipient_user_id, recipient_email) = match notification.recipient {
            Recipient::User(user_id) => (Some(user_id), None),
            Recipient::Email(email) => (None, Some(email)),
        };

        let model = notification::ActiveModel {
            recipient_user_id: Set(recipient_user_id),
            recipient_email: Set(recipient_email),
            kind: Set(notification.kind),
            title: Set(notification.title),
            body: Set(notification.body),
            goal_id: Set(notification.goal_id),
            read: Set(false),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        model.insert(&self.db).await?;
        Ok(())
    }
}

/// Sends a notification, logging instead of failing when delivery fails.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: NewNotification) {
    let kind = notification.kind.clone();
    match notifier.send(notification).await {
        Ok(()) => debug!(kind = %kind, "Notification sent"),
        Err(e) => warn!(kind = %kind, error = %e, "Notification failed, continuing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Notification;
    use crate::test_utils::{FailingNotifier, setup_test_db};
    use sea_orm::EntityTrait;

    #[tokio::test]
    async fn test_db_notifier_stores_row() -> Result<()> {
        let db = setup_test_db().await?;
        let notifier = DbNotifier::new(db.clone());

        notifier
            .send(NewNotification::to_user("alice", "unlock", "Unlocked", "Enjoy").for_goal(7))
            .await?;

        let rows = Notification::find().all(&db).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].recipient_user_id.as_deref(), Some("alice"));
        assert_eq!(rows[0].goal_id, Some(7));
        assert!(!rows[0].read);

        Ok(())
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failure() {
        let notifier = FailingNotifier;
        notify_best_effort(
            &notifier,
            NewNotification::to_user("alice", "unlock", "Unlocked", "Enjoy"),
        )
        .await;
    }
}
