//! In-process event bus for live goal updates.
//!
//! The engine publishes after each committed change; the HTTP layer fans events out to
//! subscribed clients over server-sent events so a partner's progress shows up without
//! polling.

use crate::entities::goal;
use serde::Serialize;
use tokio::sync::broadcast;

/// A change observers may want to render.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoalEvent {
    /// A goal's state changed
    GoalUpdated {
        /// Goal after the change
        goal: goal::Model,
    },
    /// The partner of `goal_id` changed
    PartnerUpdated {
        /// Goal whose partner changed
        goal_id: i64,
        /// Partner goal after the change
        partner: goal::Model,
    },
    /// Both paired goals completed and the reward unlocked
    Unlocked {
        /// One of the unlocked goals
        goal_id: i64,
        /// The other unlocked goal
        partner_goal_id: i64,
    },
}

impl GoalEvent {
    /// Event name used on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GoalUpdated { .. } => "goal:updated",
            Self::PartnerUpdated { .. } => "goal:partner-updated",
            Self::Unlocked { .. } => "goal:unlocked",
        }
    }

    /// Whether a subscriber watching `goal_id` should receive this event.
    #[must_use]
    pub fn concerns(&self, goal_id: i64) -> bool {
        match self {
            Self::GoalUpdated { goal } => goal.id == goal_id,
            Self::PartnerUpdated { goal_id: id, .. } => *id == goal_id,
            Self::Unlocked {
                goal_id: a,
                partner_goal_id: b,
            } => *a == goal_id || *b == goal_id,
        }
    }
}

/// Broadcast bus fanning goal events out to every subscriber.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<GoalEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per lagging subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GoalEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event; having no subscribers is not an error.
    pub fn publish(&self, event: GoalEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::goal_model;

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let goal = goal_model(2, 2);

        bus.publish(GoalEvent::GoalUpdated { goal: goal.clone() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "goal:updated");
        assert!(event.concerns(goal.id));
        assert!(!event.concerns(goal.id + 1));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        bus.publish(GoalEvent::Unlocked {
            goal_id: 1,
            partner_goal_id: 2,
        });
    }

    #[test]
    fn test_unlock_concerns_both_goals() {
        let event = GoalEvent::Unlocked {
            goal_id: 1,
            partner_goal_id: 2,
        };
        assert!(event.concerns(1));
        assert!(event.concerns(2));
        assert!(!event.concerns(3));
    }
}
