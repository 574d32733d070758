//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod experience;
pub mod experience_gift;
pub mod goal;
pub mod goal_hint;
pub mod hint_cache;
pub mod notification;
pub mod processed_payment;
pub mod valentine_challenge;

// Re-export specific types to avoid conflicts
pub use experience::{Entity as Experience, Model as ExperienceModel};
pub use experience_gift::{Entity as ExperienceGift, Model as ExperienceGiftModel};
pub use goal::{Column as GoalColumn, Entity as Goal, Model as GoalModel};
pub use goal_hint::{Entity as GoalHint, Model as GoalHintModel};
pub use hint_cache::{Entity as HintCacheEntry, Model as HintCacheEntryModel};
pub use notification::{Entity as Notification, Model as NotificationModel};
pub use processed_payment::{Entity as ProcessedPayment, Model as ProcessedPaymentModel};
pub use valentine_challenge::{Entity as ValentineChallenge, Model as ValentineChallengeModel};
