//! Core business logic, independent of the HTTP surface.
//!
//! Transactional building blocks (`goal`, `progression`, `pairing`, `redemption`,
//! `approval`, `payment`) take a database connection and return typed results.
//! [`engine::GoalEngine`] composes them with the side channels.

pub mod approval;
pub mod claim_code;
pub mod engine;
pub mod events;
pub mod gating;
pub mod goal;
pub mod hints;
pub mod milestones;
pub mod notify;
pub mod pairing;
pub mod payment;
pub mod progression;
pub mod redemption;
pub mod timer;
