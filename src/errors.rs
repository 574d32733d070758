//! Unified error types and result handling.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants are grouped the
//! way callers need to react to them: validation and authorization failures are rejected
//! before any side effect, state conflicts carry a precise reason for the client, and
//! infrastructure failures wrap the underlying library error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why a session start/finish/cancel request was refused.
///
/// Each reason is distinguishable from a generic failure so that the client can render
/// an actionable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum SessionRejection {
    /// A session is already running for this goal
    AlreadyRunning,
    /// No session is running for this goal
    NotRunning,
    /// The timer did not run long enough to count as a session
    TooShort {
        /// Seconds the session actually ran
        elapsed_seconds: i64,
        /// Minimum seconds required
        minimum_seconds: i64,
    },
    /// The previous session was logged too recently
    TooFast {
        /// Seconds since the previous logged session
        seconds_since_last: i64,
        /// Minimum interval in seconds
        minimum_seconds: i64,
    },
    /// The giver has not approved the goal yet
    NotApproved,
    /// A session was already logged on this calendar day
    AlreadyLoggedToday,
    /// The weekly target is met; the next window has not opened yet
    WaitingForNextWeek {
        /// When the next weekly window opens
        opens_at: DateTime<Utc>,
    },
    /// The goal is already completed
    GoalCompleted,
}

impl SessionRejection {
    /// Stable machine-readable code for the rejection.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "already_running",
            Self::NotRunning => "not_running",
            Self::TooShort { .. } => "too_short",
            Self::TooFast { .. } => "too_fast",
            Self::NotApproved => "not_approved",
            Self::AlreadyLoggedToday => "already_logged_today",
            Self::WaitingForNextWeek { .. } => "waiting_for_next_week",
            Self::GoalCompleted => "goal_completed",
        }
    }
}

impl fmt::Display for SessionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "a session is already running"),
            Self::NotRunning => write!(f, "no session is running"),
            Self::TooShort {
                elapsed_seconds,
                minimum_seconds,
            } => write!(
                f,
                "session ran for {elapsed_seconds}s, at least {minimum_seconds}s required"
            ),
            Self::TooFast {
                seconds_since_last,
                minimum_seconds,
            } => write!(
                f,
                "previous session was logged {seconds_since_last}s ago, wait at least {minimum_seconds}s"
            ),
            Self::NotApproved => write!(f, "goal is waiting for approval"),
            Self::AlreadyLoggedToday => write!(f, "a session was already logged today"),
            Self::WaitingForNextWeek { opens_at } => {
                write!(f, "weekly target reached, next week opens at {opens_at}")
            }
            Self::GoalCompleted => write!(f, "goal is already completed"),
        }
    }
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file or environment problem
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// Database layer failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or malformed environment variable
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    /// JSON encoding or decoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound HTTP call failure
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing or malformed input, rejected before any side effect
    #[error("Validation failed: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// Caller is not allowed to perform the operation
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Why the caller was refused
        message: String,
    },

    /// Request carries no caller identity
    #[error("Caller identity is missing")]
    Unauthenticated,

    /// Goal does not exist
    #[error("Goal not found: {id}")]
    GoalNotFound {
        /// Requested goal id
        id: i64,
    },

    /// Experience does not exist in the catalog
    #[error("Experience not found: {id}")]
    ExperienceNotFound {
        /// Requested experience id
        id: String,
    },

    /// Valentine challenge does not exist
    #[error("Challenge not found: {id}")]
    ChallengeNotFound {
        /// Requested challenge id
        id: i64,
    },

    /// Session operation refused because of the goal's current state
    #[error("Session rejected: {reason}")]
    Session {
        /// Specific reason for the refusal
        reason: SessionRejection,
    },

    /// Claim code is unknown or expired
    #[error("Claim code is invalid or expired")]
    InvalidClaimCode,

    /// Claim code was already redeemed
    #[error("Claim code has already been redeemed")]
    CodeAlreadyRedeemed,

    /// The same user tried to redeem both codes of one challenge
    #[error("Both codes of a challenge cannot be redeemed by the same user")]
    DuplicatePartnerRedemption,

    /// No unique code could be produced within the attempt budget
    #[error("Could not generate a unique code after {attempts} attempts")]
    CodeGenerationExhausted {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Webhook signature header missing or not matching the payload
    #[error("Webhook signature verification failed: {message}")]
    InvalidSignature {
        /// Why verification failed
        message: String,
    },
}

impl From<SessionRejection> for Error {
    fn from(reason: SessionRejection) -> Self {
        Self::Session { reason }
    }
}

impl Error {
    /// Shorthand for a [`Error::Validation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::Forbidden`] error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
