//! Claim redemption - turning a claim code into a goal.
//!
//! A code is either a gift code or one side of a Valentine challenge. Lookup reports
//! which, without side effects. Redemption runs in one transaction and claims the code
//! with a conditional update, so two users racing for the same code cannot both win.

use crate::{
    core::{
        claim_code::normalize_code,
        goal::{NewGoal, create_goal, get_goal, save_goal},
    },
    entities::{
        Experience, ExperienceGift, ValentineChallenge,
        experience_gift::{self, GiftStatus},
        goal::{self, ApprovalStatus, GoalKind},
        valentine_challenge::{self, ChallengeMode, ChallengeStatus},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, Set, TransactionTrait, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

const DEFAULT_GIFT_TITLE: &str = "My experience goal";
const DEFAULT_VALENTINE_TITLE: &str = "Valentine's Challenge";

/// Which side of a Valentine challenge a code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeSide {
    /// The buyer's code
    Purchaser,
    /// The code handed to the partner
    Partner,
}

/// What a claim code refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaimLookup {
    /// An unclaimed gift
    Gift {
        /// Gift id
        gift_id: i64,
        /// Experience the gift unlocks
        experience_id: String,
        /// Giver who paid for the gift
        giver_id: String,
        /// Display name of the giver
        giver_name: Option<String>,
        /// Message from the giver
        personal_message: Option<String>,
        /// Last moment the code can be redeemed
        expires_at: DateTime<Utc>,
    },
    /// One unredeemed side of a Valentine challenge
    Valentine {
        /// Challenge id
        challenge_id: i64,
        /// Side the code belongs to
        side: ChallengeSide,
        /// Experience, hidden from the partner in secret mode
        experience_id: Option<String>,
        /// Weeks each partner must complete
        target_count: i32,
        /// Sessions per week
        sessions_per_week: i32,
        /// The other side has redeemed already
        other_side_joined: bool,
    },
    /// Unknown or expired code
    Invalid,
    /// The code was already redeemed
    AlreadyClaimed,
}

/// Goal settings chosen by the recipient while redeeming.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSetup {
    /// Display title; defaults to the experience title
    #[serde(default)]
    pub title: Option<String>,
    /// Weeks to complete; ignored for Valentine codes
    pub target_count: i32,
    /// Sessions per week; ignored for Valentine codes
    pub sessions_per_week: i32,
    /// Informational session length, hours
    #[serde(default)]
    pub target_hours: i32,
    /// Informational session length, minutes
    #[serde(default)]
    pub target_minutes: i32,
}

/// Outcome of a successful redemption.
#[derive(Debug, Clone, Serialize)]
pub struct Redemption {
    /// The goal created for the redeeming user
    pub goal: goal::Model,
    /// What was redeemed
    pub lookup: ClaimLookup,
    /// Partner goal, when the other side of a Valentine challenge already redeemed
    pub partner_goal: Option<goal::Model>,
}

/// Resolves a claim code without changing anything.
pub async fn lookup_claim_code<C>(db: &C, code: &str, now: DateTime<Utc>) -> Result<ClaimLookup>
where
    C: ConnectionTrait,
{
    let code = normalize_code(code);
    if code.is_empty() {
        return Ok(ClaimLookup::Invalid);
    }

    if let Some(gift) = ExperienceGift::find()
        .filter(experience_gift::Column::ClaimCode.eq(code.as_str()))
        .one(db)
        .await?
    {
        if gift.status == GiftStatus::Claimed {
            return Ok(ClaimLookup::AlreadyClaimed);
        }
        if gift.expires_at <= now {
            return Ok(ClaimLookup::Invalid);
        }
        return Ok(ClaimLookup::Gift {
            gift_id: gift.id,
            experience_id: gift.experience_id,
            giver_id: gift.giver_id,
            giver_name: gift.giver_name,
            personal_message: gift.personal_message,
            expires_at: gift.expires_at,
        });
    }

    let Some(challenge) = ValentineChallenge::find()
        .filter(
            valentine_challenge::Column::PurchaserCode
                .eq(code.as_str())
                .or(valentine_challenge::Column::PartnerCode.eq(code.as_str())),
        )
        .one(db)
        .await?
    else {
        return Ok(ClaimLookup::Invalid);
    };

    let side = if challenge.purchaser_code == code {
        ChallengeSide::Purchaser
    } else {
        ChallengeSide::Partner
    };
    let (redeemed, other_side_joined) = match side {
        ChallengeSide::Purchaser => (
            challenge.purchaser_code_redeemed,
            challenge.partner_code_redeemed,
        ),
        ChallengeSide::Partner => (
            challenge.partner_code_redeemed,
            challenge.purchaser_code_redeemed,
        ),
    };
    if redeemed {
        return Ok(ClaimLookup::AlreadyClaimed);
    }

    let hide_experience = side == ChallengeSide::Partner && challenge.mode == ChallengeMode::Secret;
    Ok(ClaimLookup::Valentine {
        challenge_id: challenge.id,
        side,
        experience_id: (!hide_experience).then_some(challenge.experience_id),
        target_count: challenge.target_count,
        sessions_per_week: challenge.sessions_per_week,
        other_side_joined,
    })
}

async fn experience_title<C>(db: &C, experience_id: &str) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    Ok(Experience::find_by_id(experience_id.to_string())
        .one(db)
        .await?
        .map(|e| e.title))
}

async fn redeem_gift<C>(
    db: &C,
    user_id: &str,
    gift_id: i64,
    setup: GoalSetup,
    now: DateTime<Utc>,
) -> Result<goal::Model>
where
    C: ConnectionTrait,
{
    let claimed = ExperienceGift::update_many()
        .col_expr(experience_gift::Column::Status, Expr::value(GiftStatus::Claimed))
        .col_expr(experience_gift::Column::ClaimedBy, Expr::value(user_id))
        .col_expr(experience_gift::Column::ClaimedAt, Expr::value(now))
        .filter(experience_gift::Column::Id.eq(gift_id))
        .filter(experience_gift::Column::Status.eq(GiftStatus::Pending))
        .exec(db)
        .await?;
    if claimed.rows_affected == 0 {
        return Err(Error::CodeAlreadyRedeemed);
    }

    let gift = ExperienceGift::find_by_id(gift_id)
        .one(db)
        .await?
        .ok_or(Error::InvalidClaimCode)?;

    let (kind, approval_status) = if gift.giver_id == user_id {
        (GoalKind::SelfGoal, ApprovalStatus::NotRequired)
    } else {
        (
            GoalKind::EmpoweredGoal {
                giver_id: gift.giver_id.clone(),
            },
            ApprovalStatus::Pending,
        )
    };

    let title = match setup.title.filter(|t| !t.trim().is_empty()) {
        Some(title) => title,
        None => experience_title(db, &gift.experience_id)
            .await?
            .unwrap_or_else(|| DEFAULT_GIFT_TITLE.to_string()),
    };

    create_goal(
        db,
        NewGoal {
            user_id: user_id.to_string(),
            kind,
            experience_id: Some(gift.experience_id),
            experience_gift_id: Some(gift.id),
            title,
            target_count: setup.target_count,
            sessions_per_week: setup.sessions_per_week,
            target_hours: setup.target_hours,
            target_minutes: setup.target_minutes,
            approval_status,
        },
        now,
    )
    .await
}

async fn redeem_challenge_side<C>(
    db: &C,
    user_id: &str,
    challenge_id: i64,
    side: ChallengeSide,
    setup: GoalSetup,
    now: DateTime<Utc>,
) -> Result<(goal::Model, Option<goal::Model>)>
where
    C: ConnectionTrait,
{
    let (redeemed_col, user_col) = match side {
        ChallengeSide::Purchaser => (
            valentine_challenge::Column::PurchaserCodeRedeemed,
            valentine_challenge::Column::PurchaserUserId,
        ),
        ChallengeSide::Partner => (
            valentine_challenge::Column::PartnerCodeRedeemed,
            valentine_challenge::Column::PartnerUserId,
        ),
    };
    let claimed = ValentineChallenge::update_many()
        .col_expr(redeemed_col, Expr::value(true))
        .col_expr(user_col, Expr::value(user_id))
        .filter(valentine_challenge::Column::Id.eq(challenge_id))
        .filter(redeemed_col.eq(false))
        .exec(db)
        .await?;
    if claimed.rows_affected == 0 {
        return Err(Error::CodeAlreadyRedeemed);
    }

    // Read the other side only after holding the claim, so a partner that
    // committed in the meantime is seen and linked.
    let challenge = ValentineChallenge::find_by_id(challenge_id)
        .one(db)
        .await?
        .ok_or(Error::ChallengeNotFound { id: challenge_id })?;

    let (other_user, other_goal_id) = match side {
        ChallengeSide::Purchaser => (&challenge.partner_user_id, challenge.partner_goal_id),
        ChallengeSide::Partner => (&challenge.purchaser_user_id, challenge.purchaser_goal_id),
    };
    if other_user.as_deref() == Some(user_id) {
        return Err(Error::DuplicatePartnerRedemption);
    }

    let title = setup
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_VALENTINE_TITLE.to_string());

    let goal = create_goal(
        db,
        NewGoal {
            user_id: user_id.to_string(),
            kind: GoalKind::PairedGoal {
                challenge_id,
                partner_goal_id: other_goal_id,
            },
            experience_id: Some(challenge.experience_id.clone()),
            experience_gift_id: None,
            title,
            target_count: challenge.target_count,
            sessions_per_week: challenge.sessions_per_week,
            target_hours: setup.target_hours,
            target_minutes: setup.target_minutes,
            approval_status: ApprovalStatus::NotRequired,
        },
        now,
    )
    .await?;

    let partner_goal = match other_goal_id {
        Some(partner_id) => {
            let mut partner = get_goal(db, partner_id).await?;
            partner.partner_goal_id = Some(goal.id);
            Some(save_goal(db, partner).await?)
        }
        None => None,
    };

    let mut active = challenge.into_active_model();
    match side {
        ChallengeSide::Purchaser => active.purchaser_goal_id = Set(Some(goal.id)),
        ChallengeSide::Partner => active.partner_goal_id = Set(Some(goal.id)),
    }
    active.status = Set(if partner_goal.is_some() {
        ChallengeStatus::Active
    } else {
        ChallengeStatus::AwaitingPartner
    });
    active.update(db).await?;

    Ok((goal, partner_goal))
}

/// Redeems a claim code for `user_id` and creates the matching goal.
///
/// Gifts from someone else create an empowered goal waiting for the giver's approval;
/// self-purchased gifts need no approval. Valentine codes create a paired goal with the
/// challenge's cadence and link it to the partner's goal when that already exists.
#[instrument(skip(db, setup))]
pub async fn redeem_claim_code(
    db: &DatabaseConnection,
    user_id: &str,
    code: &str,
    setup: GoalSetup,
    now: DateTime<Utc>,
) -> Result<Redemption> {
    let txn = db.begin().await?;

    let lookup = lookup_claim_code(&txn, code, now).await?;
    let (goal, partner_goal) = match &lookup {
        ClaimLookup::Invalid => return Err(Error::InvalidClaimCode),
        ClaimLookup::AlreadyClaimed => return Err(Error::CodeAlreadyRedeemed),
        ClaimLookup::Gift { gift_id, .. } => {
            (redeem_gift(&txn, user_id, *gift_id, setup, now).await?, None)
        }
        ClaimLookup::Valentine {
            challenge_id, side, ..
        } => redeem_challenge_side(&txn, user_id, *challenge_id, *side, setup, now).await?,
    };

    txn.commit().await?;

    info!(goal_id = goal.id, "Claim code redeemed");
    Ok(Redemption {
        goal,
        lookup,
        partner_goal,
    })
}
