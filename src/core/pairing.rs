//! Valentine pairing - joint completion and the shared unlock.
//!
//! Each partner progresses an independent goal. Completing one side marks it finished;
//! the reward unlocks for both only once both sides are finished. The check runs inside
//! the finishing transaction, and [`reconcile_pair`] re-runs it idempotently after
//! commit so two partners finishing at the same moment cannot both miss the other's
//! completion.

use crate::{
    core::goal::{get_goal, save_goal},
    entities::{ValentineChallenge, goal, valentine_challenge::ChallengeStatus},
    errors::Result,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set,
    TransactionTrait,
};
use tracing::{debug, info};

/// Partner state observed while settling a paired session.
#[derive(Debug, Clone, Default)]
pub struct PairSettlement {
    /// Partner goal as read (and possibly unlocked) in the transaction
    pub partner: Option<goal::Model>,
    /// This transaction unlocked the pair
    pub unlocked_now: bool,
}

async fn mark_challenge_completed<C>(db: &C, challenge_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    if let Some(challenge) = ValentineChallenge::find_by_id(challenge_id).one(db).await? {
        if challenge.status != ChallengeStatus::Completed {
            let mut active = challenge.into_active_model();
            active.status = Set(ChallengeStatus::Completed);
            active.update(db).await?;
        }
    }
    Ok(())
}

/// Unlocks both goals. The caller saves `goal`; `partner` is saved here.
async fn unlock_pair<C>(
    db: &C,
    goal: &mut goal::Model,
    partner: goal::Model,
    now: DateTime<Utc>,
) -> Result<goal::Model>
where
    C: ConnectionTrait,
{
    goal.is_unlocked = true;
    goal.unlocked_at = Some(now);

    let mut partner = partner;
    partner.is_unlocked = true;
    partner.unlocked_at = Some(now);
    let partner = save_goal(db, partner).await?;

    if let Some(challenge_id) = goal.valentine_challenge_id {
        mark_challenge_completed(db, challenge_id).await?;
    }

    info!(goal_id = goal.id, partner_goal_id = partner.id, "Valentine pair unlocked");
    Ok(partner)
}

/// Settles a paired goal after a session was applied, inside the caller's transaction.
///
/// Marks the goal finished when it just completed and unlocks both sides when the
/// partner is finished too. `goal` is left for the caller to save.
pub async fn settle_completion<C>(
    db: &C,
    goal: &mut goal::Model,
    now: DateTime<Utc>,
) -> Result<PairSettlement>
where
    C: ConnectionTrait,
{
    if goal.is_completed && !goal.is_finished {
        goal.is_finished = true;
    }

    let Some(partner_id) = goal.partner_goal_id else {
        debug!(goal_id = goal.id, "Paired goal has no partner yet");
        return Ok(PairSettlement::default());
    };
    let partner = get_goal(db, partner_id).await?;

    if goal.is_finished && partner.is_finished && !goal.is_unlocked {
        let partner = unlock_pair(db, goal, partner, now).await?;
        return Ok(PairSettlement {
            partner: Some(partner),
            unlocked_now: true,
        });
    }

    Ok(PairSettlement {
        partner: Some(partner),
        unlocked_now: false,
    })
}

/// Re-checks a pair after commit and unlocks it if both sides are finished.
///
/// Safe to call any number of times: a pair that is already unlocked, or whose partner
/// is still working, is left untouched. Returns both goals when this call unlocked them.
pub async fn reconcile_pair(
    db: &DatabaseConnection,
    goal_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<(goal::Model, goal::Model)>> {
    let txn = db.begin().await?;

    let mut goal = get_goal(&txn, goal_id).await?;
    let Some(partner_id) = goal.partner_goal_id else {
        return Ok(None);
    };
    let partner = get_goal(&txn, partner_id).await?;

    let both_finished = goal.is_finished && partner.is_finished;
    if !both_finished || (goal.is_unlocked && partner.is_unlocked) {
        return Ok(None);
    }

    let partner = unlock_pair(&txn, &mut goal, partner, now).await?;
    let goal = save_goal(&txn, goal).await?;
    txn.commit().await?;

    info!(goal_id, "Reconciled pair unlock after commit");
    Ok(Some((goal, partner)))
}
