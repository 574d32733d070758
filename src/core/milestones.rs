//! Partner milestone messages for Valentine goals.
//!
//! After a paired session commits, the partner gets at most one notification describing
//! the most significant thing that just happened. The tone is chosen from the goal's
//! state after the update and the partner's state read in the same transaction.

use crate::entities::goal;

/// The kind of progress a partner is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneTone {
    /// First session of a new week
    FirstSessionOfWeek,
    /// Crossed half of the weekly sessions
    Halfway,
    /// One session left this week
    OneSessionLeft,
    /// Week completed while the partner is behind
    WeekCompletedPartnerBehind,
    /// Week completed and the partner already finished the whole goal
    WeekCompletedPartnerFinished,
    /// Both partners completed this week
    BothCompletedSameWeek,
}

impl MilestoneTone {
    /// Notification kind stored with the message.
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::FirstSessionOfWeek => "partner_first_session",
            Self::Halfway => "partner_halfway",
            Self::OneSessionLeft => "partner_one_left",
            Self::WeekCompletedPartnerBehind => "partner_week_done_ahead",
            Self::WeekCompletedPartnerFinished => "partner_week_done_you_finished",
            Self::BothCompletedSameWeek => "partner_week_done_together",
        }
    }

    /// Short title.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::FirstSessionOfWeek => "Your partner kicked off the week",
            Self::Halfway => "Your partner is halfway there",
            Self::OneSessionLeft => "Your partner is almost done this week",
            Self::WeekCompletedPartnerBehind => "Your partner finished their week",
            Self::WeekCompletedPartnerFinished => "Your partner is catching up",
            Self::BothCompletedSameWeek => "You both crushed this week",
        }
    }

    /// Message body.
    #[must_use]
    pub const fn body(self) -> &'static str {
        match self {
            Self::FirstSessionOfWeek => "They logged their first session this week. Your turn!",
            Self::Halfway => "They are halfway through this week's sessions.",
            Self::OneSessionLeft => "Just one more session and their week is done.",
            Self::WeekCompletedPartnerBehind => {
                "They completed this week. Log a session to keep up!"
            }
            Self::WeekCompletedPartnerFinished => {
                "They completed another week. Your reward unlocks when they finish."
            }
            Self::BothCompletedSameWeek => "You are both on track. Keep it going together!",
        }
    }
}

/// Picks the milestone to report to the partner, if any.
///
/// `goal` is the state after the session update; `week_completed` tells whether this
/// session met the weekly target (the counter has already reset to zero then).
#[must_use]
pub fn partner_milestone(
    goal: &goal::Model,
    week_completed: bool,
    partner: &goal::Model,
) -> Option<MilestoneTone> {
    if week_completed {
        if partner.is_finished {
            return Some(MilestoneTone::WeekCompletedPartnerFinished);
        }
        if partner.current_count >= goal.current_count {
            return Some(MilestoneTone::BothCompletedSameWeek);
        }
        return Some(MilestoneTone::WeekCompletedPartnerBehind);
    }

    let done = goal.weekly_count;
    let per_week = goal.sessions_per_week;

    if done == 1 {
        return Some(MilestoneTone::FirstSessionOfWeek);
    }
    if per_week - done == 1 {
        return Some(MilestoneTone::OneSessionLeft);
    }
    let crossed_half = done * 2 >= per_week && (done - 1) * 2 < per_week;
    crossed_half.then_some(MilestoneTone::Halfway)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::goal_model;

    #[test]
    fn test_first_session_has_priority() {
        let partner = goal_model(4, 2);
        let mut goal = goal_model(4, 2);
        goal.weekly_count = 1;

        // 1 of 2 is first, halfway and one-left at once.
        assert_eq!(
            partner_milestone(&goal, false, &partner),
            Some(MilestoneTone::FirstSessionOfWeek)
        );
    }

    #[test]
    fn test_one_left_before_halfway() {
        let partner = goal_model(4, 4);
        let mut goal = goal_model(4, 4);
        goal.weekly_count = 3;

        assert_eq!(
            partner_milestone(&goal, false, &partner),
            Some(MilestoneTone::OneSessionLeft)
        );
    }

    #[test]
    fn test_halfway_only_when_crossed() {
        let partner = goal_model(4, 6);
        let mut goal = goal_model(4, 6);

        goal.weekly_count = 3;
        assert_eq!(
            partner_milestone(&goal, false, &partner),
            Some(MilestoneTone::Halfway)
        );

        goal.weekly_count = 4;
        assert_eq!(partner_milestone(&goal, false, &partner), None);
    }

    #[test]
    fn test_week_completion_tones() {
        let mut goal = goal_model(4, 2);
        goal.current_count = 2;
        let mut partner = goal_model(4, 2);

        partner.current_count = 1;
        assert_eq!(
            partner_milestone(&goal, true, &partner),
            Some(MilestoneTone::WeekCompletedPartnerBehind)
        );

        partner.current_count = 2;
        assert_eq!(
            partner_milestone(&goal, true, &partner),
            Some(MilestoneTone::BothCompletedSameWeek)
        );

        partner.current_count = 4;
        partner.is_finished = true;
        assert_eq!(
            partner_milestone(&goal, true, &partner),
            Some(MilestoneTone::WeekCompletedPartnerFinished)
        );
    }
}
