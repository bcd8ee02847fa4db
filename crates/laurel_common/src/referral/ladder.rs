//! Referral Ladder
//!
//! Level is the highest rung whose requirement the completed-referral count
//! meets, 0 below the first rung and capped at the top one.

use serde::{Deserialize, Serialize};

/// (level, required completed referrals, perk, bonus in minor units)
pub const LADDER: &[(u8, u64, &str, u64)] = &[
    (1, 1, "5% discount", 0),
    (2, 3, "10% discount", 500),
    (3, 5, "15% discount", 1_500),
    (4, 10, "VIP status", 5_000),
];

/// What a level grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderReward {
    pub perk: String,
    pub bonus_cents: u64,
}

/// Ladder position for a completed-referral count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderStanding {
    pub level: u8,
    pub completed: u64,
    /// Reward of the current level; None at level 0
    pub reward: Option<LadderReward>,
    /// Completed referrals required for the next level; None at the top
    pub next_level_requirement: Option<u64>,
}

impl LadderStanding {
    pub fn evaluate(completed: u64) -> Self {
        let current = LADDER
            .iter()
            .rev()
            .find(|&&(_, required, _, _)| completed >= required);
        let next = LADDER
            .iter()
            .find(|&&(_, required, _, _)| completed < required);

        Self {
            level: current.map_or(0, |&(level, _, _, _)| level),
            completed,
            reward: current.map(|&(_, _, perk, bonus_cents)| LadderReward {
                perk: perk.to_string(),
                bonus_cents,
            }),
            next_level_requirement: next.map(|&(_, required, _, _)| required),
        }
    }

    pub fn is_max(&self) -> bool {
        self.next_level_requirement.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        let cases = [(0, 0), (1, 1), (2, 1), (3, 2), (4, 2), (5, 3), (9, 3), (10, 4), (50, 4)];
        for (completed, level) in cases {
            assert_eq!(
                LadderStanding::evaluate(completed).level,
                level,
                "completed={}",
                completed
            );
        }
    }

    #[test]
    fn test_next_requirement() {
        assert_eq!(LadderStanding::evaluate(0).next_level_requirement, Some(1));
        assert_eq!(LadderStanding::evaluate(4).next_level_requirement, Some(5));
        assert_eq!(LadderStanding::evaluate(10).next_level_requirement, None);
        assert!(LadderStanding::evaluate(50).is_max());
    }

    #[test]
    fn test_rewards() {
        assert!(LadderStanding::evaluate(0).reward.is_none());
        let second = LadderStanding::evaluate(4).reward.unwrap();
        assert_eq!(second.perk, "10% discount");
        assert_eq!(second.bonus_cents, 500);
        assert_eq!(LadderStanding::evaluate(10).reward.unwrap().perk, "VIP status");
    }

    #[test]
    fn test_ladder_strictly_increasing() {
        for pair in LADDER.windows(2) {
            assert!(pair[0].0 < pair[1].0);
            assert!(pair[0].1 < pair[1].1);
        }
    }
}
