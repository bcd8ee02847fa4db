//! Points & Tier Calculator
//!
//! Points are a weighted sum of raw activity:
//!
//! ```text
//! points = delivered_order * deliveredOrders
//!        + review_given    * reviewsGiven
//!        + completed_referral * completedReferrals
//! ```
//!
//! Weights come from `[points]` in the config file (defaults 10 / 5 / 20).
//! Tiers are a step function over points with inclusive lower bounds.
//!
//! v0.2.0: Collector badge tiers keyed on unlocked-achievement count.

use crate::types::ActivityCounts;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tier thresholds on points, highest first: (min_points, tier)
pub const TIER_BANDS: &[(u64, Tier)] = &[
    (100_000, Tier::Diamond),
    (50_000, Tier::Platinum),
    (20_000, Tier::Gold),
    (5_000, Tier::Silver),
    (0, Tier::Bronze),
];

/// Collector badge thresholds on unlocked achievements, highest first
pub const BADGE_BANDS: &[(usize, Tier)] = &[
    (20, Tier::Diamond),
    (15, Tier::Platinum),
    (10, Tier::Gold),
    (5, Tier::Silver),
    (0, Tier::Bronze),
];

/// Coarse classification derived from points
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl Tier {
    /// Total over u64: the last band starts at zero
    pub fn from_points(points: u64) -> Self {
        for &(min, tier) in TIER_BANDS {
            if points >= min {
                return tier;
            }
        }
        Tier::Bronze
    }

    /// Badge shown on the achievements page
    pub fn from_unlocked_count(unlocked: usize) -> Self {
        for &(min, tier) in BADGE_BANDS {
            if unlocked >= min {
                return tier;
            }
        }
        Tier::Bronze
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Platinum => "platinum",
            Tier::Diamond => "diamond",
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Bronze
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-activity point weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsWeights {
    #[serde(default = "default_order_weight")]
    pub delivered_order: u64,

    #[serde(default = "default_review_weight")]
    pub review_given: u64,

    #[serde(default = "default_referral_weight")]
    pub completed_referral: u64,
}

fn default_order_weight() -> u64 {
    10
}

fn default_review_weight() -> u64 {
    5
}

fn default_referral_weight() -> u64 {
    20
}

impl Default for PointsWeights {
    fn default() -> Self {
        Self {
            delivered_order: default_order_weight(),
            review_given: default_review_weight(),
            completed_referral: default_referral_weight(),
        }
    }
}

impl PointsWeights {
    /// Weighted sum, saturating instead of wrapping on absurd inputs
    pub fn points(&self, counts: &ActivityCounts) -> u64 {
        counts
            .delivered_orders
            .saturating_mul(self.delivered_order)
            .saturating_add(counts.reviews_given.saturating_mul(self.review_given))
            .saturating_add(
                counts
                    .completed_referrals
                    .saturating_mul(self.completed_referral),
            )
    }
}

/// Derived points view for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsSnapshot {
    pub counts: ActivityCounts,
    pub points: u64,
    pub tier: Tier,
}

impl PointsSnapshot {
    pub fn compute(counts: ActivityCounts, weights: &PointsWeights) -> Self {
        let points = weights.points(&counts);
        Self {
            counts,
            points,
            tier: Tier::from_points(points),
        }
    }
}
