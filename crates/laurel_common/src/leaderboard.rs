//! Leaderboard Builder v0.3.0
//!
//! Ranks candidate users by points. Counts are fetched for the whole candidate
//! set up front (see [`crate::facts::FactStore::batch_activity`]), points are
//! computed once per user, and the ranking is sorted exactly once. Any
//! top-N view is a prefix slice of that one ranking.
//!
//! Order: points desc, account creation asc (unknown creation last), user id asc.
//! No two users compare equal, so ranks are contiguous 1..N.

use crate::facts::{ActivityQuery, OrderSide};
use crate::points::{PointsWeights, Tier};
use crate::types::{ActivityCounts, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Which activity window and side a leaderboard ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    #[default]
    AllTime,
    /// Last 30 days
    Monthly,
    /// Last 7 days
    Weekly,
    /// Delivered purchases only
    TopBuyers,
    /// Delivered sales only
    TopSellers,
}

impl Scope {
    pub const ALL: [Scope; 5] = [
        Scope::AllTime,
        Scope::Monthly,
        Scope::Weekly,
        Scope::TopBuyers,
        Scope::TopSellers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::AllTime => "all-time",
            Scope::Monthly => "monthly",
            Scope::Weekly => "weekly",
            Scope::TopBuyers => "top-buyers",
            Scope::TopSellers => "top-sellers",
        }
    }

    /// Activity query for this scope evaluated at `now`
    pub fn query(&self, now: DateTime<Utc>) -> ActivityQuery {
        match self {
            Scope::AllTime => ActivityQuery::default(),
            Scope::Monthly => ActivityQuery {
                since: Some(now - Duration::days(30)),
                ..ActivityQuery::default()
            },
            Scope::Weekly => ActivityQuery {
                since: Some(now - Duration::days(7)),
                ..ActivityQuery::default()
            },
            Scope::TopBuyers => ActivityQuery {
                since: None,
                side: OrderSide::Buyer,
                include_reviews: false,
                include_referrals: false,
            },
            Scope::TopSellers => ActivityQuery {
                since: None,
                side: OrderSide::Seller,
                include_reviews: false,
                include_referrals: false,
            },
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Scope::ALL
            .iter()
            .copied()
            .find(|scope| scope.as_str() == normalized)
            .ok_or_else(|| format!("unknown leaderboard scope '{}'", s))
    }
}

/// Raw input for one ranked user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub user_id: UserId,
    pub counts: ActivityCounts,
    pub created_at: Option<DateTime<Utc>>,
}

/// One ranked row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: UserId,
    pub points: u64,
    pub tier: Tier,
}

/// A complete ranking for one scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub scope: Scope,
    pub entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    /// First `limit` entries of the ranking
    pub fn top(&self, limit: usize) -> &[LeaderboardEntry] {
        &self.entries[..limit.min(self.entries.len())]
    }

    pub fn into_top(mut self, limit: usize) -> Self {
        self.entries.truncate(limit);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sorts candidates into a [`Leaderboard`]
pub struct LeaderboardBuilder<'a> {
    weights: &'a PointsWeights,
}

struct Scored {
    candidate: Candidate,
    points: u64,
}

fn ranking_order(a: &Scored, b: &Scored) -> Ordering {
    b.points
        .cmp(&a.points)
        .then_with(|| match (a.candidate.created_at, b.candidate.created_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.candidate.user_id.cmp(&b.candidate.user_id))
}

impl<'a> LeaderboardBuilder<'a> {
    pub fn new(weights: &'a PointsWeights) -> Self {
        Self { weights }
    }

    pub fn build(&self, scope: Scope, candidates: Vec<Candidate>) -> Leaderboard {
        let mut scored: Vec<Scored> = candidates
            .into_iter()
            .map(|candidate| Scored {
                points: self.weights.points(&candidate.counts),
                candidate,
            })
            .collect();

        scored.sort_by(ranking_order);

        let entries = scored
            .into_iter()
            .enumerate()
            .map(|(i, s)| LeaderboardEntry {
                rank: (i + 1) as u32,
                user_id: s.candidate.user_id,
                points: s.points,
                tier: Tier::from_points(s.points),
            })
            .collect();

        Leaderboard { scope, entries }
    }
}
