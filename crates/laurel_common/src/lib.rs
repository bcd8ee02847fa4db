//! Laurel Common - Progress & rewards engine v0.4.0
//!
//! Turns marketplace facts (delivered orders, reviews, referral edges) into
//! achievement progress, one-time unlocks, points, tiers, leaderboards and
//! referral-ladder standing. Shared by laureld (HTTP daemon) and laurelctl.
//!
//! v0.4.0: Referral ledger, leaderboard scopes, collector badge.

pub mod api;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod facts;
pub mod leaderboard;
pub mod points;
pub mod progress;
pub mod referral;
pub mod types;
pub mod unlock;

pub use catalog::Catalog;
pub use config::LaurelConfig;
pub use engine::RewardsEngine;
pub use error::{Result, RewardsError};
pub use facts::{FactStore, SqliteFactStore};
pub use leaderboard::{Leaderboard, LeaderboardEntry, Scope};
pub use points::{PointsSnapshot, PointsWeights, Tier};
pub use types::*;
pub use unlock::{
    MemoryUnlockRegistry, ProgressUpdate, SqliteUnlockRegistry, UnlockRegistry, UpsertOutcome,
};
