//! HTTP API types for laureld ↔ laurelctl

use crate::leaderboard::{LeaderboardEntry, Scope};
use crate::points::{PointsSnapshot, Tier};
use crate::referral::LadderReward;
use crate::types::{AchievementId, AchievementState, Category, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub achievements: usize,
}

/// Error body returned for every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable class: not_found, transient, rejected, internal
    pub kind: String,
    pub error: String,
}

// ============================================================================
// Achievements
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AchievementsQuery {
    #[serde(default)]
    pub category: Option<Category>,
}

/// One achievement as shown to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementView {
    pub id: AchievementId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: Category,
    pub progress_value: u64,
    pub target: u64,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub state: AchievementState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementsResponse {
    pub user_id: UserId,
    pub category: Option<Category>,
    pub achievements: Vec<AchievementView>,
}

/// Unlocked count and collector badge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementSummary {
    pub user_id: UserId,
    pub unlocked: usize,
    pub total: usize,
    pub badge: Tier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResponse {
    pub user_id: UserId,
    pub newly_unlocked: Vec<AchievementId>,
}

// ============================================================================
// Points & leaderboard
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsResponse {
    pub user_id: UserId,
    #[serde(flatten)]
    pub snapshot: PointsSnapshot,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    pub scope: Scope,
    pub entries: Vec<LeaderboardEntry>,
}

// ============================================================================
// Referrals
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralStatusResponse {
    pub user_id: UserId,
    pub level: u8,
    pub completed_referrals: u64,
    pub total_referrals: u64,
    pub total_earnings_cents: u64,
    /// None once the top level is reached
    pub next_level_requirement: Option<u64>,
    pub reward: Option<LadderReward>,
    /// None until the user has requested a code
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralCodeResponse {
    pub user_id: UserId,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
    pub referred_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub referred_id: UserId,
    /// Reward credited to the referrer, minor units
    #[serde(default)]
    pub reward_cents: u64,
}
