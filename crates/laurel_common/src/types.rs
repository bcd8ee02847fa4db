//! Shared domain types for the rewards engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type UserId = String;
pub type AchievementId = String;

// ============================================================================
// Achievement catalog types
// ============================================================================

/// Which side of the marketplace an achievement belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Buyer,
    Seller,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Buyer => "buyer",
            Category::Seller => "seller",
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Seller
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buyer" => Ok(Category::Buyer),
            "seller" => Ok(Category::Seller),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// A validated catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    pub id: AchievementId,
    /// Aggregator key, e.g. `first_sale`
    #[serde(rename = "type")]
    pub kind: String,
    pub category: Category,
    pub target: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

// ============================================================================
// Progress types
// ============================================================================

/// Durable per-user progress row owned by the unlock registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementProgress {
    pub user_id: UserId,
    pub achievement_id: AchievementId,
    pub progress_value: u64,
    pub target: u64,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl AchievementProgress {
    pub fn state(&self) -> AchievementState {
        AchievementState::of(self.progress_value, self.unlocked)
    }
}

/// Achievement lifecycle. Unlocked is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementState {
    NotStarted,
    InProgress,
    Unlocked,
}

impl AchievementState {
    /// A crossed target stays InProgress until the registry records the unlock.
    pub fn of(progress: u64, unlocked: bool) -> Self {
        if unlocked {
            AchievementState::Unlocked
        } else if progress == 0 {
            AchievementState::NotStarted
        } else {
            AchievementState::InProgress
        }
    }
}

// ============================================================================
// Activity types
// ============================================================================

/// Raw activity counts that points are derived from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounts {
    pub delivered_orders: u64,
    pub reviews_given: u64,
    pub completed_referrals: u64,
}

impl ActivityCounts {
    pub fn new(delivered_orders: u64, reviews_given: u64, completed_referrals: u64) -> Self {
        Self {
            delivered_orders,
            reviews_given,
            completed_referrals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse() {
        assert_eq!("buyer".parse::<Category>().unwrap(), Category::Buyer);
        assert_eq!(" Seller ".parse::<Category>().unwrap(), Category::Seller);
        assert!("admin".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serde_lowercase() {
        let json = serde_json::to_string(&Category::Buyer).unwrap();
        assert_eq!(json, "\"buyer\"");
    }

    #[test]
    fn test_achievement_states() {
        assert_eq!(AchievementState::of(0, false), AchievementState::NotStarted);
        assert_eq!(AchievementState::of(3, false), AchievementState::InProgress);
        assert_eq!(AchievementState::of(5, true), AchievementState::Unlocked);
        // Unlocked never depends on the current value
        assert_eq!(AchievementState::of(0, true), AchievementState::Unlocked);
    }

    #[test]
    fn test_definition_type_field_name() {
        let def: AchievementDefinition = serde_json::from_str(
            r#"{"id":"first-sale","type":"first_sale","category":"seller","target":1,"name":"First Sale"}"#,
        )
        .unwrap();
        assert_eq!(def.kind, "first_sale");
        assert!(def.description.is_empty());
    }
}
