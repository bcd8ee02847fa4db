//! Achievement Catalog v0.3.0
//!
//! Static definitions of what can be unlocked. Entries come from
//! `[[achievements]]` in the config file, or the built-in table below when the
//! file declares none.
//!
//! A malformed entry never blocks the rest of the catalog: missing fields get
//! a default and a warning, and only an entry without an id is dropped.

use crate::types::{AchievementDefinition, Category};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Target used when an entry omits one
pub const DEFAULT_TARGET: u64 = 1;

/// Built-in catalog: (id, type, category, target, name, description)
pub const BUILTIN_ACHIEVEMENTS: &[(&str, &str, Category, u64, &str, &str)] = &[
    (
        "first-sale",
        "first_sale",
        Category::Seller,
        1,
        "First Sale",
        "Deliver your first order.",
    ),
    (
        "speed-demon",
        "speed_demon",
        Category::Seller,
        10,
        "Speed Demon",
        "Deliver 10 orders within the fast-delivery window.",
    ),
    (
        "customer-champion",
        "customer_champion",
        Category::Seller,
        50,
        "Customer Champion",
        "Collect 50 five-star reviews.",
    ),
    (
        "sales-veteran",
        "sales_veteran",
        Category::Seller,
        100,
        "Sales Veteran",
        "Deliver 100 orders.",
    ),
    (
        "top-earner",
        "top_earner",
        Category::Seller,
        10_000,
        "Top Earner",
        "Earn 10,000 in delivered order totals.",
    ),
    (
        "platform-ambassador",
        "platform_ambassador",
        Category::Seller,
        10,
        "Platform Ambassador",
        "Refer 10 people to the marketplace.",
    ),
    (
        "first-purchase",
        "first_purchase",
        Category::Buyer,
        1,
        "First Purchase",
        "Receive your first delivered order.",
    ),
    (
        "loyal-customer",
        "loyal_customer",
        Category::Buyer,
        25,
        "Loyal Customer",
        "Receive 25 delivered orders.",
    ),
    (
        "trusted-reviewer",
        "trusted_reviewer",
        Category::Buyer,
        10,
        "Trusted Reviewer",
        "Write 10 reviews.",
    ),
];

/// Catalog entry as written in the config file; every field optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAchievement {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub target: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RawAchievement {
    /// Substitute defaults for missing fields, logging each substitution.
    /// Returns None only when the entry has no usable id.
    pub fn normalize(&self) -> Option<AchievementDefinition> {
        let id = match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                warn!("Catalog entry without id skipped: {:?}", self);
                return None;
            }
        };

        let kind = match self.kind.as_deref().map(str::trim) {
            Some(kind) if !kind.is_empty() => kind.to_string(),
            _ => {
                warn!("Achievement '{}' has no type; it will report zero progress", id);
                String::new()
            }
        };

        let category = match self.category.as_deref() {
            Some(raw) => raw.parse::<Category>().unwrap_or_else(|e| {
                warn!("Achievement '{}': {}, using seller", id, e);
                Category::default()
            }),
            None => {
                warn!("Achievement '{}' has no category, using seller", id);
                Category::default()
            }
        };

        let target = match self.target {
            Some(t) if t > 0 => t,
            Some(_) => {
                warn!("Achievement '{}' has target 0, using {}", id, DEFAULT_TARGET);
                DEFAULT_TARGET
            }
            None => {
                warn!("Achievement '{}' has no target, using {}", id, DEFAULT_TARGET);
                DEFAULT_TARGET
            }
        };

        let name = self.name.clone().unwrap_or_else(|| "Achievement".to_string());

        Some(AchievementDefinition {
            id,
            kind,
            category,
            target,
            name,
            description: self.description.clone().unwrap_or_default(),
        })
    }
}

/// Ordered set of achievement definitions
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<AchievementDefinition>,
}

impl Catalog {
    pub fn builtin() -> Self {
        let entries = BUILTIN_ACHIEVEMENTS
            .iter()
            .map(
                |&(id, kind, category, target, name, description)| AchievementDefinition {
                    id: id.to_string(),
                    kind: kind.to_string(),
                    category,
                    target,
                    name: name.to_string(),
                    description: description.to_string(),
                },
            )
            .collect();
        Self { entries }
    }

    /// Build from config entries; empty input means the built-in catalog
    pub fn from_raw(raw: &[RawAchievement]) -> Self {
        if raw.is_empty() {
            return Self::builtin();
        }

        let mut entries: Vec<AchievementDefinition> = Vec::with_capacity(raw.len());
        for def in raw.iter().filter_map(RawAchievement::normalize) {
            if entries.iter().any(|e| e.id == def.id) {
                warn!("Duplicate achievement id '{}' ignored", def.id);
                continue;
            }
            entries.push(def);
        }
        Self { entries }
    }

    pub fn from_definitions(entries: Vec<AchievementDefinition>) -> Self {
        Self { entries }
    }

    pub fn get(&self, id: &str) -> Option<&AchievementDefinition> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AchievementDefinition> {
        self.entries.iter()
    }

    /// Entries for one category, or all when `category` is None
    pub fn filter(&self, category: Option<Category>) -> impl Iterator<Item = &AchievementDefinition> {
        self.entries
            .iter()
            .filter(move |e| category.map_or(true, |c| e.category == c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.len(), BUILTIN_ACHIEVEMENTS.len());
        let top = catalog.get("top-earner").unwrap();
        assert_eq!(top.kind, "top_earner");
        assert_eq!(top.category, Category::Seller);
        assert_eq!(catalog.filter(Some(Category::Buyer)).count(), 3);
        assert_eq!(catalog.filter(None).count(), catalog.len());
    }

    #[test]
    fn test_missing_target_defaults_to_one() {
        let raw = RawAchievement {
            id: Some("first".to_string()),
            kind: Some("first_sale".to_string()),
            category: Some("seller".to_string()),
            ..Default::default()
        };
        let def = raw.normalize().unwrap();
        assert_eq!(def.target, 1);
        assert_eq!(def.name, "Achievement");
    }

    #[test]
    fn test_missing_category_defaults_to_seller() {
        let raw = RawAchievement {
            id: Some("x".to_string()),
            category: Some("wizard".to_string()),
            target: Some(3),
            ..Default::default()
        };
        let def = raw.normalize().unwrap();
        assert_eq!(def.category, Category::Seller);
        assert!(def.kind.is_empty());
        assert_eq!(def.target, 3);
    }

    #[test]
    fn test_entry_without_id_is_dropped_others_kept() {
        let raw = vec![
            RawAchievement {
                kind: Some("first_sale".to_string()),
                ..Default::default()
            },
            RawAchievement {
                id: Some("kept".to_string()),
                kind: Some("first_sale".to_string()),
                target: Some(2),
                ..Default::default()
            },
        ];
        let catalog = Catalog::from_raw(&raw);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("kept").is_some());
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let raw = vec![
            RawAchievement {
                id: Some("dup".to_string()),
                target: Some(1),
                ..Default::default()
            },
            RawAchievement {
                id: Some("dup".to_string()),
                target: Some(9),
                ..Default::default()
            },
        ];
        let catalog = Catalog::from_raw(&raw);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("dup").unwrap().target, 1);
    }

    #[test]
    fn test_empty_config_uses_builtin() {
        assert_eq!(Catalog::from_raw(&[]).len(), BUILTIN_ACHIEVEMENTS.len());
    }
}
