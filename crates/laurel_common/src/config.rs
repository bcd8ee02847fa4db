//! Configuration management for the rewards engine.
//!
//! Loads settings from /etc/laurel/config.toml or uses defaults.
//! Every field carries a serde default, so a partial file is always valid.
//! v0.3.0: Achievement catalog entries may be declared inline as `[[achievements]]`.

use crate::catalog::RawAchievement;
use crate::error::Result;
use crate::points::PointsWeights;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/laurel/config.toml";

/// Fallback config path
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/laurel/config.toml";

/// Environment variable that overrides the config path
pub const CONFIG_ENV: &str = "LAUREL_CONFIG";

/// HTTP server settings for laureld
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address laureld binds to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:7870".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Database locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite mirror of the marketplace facts (orders, reviews, referrals, users)
    #[serde(default = "default_facts_db")]
    pub facts_db: PathBuf,

    /// SQLite database holding achievement progress rows
    #[serde(default = "default_rewards_db")]
    pub rewards_db: PathBuf,
}

fn default_facts_db() -> PathBuf {
    PathBuf::from("/var/lib/laurel/facts.db")
}

fn default_rewards_db() -> PathBuf {
    PathBuf::from("/var/lib/laurel/rewards.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            facts_db: default_facts_db(),
            rewards_db: default_rewards_db(),
        }
    }
}

/// Leaderboard sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    /// How many accounts are considered when building a ranking
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    /// Entries returned when the caller gives no limit
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Hard cap on the requested limit
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

fn default_candidate_limit() -> usize {
    1000
}

fn default_limit() -> usize {
    10
}

fn default_max_limit() -> usize {
    100
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            candidate_limit: default_candidate_limit(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl LeaderboardConfig {
    /// Resolve a caller-supplied limit against the configured bounds
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }
}

/// Unlock registry retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockConfig {
    /// Compare-and-set attempts before surfacing a transient error
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff step in milliseconds, doubled on each retry
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// SQLite busy timeout in milliseconds
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Connections held open against an on-disk registry. Users hash onto one
    /// of them, so evaluations for different users proceed in parallel.
    #[serde(default = "default_unlock_connections")]
    pub connections: usize,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff() -> u64 {
    10
}

fn default_busy_timeout() -> u64 {
    2_000
}

fn default_unlock_connections() -> usize {
    4
}

impl Default for UnlockConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff(),
            busy_timeout_ms: default_busy_timeout(),
            connections: default_unlock_connections(),
        }
    }
}

/// Progress aggregator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// An order delivered within this many seconds of creation counts as fast
    #[serde(default = "default_fast_delivery_window")]
    pub fast_delivery_window_secs: u64,
}

fn default_fast_delivery_window() -> u64 {
    3600
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            fast_delivery_window_secs: default_fast_delivery_window(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaurelConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub points: PointsWeights,

    #[serde(default)]
    pub leaderboard: LeaderboardConfig,

    #[serde(default)]
    pub unlock: UnlockConfig,

    #[serde(default)]
    pub progress: ProgressConfig,

    /// Catalog overrides. Empty means the built-in catalog.
    #[serde(default)]
    pub achievements: Vec<RawAchievement>,
}

impl LaurelConfig {
    /// Load config with fallback chain
    ///
    /// Priority:
    /// 1. Explicit path (from --config)
    /// 2. $LAUREL_CONFIG
    /// 3. /etc/laurel/config.toml
    /// 4. /var/lib/laurel/config.toml
    /// 5. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Self {
        if let Some(path) = explicit {
            match Self::load_from_path(path) {
                Ok(config) => return config,
                Err(e) => warn!("Config {} unusable, falling back: {}", path.display(), e),
            }
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            match Self::load_from_path(Path::new(&path)) {
                Ok(config) => return config,
                Err(e) => warn!("${} points at unusable config {}: {}", CONFIG_ENV, path, e),
            }
        }

        Self::load_from_path(Path::new(CONFIG_PATH))
            .or_else(|_| Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH)))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                LaurelConfig::default()
            })
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: LaurelConfig = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LaurelConfig::default();
        assert_eq!(config.server.bind, "127.0.0.1:7870");
        assert_eq!(config.points.delivered_order, 10);
        assert_eq!(config.points.review_given, 5);
        assert_eq!(config.points.completed_referral, 20);
        assert_eq!(config.unlock.max_attempts, 5);
        assert!(config.achievements.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[points]
delivered_order = 12

[leaderboard]
max_limit = 50
"#;
        let config: LaurelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.points.delivered_order, 12);
        // Defaults for missing fields
        assert_eq!(config.points.review_given, 5);
        assert_eq!(config.leaderboard.max_limit, 50);
        assert_eq!(config.leaderboard.default_limit, 10);
        assert_eq!(config.progress.fast_delivery_window_secs, 3600);
    }

    #[test]
    fn test_parse_catalog_entries() {
        let toml_str = r#"
[[achievements]]
id = "first-sale"
type = "first_sale"
category = "seller"
target = 1

[[achievements]]
id = "mystery"
"#;
        let config: LaurelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.achievements.len(), 2);
        assert_eq!(config.achievements[1].target, None);
    }

    #[test]
    fn test_example_config_parses() {
        let config: LaurelConfig =
            toml::from_str(include_str!("../../../laurel.example.toml")).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:7870");
        assert_eq!(config.unlock.busy_timeout_ms, 2000);
        assert_eq!(config.achievements.len(), 2);
    }

    #[test]
    fn test_clamp_limit() {
        let lb = LeaderboardConfig::default();
        assert_eq!(lb.clamp_limit(None), 10);
        assert_eq!(lb.clamp_limit(Some(25)), 25);
        assert_eq!(lb.clamp_limit(Some(10_000)), 100);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let result = LaurelConfig::load_from_path(Path::new("/nonexistent/laurel.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nbind = \"0.0.0.0:9000\"\n").unwrap();

        let config = LaurelConfig::load(Some(&path));
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }
}
