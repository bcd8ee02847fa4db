//! Rewards Engine v0.4.0
//!
//! Ties the catalog, fact store, progress calculator, unlock registry, points
//! weights and referral ledger together behind the exposed operations.
//!
//! ## Read vs write paths
//!
//! - Reads (`get_achievements`, `achievement_summary`, `user_points`,
//!   `get_leaderboard`, `get_referral_status`) never fail: fact-store or
//!   registry faults are logged and the affected values degrade to zero/empty.
//! - `trigger_unlock_evaluation` finishes every fact read before it writes,
//!   then records all of the user's progress in one registry batch. The batch
//!   either lands whole or not at all, so a failed or timed-out evaluation
//!   leaves no unlock that was not reported. Transient registry failures are
//!   returned to the caller.
//! - The `fallback_*` builders give the zero-progress bodies that callers
//!   serve when an engine call cannot finish in time.
//!
//! v0.4.0: Referral ledger attached for code/redeem/complete.

use crate::api::{AchievementSummary, AchievementView, ReferralStatusResponse};
use crate::catalog::Catalog;
use crate::config::{LaurelConfig, LeaderboardConfig};
use crate::error::{Result, RewardsError};
use crate::facts::{ActivityQuery, FactStore, ReferralTotals};
use crate::leaderboard::{Candidate, Leaderboard, LeaderboardBuilder, Scope};
use crate::points::{PointsSnapshot, PointsWeights, Tier};
use crate::progress::{AggregatorRegistry, ProgressCalculator, ProgressReading};
use crate::referral::{LadderStanding, ReferralLedger, ReferralRecord};
use crate::types::{AchievementDefinition, AchievementId, AchievementProgress, AchievementState, Category};
use crate::unlock::{ProgressUpdate, UnlockRegistry};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct RewardsEngine {
    facts: Arc<dyn FactStore>,
    registry: Arc<dyn UnlockRegistry>,
    catalog: Catalog,
    calculator: ProgressCalculator,
    weights: PointsWeights,
    leaderboard: LeaderboardConfig,
    ledger: Option<ReferralLedger>,
}

impl RewardsEngine {
    /// Engine with the config's catalog, weights and built-in aggregators
    pub fn new(
        facts: Arc<dyn FactStore>,
        registry: Arc<dyn UnlockRegistry>,
        config: &LaurelConfig,
    ) -> Self {
        Self {
            facts,
            registry,
            catalog: Catalog::from_raw(&config.achievements),
            calculator: ProgressCalculator::new(AggregatorRegistry::builtin(&config.progress)),
            weights: config.points,
            leaderboard: config.leaderboard.clone(),
            ledger: None,
        }
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_calculator(mut self, calculator: ProgressCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    pub fn with_ledger(mut self, ledger: ReferralLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn weights(&self) -> &PointsWeights {
        &self.weights
    }

    fn ledger(&self) -> Result<&ReferralLedger> {
        self.ledger.as_ref().ok_or_else(|| {
            RewardsError::Configuration("no referral ledger attached".to_string())
        })
    }

    fn measure(&self, user_id: &str, def: &AchievementDefinition) -> Result<ProgressReading> {
        self.calculator.evaluate(self.facts.as_ref(), user_id, def)
    }

    // ========================================================================
    // Achievements
    // ========================================================================

    /// Current progress for every catalog entry (optionally one category).
    ///
    /// Shown progress is the larger of the live measurement and the stored
    /// value, so a shrinking fact never shows as regression.
    pub fn get_achievements(&self, user_id: &str, category: Option<Category>) -> Vec<AchievementView> {
        let stored: HashMap<AchievementId, AchievementProgress> =
            match self.registry.list_for_user(user_id) {
                Ok(rows) => rows
                    .into_iter()
                    .map(|row| (row.achievement_id.clone(), row))
                    .collect(),
                Err(e) => {
                    warn!("Unlock registry read failed for {}: {}", user_id, e);
                    HashMap::new()
                }
            };

        self.catalog
            .filter(category)
            .map(|def| {
                let computed = match self.measure(user_id, def) {
                    Ok(reading) => reading.progress_value,
                    Err(e) => {
                        warn!("Progress for {}/{} unavailable: {}", user_id, def.id, e);
                        0
                    }
                };
                Self::view(def, computed, stored.get(&def.id))
            })
            .collect()
    }

    fn view(
        def: &AchievementDefinition,
        computed: u64,
        row: Option<&AchievementProgress>,
    ) -> AchievementView {
        let progress_value = row.map_or(computed, |r| r.progress_value.max(computed));
        let unlocked = row.map_or(false, |r| r.unlocked);

        AchievementView {
            id: def.id.clone(),
            name: def.name.clone(),
            description: def.description.clone(),
            kind: def.kind.clone(),
            category: def.category,
            progress_value,
            target: def.target.max(1),
            unlocked,
            unlocked_at: row.and_then(|r| r.unlocked_at),
            state: AchievementState::of(progress_value, unlocked),
        }
    }

    /// Unlocked/total over the whole catalog plus the collector badge
    pub fn achievement_summary(&self, user_id: &str) -> AchievementSummary {
        let unlocked = match self.registry.list_for_user(user_id) {
            Ok(rows) => rows
                .iter()
                .filter(|r| r.unlocked && self.catalog.get(&r.achievement_id).is_some())
                .count(),
            Err(e) => {
                warn!("Unlock registry read failed for {}: {}", user_id, e);
                0
            }
        };

        AchievementSummary {
            user_id: user_id.to_string(),
            unlocked,
            total: self.catalog.len(),
            badge: Tier::from_unlocked_count(unlocked),
        }
    }

    /// Measure every catalog entry and record progress, returning the ids
    /// unlocked by this call. Safe to call repeatedly and concurrently.
    pub fn trigger_unlock_evaluation(&self, user_id: &str) -> Result<Vec<AchievementId>> {
        self.evaluate(user_id, None)
    }

    /// As [`Self::trigger_unlock_evaluation`], but gives up with a transient
    /// error, before writing anything, if the fact reads end past `deadline`.
    pub fn trigger_unlock_evaluation_by(
        &self,
        user_id: &str,
        deadline: Instant,
    ) -> Result<Vec<AchievementId>> {
        self.evaluate(user_id, Some(deadline))
    }

    fn evaluate(&self, user_id: &str, deadline: Option<Instant>) -> Result<Vec<AchievementId>> {
        if user_id.trim().is_empty() {
            return Err(RewardsError::not_found("user", user_id));
        }

        // All reads first
        let readings: Vec<(&AchievementDefinition, ProgressReading)> = self
            .catalog
            .iter()
            .filter_map(|def| match self.measure(user_id, def) {
                Ok(reading) => Some((def, reading)),
                Err(e) => {
                    warn!("Skipping {}/{} this round: {}", user_id, def.id, e);
                    None
                }
            })
            .collect();

        if deadline.map_or(false, |d| Instant::now() >= d) {
            warn!("Evaluation for {} ran past its deadline, nothing written", user_id);
            return Err(RewardsError::TransientStorage {
                attempts: 0,
                reason: "deadline passed before the unlock write".to_string(),
            });
        }

        let updates: Vec<ProgressUpdate> = readings
            .iter()
            .map(|(def, reading)| ProgressUpdate {
                achievement_id: def.id.clone(),
                progress_value: reading.progress_value,
                target: reading.target,
            })
            .collect();
        let outcomes = self.registry.upsert_batch(user_id, &updates)?;

        let mut newly_unlocked = Vec::new();
        for outcome in outcomes.into_iter().filter(|o| o.newly_unlocked) {
            info!("{} unlocked '{}'", user_id, outcome.progress.achievement_id);
            newly_unlocked.push(outcome.progress.achievement_id);
        }

        debug!(
            "Evaluated {} achievements for {}, {} newly unlocked",
            self.catalog.len(),
            user_id,
            newly_unlocked.len()
        );
        Ok(newly_unlocked)
    }

    // ========================================================================
    // Points & leaderboard
    // ========================================================================

    pub fn user_points(&self, user_id: &str) -> PointsSnapshot {
        let counts = self
            .facts
            .activity_counts(user_id, &ActivityQuery::default())
            .unwrap_or_else(|e| {
                warn!("Activity counts for {} unavailable: {}", user_id, e);
                Default::default()
            });
        PointsSnapshot::compute(counts, &self.weights)
    }

    /// Top `limit` users for `scope` (default/max limits from config)
    pub fn get_leaderboard(&self, scope: Scope, limit: Option<usize>) -> Leaderboard {
        let limit = self.leaderboard.clamp_limit(limit);
        match self.rank(scope) {
            Ok(board) => board.into_top(limit),
            Err(e) => {
                warn!("Leaderboard {} unavailable: {}", scope, e);
                self.fallback_leaderboard(scope)
            }
        }
    }

    /// Full ranking over the candidate set in a fixed number of queries
    fn rank(&self, scope: Scope) -> Result<Leaderboard> {
        let query = scope.query(Utc::now());
        let users = self.facts.candidate_users(self.leaderboard.candidate_limit)?;
        let mut counts = self.facts.batch_activity(&users, &query)?;
        let mut created = self.facts.batch_created_at(&users)?;

        let candidates = users
            .into_iter()
            .map(|user_id| Candidate {
                counts: counts.remove(&user_id).unwrap_or_default(),
                created_at: created.remove(&user_id),
                user_id,
            })
            .collect();

        Ok(LeaderboardBuilder::new(&self.weights).build(scope, candidates))
    }

    // ========================================================================
    // Referrals
    // ========================================================================

    pub fn get_referral_status(&self, user_id: &str) -> ReferralStatusResponse {
        let totals = self.facts.referral_totals(user_id).unwrap_or_else(|e| {
            warn!("Referral totals for {} unavailable: {}", user_id, e);
            Default::default()
        });
        let referral_code = match self.ledger.as_ref().map(|l| l.existing_code(user_id)) {
            Some(Ok(code)) => code,
            Some(Err(e)) => {
                warn!("Referral code lookup for {} failed: {}", user_id, e);
                None
            }
            None => None,
        };

        Self::referral_status(user_id, totals, referral_code)
    }

    fn referral_status(
        user_id: &str,
        totals: ReferralTotals,
        referral_code: Option<String>,
    ) -> ReferralStatusResponse {
        let standing = LadderStanding::evaluate(totals.completed);
        ReferralStatusResponse {
            user_id: user_id.to_string(),
            level: standing.level,
            completed_referrals: totals.completed,
            total_referrals: totals.total,
            total_earnings_cents: totals.earnings_cents,
            next_level_requirement: standing.next_level_requirement,
            reward: standing.reward,
            referral_code,
        }
    }

    pub fn referral_code(&self, user_id: &str) -> Result<String> {
        self.ledger()?.referral_code(user_id)
    }

    pub fn redeem_referral(&self, code: &str, referred_id: &str) -> Result<ReferralRecord> {
        self.ledger()?.redeem(code, referred_id)
    }

    pub fn complete_referral(&self, referred_id: &str, reward_cents: u64) -> Result<ReferralRecord> {
        self.ledger()?.complete(referred_id, reward_cents)
    }

    // ========================================================================
    // Fallback bodies (no storage access)
    // ========================================================================

    /// Catalog entries with zero progress and nothing unlocked
    pub fn fallback_achievements(&self, category: Option<Category>) -> Vec<AchievementView> {
        self.catalog
            .filter(category)
            .map(|def| Self::view(def, 0, None))
            .collect()
    }

    pub fn fallback_summary(&self, user_id: &str) -> AchievementSummary {
        AchievementSummary {
            user_id: user_id.to_string(),
            unlocked: 0,
            total: self.catalog.len(),
            badge: Tier::from_unlocked_count(0),
        }
    }

    pub fn fallback_points(&self) -> PointsSnapshot {
        PointsSnapshot::compute(Default::default(), &self.weights)
    }

    pub fn fallback_leaderboard(&self, scope: Scope) -> Leaderboard {
        Leaderboard {
            scope,
            entries: Vec::new(),
        }
    }

    /// Level 0, no code
    pub fn fallback_referral_status(&self, user_id: &str) -> ReferralStatusResponse {
        Self::referral_status(user_id, ReferralTotals::default(), None)
    }
}
