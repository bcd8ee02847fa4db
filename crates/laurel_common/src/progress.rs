//! Progress Calculator
//!
//! Maps an achievement `type` to an [`Aggregator`] that measures current
//! progress from the fact store. Aggregators are registered by name.
//!
//! Unregistered types measure as zero.

use crate::config::ProgressConfig;
use crate::error::Result;
use crate::facts::FactStore;
use crate::types::AchievementDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Minor currency units per whole unit for `top_earner`
const CENTS_PER_UNIT: u64 = 100;

/// Measures one achievement type for one user. Must not write.
pub trait Aggregator: Send + Sync {
    fn measure(&self, facts: &dyn FactStore, user_id: &str) -> Result<u64>;
}

impl<F> Aggregator for F
where
    F: Fn(&dyn FactStore, &str) -> Result<u64> + Send + Sync,
{
    fn measure(&self, facts: &dyn FactStore, user_id: &str) -> Result<u64> {
        self(facts, user_id)
    }
}

/// type → aggregator table
#[derive(Clone, Default)]
pub struct AggregatorRegistry {
    aggregators: HashMap<String, Arc<dyn Aggregator>>,
}

impl AggregatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in marketplace aggregator
    pub fn builtin(config: &ProgressConfig) -> Self {
        let fast_window = Duration::from_secs(config.fast_delivery_window_secs);
        let mut registry = Self::new();

        // Seller side
        registry.register("first_sale", |facts: &dyn FactStore, user: &str| -> Result<u64> {
            Ok(facts.delivered_sales(user)?.count)
        });
        registry.register("sales_veteran", |facts: &dyn FactStore, user: &str| -> Result<u64> {
            Ok(facts.delivered_sales(user)?.count)
        });
        registry.register("customer_champion", |facts: &dyn FactStore, user: &str| -> Result<u64> {
            facts.five_star_reviews(user)
        });
        registry.register("top_earner", |facts: &dyn FactStore, user: &str| -> Result<u64> {
            Ok(facts.delivered_sales(user)?.total_cents / CENTS_PER_UNIT)
        });
        registry.register("platform_ambassador", |facts: &dyn FactStore, user: &str| -> Result<u64> {
            facts.referral_edges(user)
        });
        registry.register("speed_demon", move |facts: &dyn FactStore, user: &str| -> Result<u64> {
            facts.fast_deliveries(user, fast_window)
        });

        // Buyer side
        registry.register("first_purchase", |facts: &dyn FactStore, user: &str| -> Result<u64> {
            facts.delivered_purchases(user)
        });
        registry.register("loyal_customer", |facts: &dyn FactStore, user: &str| -> Result<u64> {
            facts.delivered_purchases(user)
        });
        registry.register("trusted_reviewer", |facts: &dyn FactStore, user: &str| -> Result<u64> {
            facts.reviews_given(user)
        });

        registry
    }

    /// Add or replace the aggregator for `kind`
    pub fn register<A>(&mut self, kind: &str, aggregator: A)
    where
        A: Aggregator + 'static,
    {
        self.aggregators.insert(kind.to_string(), Arc::new(aggregator));
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn Aggregator>> {
        self.aggregators.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.aggregators.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.aggregators.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Current measurement for one (user, achievement) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReading {
    pub progress_value: u64,
    pub target: u64,
}

impl ProgressReading {
    pub fn is_met(&self) -> bool {
        self.progress_value >= self.target
    }
}

/// Evaluates achievement progress through the registry
#[derive(Clone)]
pub struct ProgressCalculator {
    registry: AggregatorRegistry,
}

impl ProgressCalculator {
    pub fn new(registry: AggregatorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AggregatorRegistry {
        &self.registry
    }

    /// Measure `definition` for `user_id`.
    ///
    /// Unknown types and unknown users read as zero; fact-store failures are
    /// returned so the caller decides whether to degrade or skip.
    pub fn evaluate(
        &self,
        facts: &dyn FactStore,
        user_id: &str,
        definition: &AchievementDefinition,
    ) -> Result<ProgressReading> {
        let target = definition.target.max(1);

        let progress_value = match self.registry.get(&definition.kind) {
            Some(aggregator) => match aggregator.measure(facts, user_id) {
                Ok(value) => value,
                Err(e) if e.is_not_found() => 0,
                Err(e) => return Err(e),
            },
            None => {
                debug!(
                    "No aggregator for type '{}' (achievement '{}'), reporting zero",
                    definition.kind, definition.id
                );
                0
            }
        };

        Ok(ProgressReading {
            progress_value,
            target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RewardsError;
    use crate::facts::{NewOrder, NewReview, SqliteFactStore};
    use crate::types::Category;
    use chrono::{TimeZone, Utc};

    fn def(kind: &str, target: u64) -> AchievementDefinition {
        AchievementDefinition {
            id: format!("{}-test", kind),
            kind: kind.to_string(),
            category: Category::Seller,
            target,
            name: kind.to_string(),
            description: String::new(),
        }
    }

    fn store() -> SqliteFactStore {
        let store = SqliteFactStore::open_in_memory().unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        store.insert_user("seller", t0).unwrap();
        store
            .insert_order(&NewOrder::delivered("buyer", "seller", 12_345, t0, 120))
            .unwrap();
        store
            .insert_order(&NewOrder::delivered("buyer", "seller", 40_000, t0, 7_200))
            .unwrap();
        store
            .insert_review(&NewReview {
                author_id: "buyer".to_string(),
                seller_id: "seller".to_string(),
                rating: 5,
                created_at: t0,
            })
            .unwrap();
        store
    }

    fn calculator() -> ProgressCalculator {
        ProgressCalculator::new(AggregatorRegistry::builtin(&ProgressConfig::default()))
    }

    #[test]
    fn test_builtin_kinds_registered() {
        let registry = AggregatorRegistry::builtin(&ProgressConfig::default());
        for kind in [
            "first_sale",
            "sales_veteran",
            "customer_champion",
            "top_earner",
            "platform_ambassador",
            "speed_demon",
            "first_purchase",
            "loyal_customer",
            "trusted_reviewer",
        ] {
            assert!(registry.contains(kind), "missing aggregator {}", kind);
        }
    }

    #[test]
    fn test_seller_aggregators() {
        let facts = store();
        let calc = calculator();

        let sales = calc.evaluate(&facts, "seller", &def("sales_veteran", 100)).unwrap();
        assert_eq!(sales.progress_value, 2);
        assert!(!sales.is_met());

        let first = calc.evaluate(&facts, "seller", &def("first_sale", 1)).unwrap();
        assert!(first.is_met());

        // 523.45 whole units, truncated
        let earner = calc.evaluate(&facts, "seller", &def("top_earner", 10_000)).unwrap();
        assert_eq!(earner.progress_value, 523);

        let champion = calc
            .evaluate(&facts, "seller", &def("customer_champion", 50))
            .unwrap();
        assert_eq!(champion.progress_value, 1);

        // Only the 2-minute delivery is inside the default one-hour window
        let speed = calc.evaluate(&facts, "seller", &def("speed_demon", 10)).unwrap();
        assert_eq!(speed.progress_value, 1);
    }

    #[test]
    fn test_buyer_aggregators() {
        let facts = store();
        let calc = calculator();
        let purchases = calc.evaluate(&facts, "buyer", &def("loyal_customer", 25)).unwrap();
        assert_eq!(purchases.progress_value, 2);
        let reviews = calc.evaluate(&facts, "buyer", &def("trusted_reviewer", 10)).unwrap();
        assert_eq!(reviews.progress_value, 1);
    }

    #[test]
    fn test_unknown_type_reports_zero() {
        let facts = store();
        let reading = calculator()
            .evaluate(&facts, "seller", &def("moon_landing", 3))
            .unwrap();
        assert_eq!(reading.progress_value, 0);
        assert_eq!(reading.target, 3);
    }

    #[test]
    fn test_zero_target_is_treated_as_one() {
        let facts = store();
        let reading = calculator().evaluate(&facts, "seller", &def("first_sale", 0)).unwrap();
        assert_eq!(reading.target, 1);
    }

    #[test]
    fn test_unknown_user_reports_zero() {
        let facts = store();
        let reading = calculator().evaluate(&facts, "nobody", &def("first_sale", 1)).unwrap();
        assert_eq!(reading.progress_value, 0);
    }

    #[test]
    fn test_custom_aggregator_and_not_found_mapping() {
        let facts = store();
        let mut registry = AggregatorRegistry::new();
        registry.register("always_seven", |_: &dyn FactStore, _: &str| -> Result<u64> { Ok(7) });
        registry.register("missing", |_: &dyn FactStore, user: &str| -> Result<u64> {
            Err(RewardsError::not_found("user", user))
        });
        registry.register("broken", |_: &dyn FactStore, _: &str| -> Result<u64> {
            Err(RewardsError::Configuration("boom".to_string()))
        });
        let calc = ProgressCalculator::new(registry);

        assert_eq!(
            calc.evaluate(&facts, "u", &def("always_seven", 5)).unwrap().progress_value,
            7
        );
        assert_eq!(
            calc.evaluate(&facts, "u", &def("missing", 5)).unwrap().progress_value,
            0
        );
        assert!(calc.evaluate(&facts, "u", &def("broken", 5)).is_err());
    }
}
