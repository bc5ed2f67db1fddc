//! Plan catalog.
//!
//! Maps plan ids to their price and included credit allowance. The catalog is
//! configuration, not provider state: webhook events reference plans by id and
//! the state machine looks up the grant amount here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Starter plan monthly price.
pub const STARTER_PLAN_PRICE: i64 = 2_000;

/// Pro plan monthly price.
pub const PRO_PLAN_PRICE: i64 = 5_000;

/// Starter plan credits per billing period.
pub const STARTER_PLAN_CREDITS: i64 = 2_500;

/// Pro plan credits per billing period.
pub const PRO_PLAN_CREDITS: i64 = 6_000;

/// Default trial length in days.
pub const DEFAULT_TRIAL_DAYS: i64 = 14;

/// Default trial credit cap.
pub const DEFAULT_TRIAL_CREDITS: i64 = 500;

/// One purchasable plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan id as referenced by provider events.
    pub id: String,

    /// Price per billing period.
    pub price: i64,

    /// Credits granted each time a billing period activates.
    pub included_credits: i64,
}

/// All known plans, keyed by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanCatalog {
    plans: HashMap<String, Plan>,
}

impl PlanCatalog {
    /// Build a catalog from an explicit plan list.
    #[must_use]
    pub fn new(plans: Vec<Plan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Look up a plan by id.
    #[must_use]
    pub fn plan(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.get(plan_id)
    }

    /// Credits granted per period for a plan; zero for unknown plans.
    #[must_use]
    pub fn credits_for(&self, plan_id: &str) -> i64 {
        self.plans.get(plan_id).map_or(0, |p| p.included_credits)
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(vec![
            Plan {
                id: "starter".into(),
                price: STARTER_PLAN_PRICE,
                included_credits: STARTER_PLAN_CREDITS,
            },
            Plan {
                id: "pro".into(),
                price: PRO_PLAN_PRICE,
                included_credits: PRO_PLAN_CREDITS,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_credits() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.credits_for("starter"), STARTER_PLAN_CREDITS);
        assert_eq!(catalog.credits_for("pro"), PRO_PLAN_CREDITS);
        assert_eq!(catalog.credits_for("enterprise"), 0);
    }

    #[test]
    fn custom_catalog() {
        let catalog = PlanCatalog::new(vec![Plan {
            id: "team".into(),
            price: 10_000,
            included_credits: 15_000,
        }]);
        assert_eq!(catalog.credits_for("team"), 15_000);
        assert!(catalog.plan("starter").is_none());
    }
}
