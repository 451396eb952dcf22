//! Pricing configuration for meterd.
//!
//! Maps (feature, plan) pairs to a reserved credit cost: each feature has a
//! base cost in credits, scaled by the plan's pricing multiplier.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::{Credits, PlanId};

/// Opaque key identifying a billable feature.
///
/// The metering engine never interprets feature keys; they exist to look up
/// pricing and to label records for auditing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureKey(String);

impl FeatureKey {
    /// Create a new feature key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FeatureKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Lookup seam for reserved-cost computation.
///
/// The pricing source is an external collaborator (plan catalog, pricing
/// service); this trait is the contract the engine consumes. `None` means
/// pricing is not configured for the pair, which the engine surfaces as a
/// denial rather than a panic.
pub trait PricingLookup: Send + Sync {
    /// Cost in credits to reserve for one use of `feature` under `plan`.
    fn feature_cost(&self, feature: &FeatureKey, plan: &PlanId) -> Option<Credits>;
}

/// In-memory pricing table.
///
/// Feature base costs in credits, scaled by a per-plan multiplier expressed
/// in hundredths (100 = 1.00x). Plans without an entry use the default
/// multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTable {
    /// Base cost per feature, in credits.
    feature_costs: HashMap<FeatureKey, Credits>,

    /// Plan multiplier in hundredths (150 = 1.50x).
    plan_multipliers: HashMap<PlanId, i64>,

    /// Multiplier applied to plans without an explicit entry.
    default_multiplier: i64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            feature_costs: HashMap::new(),
            plan_multipliers: HashMap::new(),
            default_multiplier: 100,
        }
    }
}

impl PricingTable {
    /// Create an empty pricing table with a 1.00x default multiplier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base cost for a feature.
    #[must_use]
    pub fn with_feature(mut self, feature: impl Into<FeatureKey>, cost: Credits) -> Self {
        self.feature_costs.insert(feature.into(), cost);
        self
    }

    /// Set the multiplier (in hundredths) for a plan.
    #[must_use]
    pub fn with_plan_multiplier(mut self, plan: PlanId, multiplier_hundredths: i64) -> Self {
        self.plan_multipliers.insert(plan, multiplier_hundredths);
        self
    }
}

impl From<String> for FeatureKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl PricingLookup for PricingTable {
    fn feature_cost(&self, feature: &FeatureKey, plan: &PlanId) -> Option<Credits> {
        let base = *self.feature_costs.get(feature)?;
        let multiplier = self
            .plan_multipliers
            .get(plan)
            .copied()
            .unwrap_or(self.default_multiplier);
        Some(base.scale_hundredths(multiplier))
    }
}
