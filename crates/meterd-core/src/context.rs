//! Billing context: the current-period quota state for a principal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ContextId, Credits, PlanId, PrincipalId};

/// Quota state for one principal with an active subscription.
///
/// `credits_used` is the only source of truth for quota checks; it is never
/// recomputed by summing usage records on the hot path. Within a period it
/// is monotonically non-decreasing and is incremented only when a record
/// commits as `Success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingContext {
    /// Unique context ID.
    pub id: ContextId,

    /// The principal this context bills.
    pub principal_id: PrincipalId,

    /// The subscription plan in effect.
    pub plan_id: PlanId,

    /// Credit ceiling for the current period.
    pub credits_allocation: Credits,

    /// Running total of credits consumed this period.
    pub credits_used: Credits,

    /// Start of the current billing period.
    pub period_start: DateTime<Utc>,

    /// End of the current billing period.
    pub period_end: DateTime<Utc>,
}

impl BillingContext {
    /// Create a fresh context with zero usage.
    #[must_use]
    pub fn new(
        principal_id: PrincipalId,
        plan_id: PlanId,
        credits_allocation: Credits,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ContextId::generate(),
            principal_id,
            plan_id,
            credits_allocation,
            credits_used: Credits::ZERO,
            period_start,
            period_end,
        }
    }

    /// Credits still available this period.
    #[must_use]
    pub fn remaining(&self) -> Credits {
        self.credits_allocation.saturating_sub(self.credits_used)
    }

    /// Whether reserving `cost` would exceed the allocation.
    #[must_use]
    pub fn would_exceed(&self, cost: Credits) -> bool {
        match self.credits_used.checked_add(cost) {
            Some(total) => total > self.credits_allocation,
            // Overflow can only mean the reservation is far past any ceiling.
            None => true,
        }
    }
}
