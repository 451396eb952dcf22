//! Core types and utilities for meterd.
//!
//! This crate provides the foundational types used throughout the meterd
//! platform:
//!
//! - **Identifiers**: `PrincipalId`, `ContextId`, `PlanId`, `RecordId`, `ResultId`
//! - **Credits**: fixed-point `Credits` amounts
//! - **Records**: `UsageRecord`, `ResultRecord`, statuses and metrics
//! - **Contexts**: `BillingContext` quota state
//! - **Fingerprinting**: `request_fingerprint` for idempotency
//! - **Pricing**: `PricingLookup`, `PricingTable`
//!
//! # Credit Unit
//!
//! Credit amounts carry two decimal places and are stored as `i64`
//! hundredths to avoid floating point precision issues: a feature costing
//! 1.50 credits is stored as 150.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod context;
pub mod credits;
pub mod fingerprint;
pub mod ids;
pub mod pricing;
pub mod record;

pub use context::BillingContext;
pub use credits::{Credits, CreditsError};
pub use fingerprint::request_fingerprint;
pub use ids::{ContextId, IdError, PlanId, PrincipalId, RecordId, ResultId};
pub use pricing::{FeatureKey, PricingLookup, PricingTable};
pub use record::{
    AccessDecision, FailureDetail, FailureKind, NewUsageRecord, RecordStatus, ResultRecord,
    UsageEstimate, UsageMetrics, UsageRecord, MAX_INPUT_CHARS, MAX_LATENCY_MS, MAX_TOKENS,
};
