//! Usage metering engine for meterd.
//!
//! This crate provides the validate→log→commit lifecycle that turns an API
//! call into a billable, auditable record:
//!
//! - **Engine**: [`MeteringEngine`] with idempotent `validate` and `commit`
//! - **Rate limiting**: [`RateLimiter`] over an atomic [`CounterStore`]
//! - **Types**: request/outcome shapes shared by synchronous callers and
//!   the asynchronous commit queue
//!
//! # Guarantees
//!
//! - Repeated validation with the same (principal, request id, fingerprint)
//!   returns the same record without consuming quota or rate-limit slots.
//! - Exactly one commit performs the `Pending` → terminal transition and
//!   the quota increment, no matter how many commits race or replay.
//! - Rate limiting fails open when its counter store is unreachable, with
//!   a distinguishable log event.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod engine;
pub mod error;
pub mod rate_limit;
pub mod types;

pub use engine::MeteringEngine;
pub use error::{EngineError, Result};
pub use rate_limit::{
    CounterError, CounterStore, MemoryCounterStore, RateLimitConfig, RateLimitSnapshot,
    RateLimiter, Window, WindowSample, WindowStatus, DAY_WINDOW_SECS, MINUTE_WINDOW_SECS,
};
pub use types::{CommitOutcome, CommitRequest, StatusHint, ValidateOutcome, ValidateRequest};
