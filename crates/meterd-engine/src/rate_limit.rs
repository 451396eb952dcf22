//! Per-principal fixed-window rate limiting.
//!
//! Two independent fixed windows per principal: per-minute and per-day. The
//! counter store performs increment-and-set-expiry as a single atomic
//! operation so two concurrent first requests cannot race into separate
//! windows with independent expiries.
//!
//! If the counter store is unreachable the limiter **fails open**:
//! availability of the protected resource takes priority over strict
//! limiting during an infrastructure outage. The branch is logged with a
//! `fail_open` field so it stays distinguishable from a normal allow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use meterd_core::PrincipalId;

/// Length of the short (per-minute) window in seconds.
pub const MINUTE_WINDOW_SECS: u64 = 60;

/// Length of the long (per-day) window in seconds.
pub const DAY_WINDOW_SECS: u64 = 86_400;

/// The two fixed rate-limit windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// 60-second window.
    Minute,

    /// 86 400-second window.
    Day,
}

impl Window {
    /// Window length in seconds.
    #[must_use]
    pub const fn secs(self) -> u64 {
        match self {
            Self::Minute => MINUTE_WINDOW_SECS,
            Self::Day => DAY_WINDOW_SECS,
        }
    }

    /// Short label used in counter keys and messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Day => "day",
        }
    }
}

/// Post-increment sample from one counter window.
#[derive(Debug, Clone, Copy)]
pub struct WindowSample {
    /// Request count in the current window, including this request.
    pub count: u64,

    /// Seconds remaining until the window resets.
    pub ttl_secs: u64,
}

/// Errors from the counter store.
#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    /// The counter store could not be reached.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic fixed-window counter storage.
///
/// Implementations must perform the increment and the expiry-setting of a
/// fresh window as one atomic operation (a transaction or server-side
/// script for networked stores).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter at `key`, starting a new window of
    /// `window_secs` if none is active, and return the post-increment count
    /// with the remaining time to reset.
    async fn incr_with_window(
        &self,
        key: &str,
        window_secs: u64,
    ) -> Result<WindowSample, CounterError>;
}

/// In-process counter store.
///
/// One mutex guards the whole map, which makes increment-plus-expiry
/// trivially atomic.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, Counter>>,
}

struct Counter {
    count: u64,
    expires_at: Instant,
}

impl MemoryCounterStore {
    /// Create an empty counter store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_with_window(
        &self,
        key: &str,
        window_secs: u64,
    ) -> Result<WindowSample, CounterError> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let now = Instant::now();
        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: now,
        });

        if counter.expires_at <= now {
            counter.count = 1;
            counter.expires_at = now + std::time::Duration::from_secs(window_secs);
        } else {
            counter.count += 1;
        }

        Ok(WindowSample {
            count: counter.count,
            ttl_secs: counter.expires_at.duration_since(now).as_secs().max(1),
        })
    }
}

/// Rate-limit caps per principal. `None` disables a window entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitConfig {
    /// Maximum requests per minute.
    pub per_minute: Option<u32>,

    /// Maximum requests per day.
    pub per_day: Option<u32>,
}

impl RateLimitConfig {
    /// Whether both windows are unlimited.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.per_minute.is_none() && self.per_day.is_none()
    }
}

/// Status of one window after a check.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WindowStatus {
    /// Configured cap for the window.
    pub limit: u32,

    /// Requests remaining in the window after this request.
    pub remaining: u32,

    /// Unix timestamp when the window resets.
    pub reset_epoch: i64,

    /// Whether this request crossed the cap.
    pub exceeded: bool,
}

/// Rate-limit snapshot returned alongside validation outcomes.
///
/// Carries per-window limit/remaining/reset so callers can populate
/// standard rate-limit response headers and a retry-after hint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitSnapshot {
    /// Per-minute window status, if that window is configured.
    pub minute: Option<WindowStatus>,

    /// Per-day window status, if that window is configured.
    pub day: Option<WindowStatus>,

    /// Which window was exceeded; the minute window takes priority when
    /// both are.
    pub exceeded_window: Option<Window>,
}

impl RateLimitSnapshot {
    /// Whether either window was exceeded.
    #[must_use]
    pub const fn is_exceeded(&self) -> bool {
        self.exceeded_window.is_some()
    }

    /// The status of the exceeded window, if any.
    #[must_use]
    pub const fn exceeded_status(&self) -> Option<WindowStatus> {
        match self.exceeded_window {
            Some(Window::Minute) => self.minute,
            Some(Window::Day) => self.day,
            None => None,
        }
    }

    /// Seconds until the exceeded window resets, for client backoff.
    #[must_use]
    pub fn retry_after_secs(&self, now_epoch: i64) -> Option<i64> {
        self.exceeded_status()
            .map(|status| (status.reset_epoch - now_epoch).max(0))
    }
}

/// Fixed-window rate limiter over an atomic counter store.
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a limiter over the given counter store.
    #[must_use]
    pub fn new(counters: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { counters, config }
    }

    /// Check and consume one slot in every configured window.
    ///
    /// Returns `None` when both windows are unlimited (check skipped).
    pub async fn check_and_increment(&self, principal_id: &PrincipalId) -> Option<RateLimitSnapshot> {
        if self.config.is_unlimited() {
            return None;
        }

        let minute = match self.config.per_minute {
            Some(limit) => Some(self.check_window(principal_id, Window::Minute, limit).await),
            None => None,
        };
        let day = match self.config.per_day {
            Some(limit) => Some(self.check_window(principal_id, Window::Day, limit).await),
            None => None,
        };

        let exceeded_window = if minute.is_some_and(|w| w.exceeded) {
            Some(Window::Minute)
        } else if day.is_some_and(|w| w.exceeded) {
            Some(Window::Day)
        } else {
            None
        };

        tracing::debug!(
            principal_id = %principal_id,
            minute = ?minute,
            day = ?day,
            exceeded = exceeded_window.is_some(),
            "Rate limit check"
        );

        Some(RateLimitSnapshot {
            minute,
            day,
            exceeded_window,
        })
    }

    async fn check_window(
        &self,
        principal_id: &PrincipalId,
        window: Window,
        limit: u32,
    ) -> WindowStatus {
        let key = format!("rate_limit:{principal_id}:{}", window.label());
        let now_epoch = chrono::Utc::now().timestamp();

        match self.counters.incr_with_window(&key, window.secs()).await {
            Ok(sample) => {
                let ttl = i64::try_from(sample.ttl_secs)
                    .unwrap_or_else(|_| i64::try_from(window.secs()).unwrap_or(i64::MAX));
                WindowStatus {
                    limit,
                    remaining: u32::try_from(u64::from(limit).saturating_sub(sample.count))
                        .unwrap_or(0),
                    reset_epoch: now_epoch + ttl,
                    exceeded: sample.count > u64::from(limit),
                }
            }
            Err(e) => {
                // Fail open: treat the request as allowed rather than deny
                // every caller while the counter store is down.
                tracing::warn!(
                    principal_id = %principal_id,
                    window = window.label(),
                    error = %e,
                    fail_open = true,
                    "Rate limit check failed; allowing request"
                );
                WindowStatus {
                    limit,
                    remaining: limit.saturating_sub(1),
                    reset_epoch: now_epoch + i64::try_from(window.secs()).unwrap_or(i64::MAX),
                    exceeded: false,
                }
            }
        }
    }
}
