//! Worker configuration.

use meterd_core::PricingTable;
use meterd_engine::RateLimitConfig;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Path to the `RocksDB` data directory (default: "/data/meterd").
    pub data_dir: String,

    /// Per-queue prefetch bound (default: 10).
    pub prefetch: usize,

    /// Rate-limit caps; unset variables leave a window unlimited.
    pub rate_limit: RateLimitConfig,

    /// Path to a JSON pricing table (optional).
    pub pricing_path: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("METERD_DATA_DIR")
                .unwrap_or_else(|_| "/data/meterd".to_string()),
            prefetch: std::env::var("METERD_PREFETCH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            rate_limit: RateLimitConfig {
                per_minute: std::env::var("METERD_RATE_LIMIT_PER_MINUTE")
                    .ok()
                    .and_then(|v| v.parse().ok()),
                per_day: std::env::var("METERD_RATE_LIMIT_PER_DAY")
                    .ok()
                    .and_then(|v| v.parse().ok()),
            },
            pricing_path: std::env::var("METERD_PRICING_PATH").ok(),
        }
    }

    /// Load the pricing table from the configured path.
    ///
    /// Falls back to an empty table (every feature unpriced, so every
    /// validation denies) with a warning when no path is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured file cannot be read or parsed.
    pub fn load_pricing(&self) -> Result<PricingTable, Box<dyn std::error::Error>> {
        match &self.pricing_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                let table = serde_json::from_str(&raw)?;
                tracing::info!(path = %path, "Pricing table loaded");
                Ok(table)
            }
            None => {
                tracing::warn!(
                    "METERD_PRICING_PATH not set; starting with an empty pricing table"
                );
                Ok(PricingTable::new())
            }
        }
    }
}
