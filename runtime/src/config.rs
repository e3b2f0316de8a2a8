//! Runtime configuration loaded from environment variables.
//!
//! | variable | default |
//! |---|---|
//! | `INVENTORY_RESERVATION_TTL_SECS` | 900 |
//! | `INVENTORY_STORAGE_TIMEOUT_MS` | 2000 |
//! | `INVENTORY_MAX_RETRIES` | 5 |
//! | `INVENTORY_RETRY_INITIAL_DELAY_MS` | 5 |
//! | `INVENTORY_RETRY_MAX_DELAY_MS` | 200 |
//! | `INVENTORY_SWEEP_INTERVAL_SECS` | 5 |
//! | `INVENTORY_SWEEP_BATCH_SIZE` | 100 |
//! | `INVENTORY_LOW_STOCK_THRESHOLD` | 5 |
//!
//! Unset or unparsable values fall back to the default.

use crate::retry::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the inventory runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryConfig {
    /// Hold duration for new reservations.
    pub reservation_ttl: Duration,
    /// Deadline for every storage call.
    pub storage_timeout: Duration,
    /// Retries after a version conflict or timeout.
    pub max_retries: usize,
    /// First backoff delay.
    pub retry_initial_delay: Duration,
    /// Backoff cap.
    pub retry_max_delay: Duration,
    /// Interval between sweeps of expired reservations.
    pub sweep_interval: Duration,
    /// Reservations expired per sweep batch.
    pub sweep_batch_size: usize,
    /// Available count at or below which a variant is `low_stock`.
    pub low_stock_threshold: i64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::from_secs(15 * 60),
            storage_timeout: Duration::from_millis(2_000),
            max_retries: 5,
            retry_initial_delay: Duration::from_millis(5),
            retry_max_delay: Duration::from_millis(200),
            sweep_interval: Duration::from_secs(5),
            sweep_batch_size: 100,
            low_stock_threshold: 5,
        }
    }
}

impl InventoryConfig {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            reservation_ttl: get("INVENTORY_RESERVATION_TTL_SECS")
                .map_or(defaults.reservation_ttl, Duration::from_secs),
            storage_timeout: get("INVENTORY_STORAGE_TIMEOUT_MS")
                .map_or(defaults.storage_timeout, Duration::from_millis),
            max_retries: parse_or(&lookup, "INVENTORY_MAX_RETRIES", defaults.max_retries),
            retry_initial_delay: get("INVENTORY_RETRY_INITIAL_DELAY_MS")
                .map_or(defaults.retry_initial_delay, Duration::from_millis),
            retry_max_delay: get("INVENTORY_RETRY_MAX_DELAY_MS")
                .map_or(defaults.retry_max_delay, Duration::from_millis),
            sweep_interval: get("INVENTORY_SWEEP_INTERVAL_SECS")
                .filter(|&secs| secs > 0)
                .map_or(defaults.sweep_interval, Duration::from_secs),
            sweep_batch_size: parse_or(&lookup, "INVENTORY_SWEEP_BATCH_SIZE", defaults.sweep_batch_size)
                .max(1),
            low_stock_threshold: parse_or(
                &lookup,
                "INVENTORY_LOW_STOCK_THRESHOLD",
                defaults.low_stock_threshold,
            ),
        }
    }

    /// Retry policy built from the retry settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.max_retries)
            .initial_delay(self.retry_initial_delay)
            .max_delay(self.retry_max_delay)
            .build()
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
