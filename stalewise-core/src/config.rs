//! Cache policy configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default dedupe interval between two revalidations of the same key.
pub const DEFAULT_DEDUPE_INTERVAL: Duration = Duration::from_millis(2000);

/// Poll intervals below this are clamped to avoid a busy loop.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the fetch coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Requests for one key within this interval are deduped.
    pub dedupe_interval: Duration,
    /// Lower bound applied to every `refresh_interval`.
    pub min_refresh_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dedupe_interval: DEFAULT_DEDUPE_INTERVAL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dedupe interval.
    pub fn with_dedupe_interval(mut self, interval: Duration) -> Self {
        self.dedupe_interval = interval;
        self
    }

    /// Set the minimum poll interval.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Dedupe interval as a signed duration for timestamp arithmetic.
    ///
    /// Saturates for intervals chrono cannot represent.
    pub fn dedupe_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.dedupe_interval).unwrap_or(chrono::Duration::MAX)
    }

    /// Clamp a requested poll interval to the configured floor.
    pub fn refresh_interval(&self, requested: Duration) -> Duration {
        requested.max(self.min_refresh_interval)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_refresh_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "min_refresh_interval".to_string(),
                value: "0ms".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}
