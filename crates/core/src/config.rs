//! Tracker configuration — queue limits, flush cadence, and retry policy.
//! Loaded from environment variables with the prefix `PULSE__`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Periodic flush cadence.
    pub flush_interval_secs: u64,
    /// Queue depth that triggers an immediate flush.
    pub flush_threshold: usize,
    pub max_batch_count: usize,
    pub max_batch_bytes: usize,
    pub max_queue_entries: usize,
    pub max_queue_bytes: usize,
    pub network_timeout_ms: u64,
    pub enable_location_tracking: bool,
    /// Minimum interval between location refresh requests.
    pub location_update_interval_secs: u64,
    /// Journal file for durable queueing. `None` keeps the queue in memory.
    pub journal_path: Option<PathBuf>,
    pub retry: RetryPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 10,
            flush_threshold: 20,
            max_batch_count: 50,
            max_batch_bytes: 256 * 1024,
            max_queue_entries: 10_000,
            max_queue_bytes: 8 * 1024 * 1024,
            network_timeout_ms: 10_000,
            enable_location_tracking: false,
            location_update_interval_secs: 60,
            journal_path: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables (`PULSE__` prefix,
    /// `__` separator). Missing fields fall back to defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("PULSE")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    pub fn location_update_interval(&self) -> Duration {
        Duration::from_secs(self.location_update_interval_secs)
    }
}

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total delivery attempts for one batch before it is dropped.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Randomize each delay by ±25% to spread retries out.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Compute the backoff duration for a given attempt (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_backoff_ms as f64);

        let final_ms = if self.jitter {
            capped_ms * (0.75 + rand::random::<f64>() * 0.5)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms as u64)
    }
}
