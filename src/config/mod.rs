//! Listener configuration.
//!
//! # Environment Variables
//!
//! `ListenerConfig::from_env` reads these overrides on top of the defaults:
//! - `QUEUE_TRIGGER_BATCH_SIZE`: messages requested per poll
//! - `QUEUE_TRIGGER_MAX_DEQUEUE_COUNT`: retry budget before poisoning
//! - `QUEUE_TRIGGER_NEW_BATCH_THRESHOLD`: in-flight gate for the next poll
//! - `QUEUE_TRIGGER_MAX_POLLING_INTERVAL_SECS`: backoff upper bound
//! - `QUEUE_TRIGGER_VISIBILITY_TIMEOUT_SECS`: initial invisibility window

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_DEQUEUE_COUNT, DEFAULT_MAX_POLLING_INTERVAL,
    DEFAULT_MINIMUM_VISIBILITY_RENEWAL_INTERVAL, DEFAULT_VISIBILITY_TIMEOUT,
    QUEUE_POLLING_INTERVAL_MINIMUM, TARGET_SCALE_SAMPLE_WINDOW,
};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch_size must be greater than zero")]
    InvalidBatchSize,

    #[error("max_dequeue_count must be greater than zero")]
    InvalidMaxDequeueCount,

    #[error("max_polling_interval must be at least {min_ms}ms")]
    PollingIntervalTooSmall { min_ms: u128 },

    #[error("visibility_timeout must be greater than zero")]
    InvalidVisibilityTimeout,
}

/// Tunables for one queue listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Messages requested per poll. Must be greater than zero.
    pub batch_size: usize,
    /// Deliveries a message gets before it is routed to the poison queue.
    pub max_dequeue_count: u32,
    /// In-flight count at or below which the next poll is issued.
    /// Defaults to `batch_size / 2` when unset.
    pub new_batch_threshold: Option<usize>,
    /// Upper bound for the randomized exponential poll backoff.
    pub max_polling_interval: Duration,
    /// Initial invisibility window granted to dequeued messages.
    pub visibility_timeout: Duration,
    /// Floor for the accelerated renewal cadence after a failed extension.
    pub minimum_visibility_renewal_interval: Duration,
    /// Number of recent metric samples a scale decision considers.
    pub scale_sample_window: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_dequeue_count: DEFAULT_MAX_DEQUEUE_COUNT,
            new_batch_threshold: None,
            max_polling_interval: DEFAULT_MAX_POLLING_INTERVAL,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            minimum_visibility_renewal_interval: DEFAULT_MINIMUM_VISIBILITY_RENEWAL_INTERVAL,
            scale_sample_window: TARGET_SCALE_SAMPLE_WINDOW,
        }
    }
}

impl ListenerConfig {
    /// Builds a config from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(batch_size) = read_env("QUEUE_TRIGGER_BATCH_SIZE") {
            config.batch_size = batch_size;
        }
        if let Some(max_dequeue) = read_env("QUEUE_TRIGGER_MAX_DEQUEUE_COUNT") {
            config.max_dequeue_count = max_dequeue;
        }
        if let Some(threshold) = read_env("QUEUE_TRIGGER_NEW_BATCH_THRESHOLD") {
            config.new_batch_threshold = Some(threshold);
        }
        if let Some(secs) = read_env("QUEUE_TRIGGER_MAX_POLLING_INTERVAL_SECS") {
            config.max_polling_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env("QUEUE_TRIGGER_VISIBILITY_TIMEOUT_SECS") {
            config.visibility_timeout = Duration::from_secs(secs);
        }
        config
    }

    /// The in-flight gate for issuing the next poll.
    pub fn effective_new_batch_threshold(&self) -> usize {
        self.new_batch_threshold.unwrap_or(self.batch_size / 2)
    }

    /// Checks the option constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.max_dequeue_count == 0 {
            return Err(ConfigError::InvalidMaxDequeueCount);
        }
        if self.max_polling_interval < QUEUE_POLLING_INTERVAL_MINIMUM {
            return Err(ConfigError::PollingIntervalTooSmall {
                min_ms: QUEUE_POLLING_INTERVAL_MINIMUM.as_millis(),
            });
        }
        if self.visibility_timeout.is_zero() {
            return Err(ConfigError::InvalidVisibilityTimeout);
        }
        Ok(())
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse().ok())
}
