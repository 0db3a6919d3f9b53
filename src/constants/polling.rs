//! Polling cadence constants.

use std::time::Duration;

/// Smallest delay the backoff strategy will ever produce between polls.
pub const QUEUE_POLLING_INTERVAL_MINIMUM: Duration = Duration::from_millis(100);

/// Default upper bound for the randomized exponential poll backoff.
pub const DEFAULT_MAX_POLLING_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of messages requested per poll.
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Wall-clock watchdog for a single message fetch. Exceeding it produces a
/// diagnostic; the fetch itself keeps running until it resolves or the poll
/// scope is cancelled.
pub const GET_MESSAGES_WATCHDOG_INTERVAL: Duration = Duration::from_secs(120);
