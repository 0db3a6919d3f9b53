//! Message lifecycle constants.

use std::time::Duration;

/// Default invisibility window granted to a dequeued message.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(600);

/// Floor for the accelerated renewal cadence after a failed extension.
pub const DEFAULT_MINIMUM_VISIBILITY_RENEWAL_INTERVAL: Duration = Duration::from_secs(60);

/// Default retry budget before a message is routed to the poison queue.
pub const DEFAULT_MAX_DEQUEUE_COUNT: u32 = 5;

/// Suffix appended to a queue name to derive its poison sibling.
pub const POISON_QUEUE_SUFFIX: &str = "-poison";
