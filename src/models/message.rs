//! Queue message record and handler outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message dequeued from the queue service.
///
/// The pop receipt authorizes visibility updates and deletion for the current
/// delivery only; the queue service invalidates it once the message becomes
/// visible again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Service-assigned message id.
    pub id: String,
    /// Number of times this message has been delivered, including the
    /// current delivery.
    pub dequeue_count: u32,
    /// When the message was first inserted into the queue.
    pub inserted_at: DateTime<Utc>,
    /// Opaque payload.
    pub body: String,
    /// Token authorizing visibility updates and deletion for this delivery.
    pub pop_receipt: String,
}

impl QueueMessage {
    /// Elapsed wall-clock time since the message was inserted.
    ///
    /// Returns zero when clocks disagree and the insertion timestamp sits in
    /// the future.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.inserted_at).to_std().unwrap_or_default()
    }
}

/// Outcome of one handler invocation for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResult {
    /// Whether the handler completed successfully.
    pub succeeded: bool,
    /// Handler-reported failure detail, if any.
    pub error: Option<String>,
}

impl FunctionResult {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            error: Some(error.into()),
        }
    }
}
