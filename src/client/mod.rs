//! Queue service abstraction layer.
//!
//! The listener talks to its queue exclusively through [`QueueClient`], so a
//! host can plug in any storage SDK (or an in-memory fake in tests) without
//! the polling, dispatch or scale machinery knowing the difference.

use std::time::Duration;

use async_trait::async_trait;

use crate::models::QueueMessage;

pub mod errors;

pub use errors::QueueClientError;

/// Point-in-time attributes reported by the queue service.
#[derive(Debug, Clone, Default)]
pub struct QueueAttributes {
    /// Approximate number of messages in the queue, visible or not. Queue
    /// services report this lazily; it can be stale, especially near zero.
    pub approximate_length: u64,
}

/// Operations the listener needs from a queue service, bound to one queue.
///
/// `get_messages` may return fewer entries than requested, and individual
/// entries may be `None` when the backing SDK reports sparse batches; callers
/// skip those. All operations are expected to honor cooperative cancellation
/// by returning [`QueueClientError::Cancelled`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Whether the queue currently exists.
    async fn exists(&self) -> Result<bool, QueueClientError>;

    /// Dequeues up to `count` messages, hiding each for `visibility`.
    async fn get_messages(
        &self,
        count: usize,
        visibility: Duration,
    ) -> Result<Vec<Option<QueueMessage>>, QueueClientError>;

    /// Re-hides `message` for `visibility` from now, using its pop receipt.
    /// A zero `visibility` releases the message for immediate redelivery.
    async fn update_visibility(
        &self,
        message: &QueueMessage,
        visibility: Duration,
    ) -> Result<(), QueueClientError>;

    /// Deletes `message` using its pop receipt.
    async fn delete_message(&self, message: &QueueMessage) -> Result<(), QueueClientError>;

    /// Inserts a new message into a sibling queue under the same credentials.
    async fn add_message(&self, queue_name: &str, body: &str) -> Result<(), QueueClientError>;

    /// Fetches the queue's current attributes.
    async fn fetch_attributes(&self) -> Result<QueueAttributes, QueueClientError>;

    /// Returns the oldest visible message without dequeuing it.
    async fn peek(&self) -> Result<Option<QueueMessage>, QueueClientError>;
}
