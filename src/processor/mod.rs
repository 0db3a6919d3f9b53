//! Message finalization policy.
//!
//! The processor decides what happens to a message around its handler run:
//! whether it is worth starting at all, and whether the outcome means delete,
//! release for retry, or poison. The listener only sequences the calls; all
//! policy lives here so hosts can substitute their own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{QueueClient, QueueClientError};
use crate::config::ListenerConfig;
use crate::constants::POISON_QUEUE_SUFFIX;
use crate::models::{FunctionResult, QueueMessage};

/// Notification sink fired after a message lands in the poison queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PoisonEventSink: Send + Sync {
    async fn message_poisoned(&self, poison_queue: &str, message: &QueueMessage);
}

/// Per-queue processing policy consulted by the listener.
///
/// `batch_size`, `new_batch_threshold` and `max_polling_interval` parameterize
/// the poll loop; `begin_processing` and `complete_processing` bracket every
/// handler invocation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Messages requested per poll.
    fn batch_size(&self) -> usize;

    /// In-flight count at or below which the next poll is issued.
    fn new_batch_threshold(&self) -> usize;

    /// Upper bound for the poll backoff delay.
    fn max_polling_interval(&self) -> Duration;

    /// Whether `message` should be processed. Returning `false` skips the
    /// handler entirely; the processor owns whatever cleanup that implies.
    async fn begin_processing(&self, message: &QueueMessage) -> bool;

    /// Finalizes `message` according to `result`. Runs under the
    /// graceful-completion scope: `cancel` fires only on hard shutdown.
    async fn complete_processing(
        &self,
        message: &QueueMessage,
        result: &FunctionResult,
        cancel: &CancellationToken,
    ) -> Result<(), QueueClientError>;
}

/// Stock policy: delete on success, release for redelivery on failure, and
/// move the message to `<queue>-poison` once its retry budget is spent.
pub struct DefaultMessageProcessor {
    client: Arc<dyn QueueClient>,
    queue_name: String,
    poison_queue: String,
    batch_size: usize,
    new_batch_threshold: usize,
    max_polling_interval: Duration,
    max_dequeue_count: u32,
    poison_sink: Option<Arc<dyn PoisonEventSink>>,
}

impl DefaultMessageProcessor {
    pub fn new(client: Arc<dyn QueueClient>, queue_name: &str, config: &ListenerConfig) -> Self {
        Self {
            client,
            queue_name: queue_name.to_string(),
            poison_queue: format!("{}{}", queue_name.to_lowercase(), POISON_QUEUE_SUFFIX),
            batch_size: config.batch_size,
            new_batch_threshold: config.effective_new_batch_threshold(),
            max_polling_interval: config.max_polling_interval,
            max_dequeue_count: config.max_dequeue_count,
            poison_sink: None,
        }
    }

    /// Attaches a sink notified after each successful poison insert.
    pub fn with_poison_sink(mut self, sink: Arc<dyn PoisonEventSink>) -> Self {
        self.poison_sink = Some(sink);
        self
    }

    /// Name of the sibling queue receiving exhausted messages.
    pub fn poison_queue_name(&self) -> &str {
        &self.poison_queue
    }

    /// Copies `message` to the poison queue, deletes the original, and fires
    /// the poison event.
    async fn poison(&self, message: &QueueMessage) -> Result<(), QueueClientError> {
        self.client
            .add_message(&self.poison_queue, &message.body)
            .await?;
        self.client.delete_message(message).await?;
        warn!(
            queue = %self.queue_name,
            poison_queue = %self.poison_queue,
            message_id = %message.id,
            dequeue_count = message.dequeue_count,
            "Message exhausted its retry budget and was moved to the poison queue"
        );
        if let Some(sink) = &self.poison_sink {
            sink.message_poisoned(&self.poison_queue, message).await;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageProcessor for DefaultMessageProcessor {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn new_batch_threshold(&self) -> usize {
        self.new_batch_threshold
    }

    fn max_polling_interval(&self) -> Duration {
        self.max_polling_interval
    }

    async fn begin_processing(&self, message: &QueueMessage) -> bool {
        // A message already past its budget (a crash between poison insert
        // and delete, or a racing consumer) is poisoned without running the
        // handler again.
        if message.dequeue_count > self.max_dequeue_count {
            if let Err(error) = self.poison(message).await {
                warn!(
                    queue = %self.queue_name,
                    message_id = %message.id,
                    error = %error,
                    "Failed to poison over-delivered message; it will be redelivered"
                );
            }
            return false;
        }
        true
    }

    async fn complete_processing(
        &self,
        message: &QueueMessage,
        result: &FunctionResult,
        cancel: &CancellationToken,
    ) -> Result<(), QueueClientError> {
        if cancel.is_cancelled() {
            return Err(QueueClientError::Cancelled);
        }

        let finalize = async {
            if result.succeeded {
                self.client.delete_message(message).await
            } else if message.dequeue_count >= self.max_dequeue_count {
                self.poison(message).await
            } else {
                debug!(
                    queue = %self.queue_name,
                    message_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Handler failed, releasing message for retry"
                );
                self.client.update_visibility(message, Duration::ZERO).await
            }
        };

        tokio::select! {
            finalized = finalize => finalized,
            _ = cancel.cancelled() => Err(QueueClientError::Cancelled),
        }
    }
}
