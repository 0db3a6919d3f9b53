//! Queue-trigger listener.
//!
//! This crate drains a durable cloud queue and drives user message handlers:
//! an adaptive poll loop with randomized exponential backoff and
//! wake-on-notify, a concurrency gate over the in-flight dispatch set,
//! per-message visibility renewal that races handler duration, and a scale
//! advisor over a sliding window of queue metrics.
//!
//! The concrete queue SDK stays outside: hosts implement [`QueueClient`] for
//! their storage service and hand the listener a [`MessageHandler`] plus a
//! [`MessageProcessor`] policy (or the stock [`DefaultMessageProcessor`]).
//!
//! ```ignore
//! let client: Arc<dyn QueueClient> = Arc::new(MyStorageQueue::connect(url).await?);
//! let config = ListenerConfig::from_env();
//! let processor = Arc::new(DefaultMessageProcessor::new(client.clone(), "orders", &config));
//! let mut listener = QueueListener::new(
//!     "process-orders", "orders", client, processor, handler, config,
//! );
//! listener.start()?;
//! // ... later
//! listener.stop(shutdown_token).await?;
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod listener;
pub mod logging;
pub mod models;
pub mod processor;
pub mod scale;

pub use client::{QueueAttributes, QueueClient, QueueClientError};
pub use config::{ConfigError, ListenerConfig};
pub use listener::{
    DelayOutcome, ListenerDescriptor, ListenerError, MessageHandler, NotifiableDelay,
    QueueListener, RandomizedExponentialBackoff, SharedQueueWatcher, TracingErrorSink,
    UnhandledErrorSink, WakeSignal, WatcherPoisonSink,
};
pub use models::{FunctionResult, QueueMessage};
pub use processor::{DefaultMessageProcessor, MessageProcessor, PoisonEventSink};
pub use scale::{scale_vote, QueueMetricSample, ScaleMonitor, ScaleVote};
