//! Queue-trigger listener.
//!
//! A [`QueueListener`] drains one queue: it polls adaptively, dispatches each
//! message to the host's handler with a visibility renewer alongside, and
//! finalizes messages through the configured [`MessageProcessor`]. Two
//! independent cancellation scopes separate "stop polling" from "abandon
//! in-progress finalization": an ordinary stop cancels only the first, so
//! deletes and poison inserts still run to completion.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::{QueueClient, QueueClientError};
use crate::config::{ConfigError, ListenerConfig};
use crate::constants::QUEUE_POLLING_INTERVAL_MINIMUM;
use crate::models::{FunctionResult, QueueMessage};
use crate::processor::MessageProcessor;
use crate::scale::ScaleMonitor;

pub mod backoff;
pub mod delay;
pub mod watcher;

mod dispatcher;
mod poll_loop;
mod visibility;

pub use backoff::RandomizedExponentialBackoff;
pub use delay::{DelayOutcome, NotifiableDelay, WakeSignal};
pub use watcher::{SharedQueueWatcher, WatcherPoisonSink};

use dispatcher::Dispatcher;
use poll_loop::PollLoop;

/// Errors surfaced by the listener's public surface.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listener was disposed; no further calls are valid.
    #[error("listener has been disposed")]
    Disposed,

    /// `stop` was called without a prior successful `start`.
    #[error("listener is not running")]
    NotStarted,

    /// `start` was called twice.
    #[error("listener already started")]
    AlreadyStarted,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A non-transient storage error faulted the poll loop.
    #[error("queue storage error: {0}")]
    Storage(#[from] QueueClientError),

    /// The poll task itself failed to join.
    #[error("poll task failed: {0}")]
    PollTask(String),
}

/// User-supplied message handler.
///
/// Failures are reported through the returned [`FunctionResult`], never by
/// panicking; the cancellation token fires when the listener stops polling
/// and a cooperative handler should wind down promptly.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn execute(&self, message: &QueueMessage, cancel: CancellationToken) -> FunctionResult;
}

/// Receives failures that escape a dispatch: completion errors that are not
/// cancellation, and handler panics. Reports happen at the point of
/// occurrence; dispatch tasks are detached and never awaited for a result.
#[cfg_attr(test, mockall::automock)]
pub trait UnhandledErrorSink: Send + Sync {
    fn report(&self, listener_id: &str, detail: &str);
}

/// Default sink: a structured error event.
#[derive(Debug, Default)]
pub struct TracingErrorSink;

impl UnhandledErrorSink for TracingErrorSink {
    fn report(&self, listener_id: &str, detail: &str) {
        error!(listener = %listener_id, detail = %detail, "Unhandled listener error");
    }
}

/// Identity of one queue trigger binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerDescriptor {
    id: String,
}

impl ListenerDescriptor {
    pub fn new(function_id: &str, queue_name: &str) -> Self {
        Self {
            id: format!("{function_id}-queuetrigger-{queue_name}").to_lowercase(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for ListenerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Listener for one queue. See the module docs for the lifecycle contract;
/// `start`/`stop` are not reentrant and a supervisor owns the instance.
pub struct QueueListener {
    descriptor: ListenerDescriptor,
    queue_name: String,
    client: Arc<dyn QueueClient>,
    processor: Arc<dyn MessageProcessor>,
    handler: Arc<dyn MessageHandler>,
    error_sink: Arc<dyn UnhandledErrorSink>,
    config: ListenerConfig,
    scale_monitor: Arc<ScaleMonitor>,
    delay: Option<NotifiableDelay>,
    wake: WakeSignal,
    poll_cancel: CancellationToken,
    graceful_cancel: CancellationToken,
    poll_task: Option<JoinHandle<Result<(), ListenerError>>>,
    disposed: bool,
}

impl QueueListener {
    pub fn new(
        function_id: &str,
        queue_name: &str,
        client: Arc<dyn QueueClient>,
        processor: Arc<dyn MessageProcessor>,
        handler: Arc<dyn MessageHandler>,
        config: ListenerConfig,
    ) -> Self {
        let delay = NotifiableDelay::new();
        let wake = delay.signal();
        let scale_monitor = Arc::new(ScaleMonitor::new(
            Arc::clone(&client),
            queue_name,
            config.scale_sample_window,
        ));
        Self {
            descriptor: ListenerDescriptor::new(function_id, queue_name),
            queue_name: queue_name.to_string(),
            client,
            processor,
            handler,
            error_sink: Arc::new(TracingErrorSink),
            config,
            scale_monitor,
            delay: Some(delay),
            wake,
            poll_cancel: CancellationToken::new(),
            graceful_cancel: CancellationToken::new(),
            poll_task: None,
            disposed: false,
        }
    }

    /// Replaces the default tracing-backed unhandled-error sink.
    pub fn with_error_sink(mut self, sink: Arc<dyn UnhandledErrorSink>) -> Self {
        self.error_sink = sink;
        self
    }

    pub fn descriptor(&self) -> &ListenerDescriptor {
        &self.descriptor
    }

    /// Signal other components use to wake this listener; hand it to a
    /// [`SharedQueueWatcher`] registration.
    pub fn wake_signal(&self) -> WakeSignal {
        self.wake.clone()
    }

    /// Scale advisor for this queue, queryable while the listener runs.
    pub fn scale_monitor(&self) -> Arc<ScaleMonitor> {
        Arc::clone(&self.scale_monitor)
    }

    fn ensure_not_disposed(&self) -> Result<(), ListenerError> {
        if self.disposed {
            return Err(ListenerError::Disposed);
        }
        Ok(())
    }

    /// Launches the poll loop. The first poll happens immediately.
    pub fn start(&mut self) -> Result<(), ListenerError> {
        self.ensure_not_disposed()?;
        if self.poll_task.is_some() {
            return Err(ListenerError::AlreadyStarted);
        }
        self.config.validate()?;
        let delay = self.delay.take().ok_or(ListenerError::AlreadyStarted)?;

        let backoff = RandomizedExponentialBackoff::new(
            QUEUE_POLLING_INTERVAL_MINIMUM,
            self.processor.max_polling_interval(),
        );
        let dispatcher = Arc::new(Dispatcher {
            client: Arc::clone(&self.client),
            processor: Arc::clone(&self.processor),
            handler: Arc::clone(&self.handler),
            error_sink: Arc::clone(&self.error_sink),
            descriptor_id: self.descriptor.id().to_string(),
            visibility_timeout: self.config.visibility_timeout,
            renewal_floor: self.config.minimum_visibility_renewal_interval,
        });
        let poll_loop = PollLoop {
            client: Arc::clone(&self.client),
            dispatcher,
            delay,
            backoff,
            batch_size: self.processor.batch_size(),
            new_batch_threshold: self.processor.new_batch_threshold(),
            poll_cancel: self.poll_cancel.clone(),
            graceful_cancel: self.graceful_cancel.clone(),
            queue_name: self.queue_name.clone(),
        };

        info!(
            listener = %self.descriptor,
            queue = %self.queue_name,
            batch_size = self.processor.batch_size(),
            new_batch_threshold = self.processor.new_batch_threshold(),
            visibility_timeout_secs = self.config.visibility_timeout.as_secs(),
            "Starting queue listener"
        );
        self.poll_task = Some(tokio::spawn(poll_loop.run()));
        Ok(())
    }

    /// Wakes the listener out of any backoff delay so the next poll happens
    /// promptly. Edge-triggered; a notify between polls is not retained.
    pub fn notify(&self) -> Result<(), ListenerError> {
        self.ensure_not_disposed()?;
        self.wake.notify();
        Ok(())
    }

    /// Asks the poll loop to exit its current wait. Does not await in-flight
    /// dispatches; pair with [`stop`](Self::stop) for an orderly shutdown.
    pub fn cancel(&self) -> Result<(), ListenerError> {
        self.ensure_not_disposed()?;
        self.poll_cancel.cancel();
        Ok(())
    }

    /// Stops polling, lets every in-flight dispatch finish naturally, then
    /// awaits the poll task. If `external_cancel` fires while draining, the
    /// graceful-completion scope is cancelled too and remaining message
    /// finalization aborts.
    pub async fn stop(&mut self, external_cancel: CancellationToken) -> Result<(), ListenerError> {
        self.ensure_not_disposed()?;
        let Some(mut task) = self.poll_task.take() else {
            return Err(ListenerError::NotStarted);
        };

        self.poll_cancel.cancel();

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = external_cancel.cancelled() => {
                warn!(
                    listener = %self.descriptor,
                    "Stop cancelled externally, aborting graceful completion"
                );
                self.graceful_cancel.cancel();
                (&mut task).await
            }
        };

        match joined {
            Ok(poll_result) => {
                info!(listener = %self.descriptor, "Queue listener stopped");
                poll_result
            }
            Err(join_error) => Err(ListenerError::PollTask(join_error.to_string())),
        }
    }

    /// Tears down both cancellation scopes and abandons the poll task if it
    /// is still running. Every subsequent public call fails with
    /// [`ListenerError::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.poll_cancel.cancel();
        self.graceful_cancel.cancel();
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        info!(listener = %self.descriptor, "Queue listener disposed");
    }
}
