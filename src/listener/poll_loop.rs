//! Adaptive queue polling.
//!
//! A single long-lived task drives the listener: probe queue existence, fetch
//! a batch, fan the batch out to dispatch tasks, then wait. The wait is
//! either a drain of the in-flight set down to the new-batch threshold (work
//! was found) or a notifiable backoff delay (idle or transient failure). The
//! in-flight set is touched only by this task, which keeps it lock-free.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::{QueueClient, QueueClientError};
use crate::constants::GET_MESSAGES_WATCHDOG_INTERVAL;
use crate::listener::backoff::RandomizedExponentialBackoff;
use crate::listener::delay::{DelayOutcome, NotifiableDelay};
use crate::listener::dispatcher::Dispatcher;
use crate::listener::ListenerError;
use crate::models::QueueMessage;

/// What the poll task knows about the target queue's existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExistenceState {
    /// Not probed yet, or invalidated by a storage error.
    Unknown,
    /// The last probe saw the queue.
    Exists,
    /// The last probe did not see the queue, or errored.
    MissingOrError,
}

pub(crate) struct PollLoop {
    pub(crate) client: Arc<dyn QueueClient>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) delay: NotifiableDelay,
    pub(crate) backoff: RandomizedExponentialBackoff,
    pub(crate) batch_size: usize,
    pub(crate) new_batch_threshold: usize,
    pub(crate) poll_cancel: CancellationToken,
    pub(crate) graceful_cancel: CancellationToken,
    pub(crate) queue_name: String,
}

impl PollLoop {
    pub(crate) async fn run(mut self) -> Result<(), ListenerError> {
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut existence = ExistenceState::Unknown;
        let mut found_message_since_last_delay = false;

        let run_result = loop {
            // Reap dispatch tasks that finished while we were busy.
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(join_error) = joined {
                    warn!(
                        queue = %self.queue_name,
                        error = %join_error,
                        "In-flight dispatch task failed"
                    );
                }
            }

            if self.poll_cancel.is_cancelled() {
                break Ok(());
            }

            let armed = self.delay.arm();

            match self.poll_once(&mut existence, &mut in_flight).await {
                Ok(true) => {
                    found_message_since_last_delay = true;
                    self.wait_for_capacity(&mut in_flight).await;
                }
                Ok(false) => {
                    let succeeded = std::mem::take(&mut found_message_since_last_delay);
                    let wait = self.backoff.next(succeeded);
                    debug!(
                        queue = %self.queue_name,
                        delay_ms = wait.as_millis() as u64,
                        "Queue idle, backing off before next poll"
                    );
                    match self.delay.wait(wait, armed, &self.poll_cancel).await {
                        DelayOutcome::Cancelled => break Ok(()),
                        DelayOutcome::Notified => {
                            debug!(queue = %self.queue_name, "Woken by enqueue notification");
                        }
                        DelayOutcome::Elapsed => {}
                    }
                }
                Err(storage_error) => {
                    // Whatever happened, the next cycle re-probes the queue.
                    existence = ExistenceState::Unknown;

                    if storage_error.is_cancelled() {
                        break Ok(());
                    }
                    if !storage_error.is_transient() {
                        error!(
                            queue = %self.queue_name,
                            error = %storage_error,
                            "Fatal queue storage error, stopping listener"
                        );
                        break Err(ListenerError::Storage(storage_error));
                    }

                    warn!(
                        queue = %self.queue_name,
                        error = %storage_error,
                        "Transient queue storage error, treating as empty poll"
                    );
                    let succeeded = std::mem::take(&mut found_message_since_last_delay);
                    let wait = self.backoff.next(succeeded);
                    if self.delay.wait(wait, armed, &self.poll_cancel).await
                        == DelayOutcome::Cancelled
                    {
                        break Ok(());
                    }
                }
            }
        };

        self.drain(&mut in_flight).await;
        run_result
    }

    /// One poll cycle: existence probe, batch fetch, dispatch fan-out.
    /// Returns whether the batch held at least one message.
    async fn poll_once(
        &mut self,
        existence: &mut ExistenceState,
        in_flight: &mut JoinSet<()>,
    ) -> Result<bool, QueueClientError> {
        if *existence != ExistenceState::Exists {
            let probed = tokio::select! {
                probed = self.client.exists() => probed,
                _ = self.poll_cancel.cancelled() => return Err(QueueClientError::Cancelled),
            };
            match probed {
                Ok(true) => *existence = ExistenceState::Exists,
                Ok(false) => {
                    *existence = ExistenceState::MissingOrError;
                    debug!(queue = %self.queue_name, "Queue does not exist yet");
                    return Ok(false);
                }
                Err(probe_error) if probe_error.is_cancelled() => return Err(probe_error),
                // A failed probe is never fatal; the next cycle re-probes.
                Err(probe_error) => {
                    *existence = ExistenceState::Unknown;
                    warn!(
                        queue = %self.queue_name,
                        error = %probe_error,
                        "Queue existence probe failed"
                    );
                    return Ok(false);
                }
            }
        }

        let client_request_id = Uuid::new_v4();
        let started = Instant::now();
        let batch = self.fetch_batch(client_request_id).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut dispatched = 0usize;
        for message in batch.into_iter().flatten() {
            self.spawn_dispatch(message, in_flight);
            dispatched += 1;
        }

        debug!(
            queue = %self.queue_name,
            client_request_id = %client_request_id,
            latency_ms,
            batch_size = dispatched,
            "Poll completed"
        );

        Ok(dispatched > 0)
    }

    /// Fetches a batch under a wall-clock watchdog. The watchdog reports a
    /// diagnostic when the fetch runs long but never aborts it; only poll
    /// scope cancellation does.
    async fn fetch_batch(
        &self,
        client_request_id: Uuid,
    ) -> Result<Vec<Option<QueueMessage>>, QueueClientError> {
        let fetch = self
            .client
            .get_messages(self.batch_size, self.dispatcher.visibility_timeout);
        tokio::pin!(fetch);

        let watchdog = tokio::time::sleep(GET_MESSAGES_WATCHDOG_INTERVAL);
        tokio::pin!(watchdog);
        let mut watchdog_fired = false;

        loop {
            tokio::select! {
                fetched = &mut fetch => return fetched,
                _ = &mut watchdog, if !watchdog_fired => {
                    watchdog_fired = true;
                    warn!(
                        queue = %self.queue_name,
                        client_request_id = %client_request_id,
                        watchdog_secs = GET_MESSAGES_WATCHDOG_INTERVAL.as_secs(),
                        "Message fetch exceeded watchdog interval, still waiting"
                    );
                }
                _ = self.poll_cancel.cancelled() => return Err(QueueClientError::Cancelled),
            }
        }
    }

    fn spawn_dispatch(&self, message: QueueMessage, in_flight: &mut JoinSet<()>) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let poll_cancel = self.poll_cancel.clone();
        let graceful_cancel = self.graceful_cancel.clone();
        in_flight.spawn(dispatcher.dispatch_contained(message, poll_cancel, graceful_cancel));
    }

    /// After a successful poll there is no delay; the next fetch waits only
    /// until the in-flight set shrinks to the new-batch threshold.
    async fn wait_for_capacity(&mut self, in_flight: &mut JoinSet<()>) {
        while in_flight.len() > self.new_batch_threshold {
            tokio::select! {
                _ = self.poll_cancel.cancelled() => return,
                joined = in_flight.join_next() => match joined {
                    Some(Err(join_error)) => warn!(
                        queue = %self.queue_name,
                        error = %join_error,
                        "In-flight dispatch task failed"
                    ),
                    Some(Ok(())) => {}
                    None => return,
                },
            }
        }
    }

    /// Lets every in-flight dispatch run to its natural completion so that
    /// message finalization finishes before the listener reports stopped.
    async fn drain(&mut self, in_flight: &mut JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }
        info!(
            queue = %self.queue_name,
            count = in_flight.len(),
            "Waiting for in-flight messages to finish"
        );
        while let Some(joined) = in_flight.join_next().await {
            if let Err(join_error) = joined {
                warn!(
                    queue = %self.queue_name,
                    error = %join_error,
                    "In-flight dispatch task failed during drain"
                );
            }
        }
        info!(queue = %self.queue_name, "All in-flight messages finished");
    }
}
