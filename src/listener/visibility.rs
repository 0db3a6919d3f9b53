//! Per-message visibility renewal.
//!
//! While a handler runs, a background task keeps the message invisible to
//! other consumers by re-extending its visibility window on a schedule that
//! accelerates after failures and relaxes back after successes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::QueueClient;
use crate::models::QueueMessage;

/// Keeps one dequeued message invisible while its handler runs.
pub(crate) struct VisibilityRenewer {
    client: Arc<dyn QueueClient>,
    message: QueueMessage,
    visibility_timeout: Duration,
    minimum_interval: Duration,
}

/// Handle used by the dispatcher to stop the renewal task and wait for it to
/// exit before finalizing the message.
pub(crate) struct RenewerHandle {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RenewerHandle {
    /// Signals the renewal task to stop and awaits its exit. The renewer
    /// never outlives the dispatch that started it.
    pub(crate) async fn stop(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(join_error) = task.await {
                if !join_error.is_cancelled() {
                    warn!(error = %join_error, "Visibility renewal task failed");
                }
            }
        }
    }
}

impl Drop for RenewerHandle {
    // Dropping without `stop` (a panicking dispatch unwinding past the
    // handle) must still terminate the renewal task.
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl VisibilityRenewer {
    /// Spawns the renewal task for `message`.
    ///
    /// The first extension attempt fires at half the visibility window. The
    /// returned handle's stop token is a child of the poll scope, so hard
    /// cancellation of the listener also terminates the renewer.
    pub(crate) fn spawn(
        client: Arc<dyn QueueClient>,
        message: QueueMessage,
        visibility_timeout: Duration,
        minimum_interval: Duration,
        poll_cancel: &CancellationToken,
    ) -> RenewerHandle {
        let stop = poll_cancel.child_token();
        let renewer = Self {
            client,
            message,
            visibility_timeout,
            minimum_interval,
        };
        let task = tokio::spawn(renewer.run(stop.clone()));
        RenewerHandle {
            stop,
            task: Some(task),
        }
    }

    async fn run(self, stop: CancellationToken) {
        let normal_interval = self.visibility_timeout / 2;
        let mut interval = normal_interval;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            match self
                .client
                .update_visibility(&self.message, self.visibility_timeout)
                .await
            {
                Ok(()) => {
                    debug!(
                        message_id = %self.message.id,
                        extension_secs = self.visibility_timeout.as_secs(),
                        "Extended message invisibility"
                    );
                    interval = normal_interval;
                }
                Err(error) if error.is_cancelled() => break,
                Err(error) if error.is_not_found() || error.is_receipt_invalid() => {
                    warn!(
                        message_id = %self.message.id,
                        error = %error,
                        "Message no longer renewable, stopping visibility renewal"
                    );
                    break;
                }
                Err(error) => {
                    interval = std::cmp::max(interval / 2, self.minimum_interval);
                    warn!(
                        message_id = %self.message.id,
                        error = %error,
                        next_attempt_secs = interval.as_secs(),
                        "Visibility renewal failed, retrying on accelerated schedule"
                    );
                }
            }
        }
    }
}
