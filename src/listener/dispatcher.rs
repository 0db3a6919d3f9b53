//! Per-message dispatch.
//!
//! One dispatch owns one message from `begin` to `complete`: it starts the
//! visibility renewer, runs the handler, stops the renewer, then hands the
//! outcome to the processor under the graceful-completion scope so that
//! finalization I/O survives an ordinary stop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::QueueClient;
use crate::listener::visibility::VisibilityRenewer;
use crate::listener::{MessageHandler, UnhandledErrorSink};
use crate::models::QueueMessage;
use crate::processor::MessageProcessor;

/// Shared per-listener dispatch context.
pub(crate) struct Dispatcher {
    pub(crate) client: Arc<dyn QueueClient>,
    pub(crate) processor: Arc<dyn MessageProcessor>,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) error_sink: Arc<dyn UnhandledErrorSink>,
    pub(crate) descriptor_id: String,
    pub(crate) visibility_timeout: Duration,
    pub(crate) renewal_floor: Duration,
}

impl Dispatcher {
    /// Runs one message through its full lifecycle, containing panics so a
    /// misbehaving handler cannot take the in-flight set down with it.
    /// Failures that are not cancellation are reported to the unhandled-error
    /// sink at the point of occurrence; the spawned task itself never faults.
    pub(crate) async fn dispatch_contained(
        self: Arc<Self>,
        message: QueueMessage,
        poll_cancel: CancellationToken,
        graceful_cancel: CancellationToken,
    ) {
        let message_id = message.id.clone();
        let dispatch = AssertUnwindSafe(self.dispatch(message, poll_cancel, graceful_cancel));
        if let Err(panic_info) = dispatch.catch_unwind().await {
            let detail = panic_info
                .downcast_ref::<String>()
                .map(|s| s.as_str())
                .or_else(|| panic_info.downcast_ref::<&str>().copied())
                .unwrap_or("unknown panic");
            self.error_sink.report(
                &self.descriptor_id,
                &format!("message {message_id} dispatch panicked: {detail}"),
            );
        }
    }

    async fn dispatch(
        &self,
        message: QueueMessage,
        poll_cancel: CancellationToken,
        graceful_cancel: CancellationToken,
    ) {
        if !self.processor.begin_processing(&message).await {
            debug!(
                listener = %self.descriptor_id,
                message_id = %message.id,
                "Processor declined message, skipping"
            );
            return;
        }

        let renewer = VisibilityRenewer::spawn(
            Arc::clone(&self.client),
            message.clone(),
            self.visibility_timeout,
            self.renewal_floor,
            &poll_cancel,
        );

        let result = self.handler.execute(&message, poll_cancel.clone()).await;

        renewer.stop().await;

        if let Err(error) = self
            .processor
            .complete_processing(&message, &result, &graceful_cancel)
            .await
        {
            if error.is_cancelled() {
                debug!(
                    listener = %self.descriptor_id,
                    message_id = %message.id,
                    "Message completion cancelled"
                );
            } else {
                self.error_sink.report(
                    &self.descriptor_id,
                    &format!("failed to complete message {}: {error}", message.id),
                );
            }
        }
    }
}
