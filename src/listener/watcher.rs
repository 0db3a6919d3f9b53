//! Cross-queue enqueue notifications.
//!
//! When one component enqueues a message to a queue another listener is
//! draining, waking that listener immediately beats waiting out its backoff
//! delay. The watcher routes by lowercased queue name; queue client handles
//! are not reliably comparable, names are.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::listener::delay::WakeSignal;
use crate::models::QueueMessage;
use crate::processor::PoisonEventSink;

/// Shared registry mapping queue names to listener wake signals.
#[derive(Default)]
pub struct SharedQueueWatcher {
    subscriptions: Mutex<HashMap<String, Vec<WakeSignal>>>,
}

impl SharedQueueWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `signal` to enqueue events for `queue_name`.
    ///
    /// Signals are edge-triggered and never unsubscribed; a signal whose
    /// listener is gone simply has no armed handle to fire.
    pub fn register(&self, queue_name: &str, signal: WakeSignal) {
        let key = queue_name.to_lowercase();
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.entry(key).or_default().push(signal);
        }
    }

    /// Wakes every listener subscribed to `queue_name`.
    pub fn message_enqueued(&self, queue_name: &str) {
        let key = queue_name.to_lowercase();
        let Ok(subscriptions) = self.subscriptions.lock() else {
            return;
        };
        if let Some(signals) = subscriptions.get(&key) {
            debug!(
                queue = %key,
                listeners = signals.len(),
                "Waking listeners after enqueue"
            );
            for signal in signals {
                signal.notify();
            }
        }
    }
}

/// Poison event sink that wakes any listener draining the poison queue.
pub struct WatcherPoisonSink {
    watcher: Arc<SharedQueueWatcher>,
}

impl WatcherPoisonSink {
    pub fn new(watcher: Arc<SharedQueueWatcher>) -> Self {
        Self { watcher }
    }
}

#[async_trait]
impl PoisonEventSink for WatcherPoisonSink {
    async fn message_poisoned(&self, poison_queue: &str, _message: &QueueMessage) {
        self.watcher.message_enqueued(poison_queue);
    }
}
