//! In-memory queue fake and scripted collaborators shared by the
//! integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use queue_trigger::{
    FunctionResult, MessageHandler, PoisonEventSink, QueueAttributes, QueueClient,
    QueueClientError, QueueMessage,
};

struct StoredMessage {
    message: QueueMessage,
    visible_at: Instant,
}

/// A storage account holding any number of named queues. Poison inserts land
/// in their sibling queue here, so tests can inspect them.
#[derive(Default)]
pub struct FakeQueueAccount {
    queues: Mutex<HashMap<String, VecDeque<StoredMessage>>>,
    next_id: AtomicUsize,
}

impl FakeQueueAccount {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Inserts a visible message into `queue`.
    pub fn seed(&self, queue: &str, body: &str) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = QueueMessage {
            id: format!("msg-{id}"),
            dequeue_count: 0,
            inserted_at: Utc::now(),
            body: body.to_string(),
            pop_receipt: format!("receipt-{id}"),
        };
        let mut queues = self.queues.lock().expect("queue store lock");
        queues.entry(queue.to_string()).or_default().push_back(StoredMessage {
            message,
            visible_at: Instant::now(),
        });
    }

    /// Total messages in `queue`, visible or not.
    pub fn queue_len(&self, queue: &str) -> usize {
        let queues = self.queues.lock().expect("queue store lock");
        queues.get(queue).map(VecDeque::len).unwrap_or(0)
    }
}

/// `QueueClient` over one queue of a [`FakeQueueAccount`], with call counters
/// and a one-shot fetch failure injection.
pub struct FakeQueueClient {
    account: Arc<FakeQueueAccount>,
    queue_name: String,
    exists: AtomicBool,
    polls: AtomicUsize,
    exists_probes: AtomicUsize,
    deletes: AtomicUsize,
    extensions: AtomicUsize,
    releases: AtomicUsize,
    fail_next_get: Mutex<Option<QueueClientError>>,
}

impl FakeQueueClient {
    pub fn new(account: &Arc<FakeQueueAccount>, queue_name: &str) -> Arc<Self> {
        Arc::new(Self {
            account: Arc::clone(account),
            queue_name: queue_name.to_string(),
            exists: AtomicBool::new(true),
            polls: AtomicUsize::new(0),
            exists_probes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            extensions: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            fail_next_get: Mutex::new(None),
        })
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn exists_probe_count(&self) -> usize {
        self.exists_probes.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Visibility updates with a non-zero window (renewer extensions).
    pub fn extension_count(&self) -> usize {
        self.extensions.load(Ordering::SeqCst)
    }

    /// Visibility updates to zero (releases for retry).
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn set_exists(&self, exists: bool) {
        self.exists.store(exists, Ordering::SeqCst);
    }

    /// Makes the next `get_messages` call fail with `error`.
    pub fn fail_next_get(&self, error: QueueClientError) {
        *self.fail_next_get.lock().expect("failure slot lock") = Some(error);
    }

    fn with_queue<R>(&self, f: impl FnOnce(&mut VecDeque<StoredMessage>) -> R) -> R {
        let mut queues = self.account.queues.lock().expect("queue store lock");
        f(queues.entry(self.queue_name.clone()).or_default())
    }
}

#[async_trait]
impl QueueClient for FakeQueueClient {
    async fn exists(&self) -> Result<bool, QueueClientError> {
        self.exists_probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.exists.load(Ordering::SeqCst))
    }

    async fn get_messages(
        &self,
        count: usize,
        visibility: Duration,
    ) -> Result<Vec<Option<QueueMessage>>, QueueClientError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_next_get.lock().expect("failure slot lock").take() {
            return Err(error);
        }

        let now = Instant::now();
        Ok(self.with_queue(|queue| {
            let mut batch = Vec::new();
            for stored in queue.iter_mut() {
                if batch.len() == count {
                    break;
                }
                if stored.visible_at <= now {
                    stored.message.dequeue_count += 1;
                    stored.visible_at = now + visibility;
                    batch.push(Some(stored.message.clone()));
                }
            }
            batch
        }))
    }

    async fn update_visibility(
        &self,
        message: &QueueMessage,
        visibility: Duration,
    ) -> Result<(), QueueClientError> {
        let now = Instant::now();
        let updated = self.with_queue(|queue| {
            for stored in queue.iter_mut() {
                if stored.message.id == message.id {
                    stored.visible_at = now + visibility;
                    return true;
                }
            }
            false
        });
        if !updated {
            return Err(QueueClientError::NotFound(message.id.clone()));
        }
        if visibility.is_zero() {
            self.releases.fetch_add(1, Ordering::SeqCst);
        } else {
            self.extensions.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn delete_message(&self, message: &QueueMessage) -> Result<(), QueueClientError> {
        let removed = self.with_queue(|queue| {
            let before = queue.len();
            queue.retain(|stored| stored.message.id != message.id);
            queue.len() < before
        });
        if !removed {
            return Err(QueueClientError::NotFound(message.id.clone()));
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_message(&self, queue_name: &str, body: &str) -> Result<(), QueueClientError> {
        self.account.seed(queue_name, body);
        Ok(())
    }

    async fn fetch_attributes(&self) -> Result<QueueAttributes, QueueClientError> {
        let approximate_length = self.with_queue(|queue| queue.len() as u64);
        Ok(QueueAttributes { approximate_length })
    }

    async fn peek(&self) -> Result<Option<QueueMessage>, QueueClientError> {
        let now = Instant::now();
        Ok(self.with_queue(|queue| {
            queue
                .iter()
                .find(|stored| stored.visible_at <= now)
                .map(|stored| stored.message.clone())
        }))
    }
}

/// Handler that sleeps for a fixed duration, then reports a scripted outcome.
/// Tracks invocation counts and peak concurrency.
pub struct ScriptedHandler {
    delay: Duration,
    succeed: bool,
    invocations: AtomicUsize,
    current: AtomicUsize,
    peak_concurrency: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new(delay: Duration, succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            delay,
            succeed,
            invocations: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
            peak_concurrency: AtomicUsize::new(0),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(Duration::ZERO, true)
    }

    pub fn failing() -> Arc<Self> {
        Self::new(Duration::ZERO, false)
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn execute(&self, _message: &QueueMessage, _cancel: CancellationToken) -> FunctionResult {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrency.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.current.fetch_sub(1, Ordering::SeqCst);
        if self.succeed {
            FunctionResult::success()
        } else {
            FunctionResult::failure("scripted failure")
        }
    }
}

/// Poison sink recording every event it receives.
#[derive(Default)]
pub struct RecordingPoisonSink {
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingPoisonSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(String, String)> {
        self.events.lock().expect("events lock").clone()
    }
}

#[async_trait]
impl PoisonEventSink for RecordingPoisonSink {
    async fn message_poisoned(&self, poison_queue: &str, message: &QueueMessage) {
        self.events
            .lock()
            .expect("events lock")
            .push((poison_queue.to_string(), message.id.clone()));
    }
}

/// Polls `condition` until it holds or `budget` elapses. Returns whether the
/// condition was observed.
pub async fn wait_for(condition: impl Fn() -> bool, budget: Duration) -> bool {
    let deadline = Instant::now() + budget;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
