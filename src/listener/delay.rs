//! Interruptible poll delay.
//!
//! The poll loop arms a fresh one-shot wake handle at the top of every
//! iteration; anyone holding the matching [`WakeSignal`] can fire it to cut a
//! backoff delay short. Firing while no handle is armed is a no-op, so stale
//! bursts cannot defeat future backoff waits.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Why a [`NotifiableDelay::wait`] call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayOutcome {
    /// The full delay elapsed.
    Elapsed,
    /// A wake signal fired while the handle was armed.
    Notified,
    /// The poll scope was cancelled.
    Cancelled,
}

type WakeSlot = Arc<Mutex<Option<oneshot::Sender<()>>>>;

/// Clonable handle that wakes the listener's current delay, if one is armed.
#[derive(Clone, Default)]
pub struct WakeSignal {
    slot: WakeSlot,
}

impl WakeSignal {
    /// Fires the currently armed wake handle. Edge-triggered: with no handle
    /// armed the signal is dropped, not retained.
    pub fn notify(&self) {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

impl std::fmt::Debug for WakeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeSignal").finish_non_exhaustive()
    }
}

/// Sleep primitive the poll loop uses between polls.
#[derive(Default)]
pub struct NotifiableDelay {
    slot: WakeSlot,
}

impl NotifiableDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the signal side used by `notify()` callers.
    pub fn signal(&self) -> WakeSignal {
        WakeSignal {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Installs a fresh one-shot wake handle, replacing any previous one.
    /// Call once per poll iteration, before any work that a producer might
    /// want to interrupt.
    pub fn arm(&self) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(sender);
        }
        receiver
    }

    /// Sleeps for `delay`, returning early if the armed handle fires or the
    /// poll scope is cancelled.
    pub async fn wait(
        &self,
        delay: Duration,
        armed: oneshot::Receiver<()>,
        cancel: &CancellationToken,
    ) -> DelayOutcome {
        tokio::select! {
            _ = cancel.cancelled() => DelayOutcome::Cancelled,
            _ = armed => DelayOutcome::Notified,
            _ = tokio::time::sleep(delay) => DelayOutcome::Elapsed,
        }
    }
}
