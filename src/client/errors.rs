//! Queue storage error taxonomy.
//!
//! The listener never matches on a concrete SDK error type; adapters map
//! their SDK's failures onto these behavioral kinds and the poll loop,
//! renewer and processor drive their decisions off the classifier predicates.

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by a [`QueueClient`](super::QueueClient) implementation.
#[derive(Debug, Error, Serialize, Clone)]
pub enum QueueClientError {
    /// The queue or message no longer exists.
    #[error("queue or message not found: {0}")]
    NotFound(String),

    /// The queue is being deleted or is disabled and cannot serve requests.
    #[error("queue is being deleted or disabled: {0}")]
    QueueBeingDeletedOrDisabled(String),

    /// The service answered with a 5xx-class failure.
    #[error("server-side storage error (status {status}): {message}")]
    ServerSide { status: u16, message: String },

    /// The pop receipt was rejected; the message was likely redelivered.
    #[error("pop receipt no longer valid: {0}")]
    InvalidReceipt(String),

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// Any other storage failure.
    #[error("queue storage error: {0}")]
    Other(String),
}

impl QueueClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict_being_deleted_or_disabled(&self) -> bool {
        matches!(self, Self::QueueBeingDeletedOrDisabled(_))
    }

    pub fn is_server_side_error(&self) -> bool {
        matches!(self, Self::ServerSide { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the pop receipt can no longer be used for this delivery.
    pub fn is_receipt_invalid(&self) -> bool {
        matches!(self, Self::InvalidReceipt(_))
    }

    /// The family of failures a poll treats as an empty result: the queue may
    /// be mid-provisioning, mid-deletion, or the service is having a moment.
    /// Polling backs off and retries indefinitely.
    pub fn is_transient(&self) -> bool {
        self.is_not_found() || self.is_conflict_being_deleted_or_disabled() || self.is_server_side_error()
    }
}
