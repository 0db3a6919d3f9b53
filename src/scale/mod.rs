//! Queue metrics and scale advice.
//!
//! The monitor samples queue length and head-message age on demand; an
//! external autoscaler owns the cadence. Votes are a pure function of the
//! worker count and the recent sample window, so the decision table is
//! directly testable.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{QueueClient, QueueClientError};
use crate::constants::SCALE_OUT_LENGTH_PER_WORKER;

/// One point-in-time reading of the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetricSample {
    /// Approximate number of messages in the queue.
    pub queue_length: u64,
    /// Age of the oldest visible message, zero when the queue is empty.
    pub head_age: Duration,
    /// When the sample was taken.
    pub sampled_at: DateTime<Utc>,
}

impl QueueMetricSample {
    /// The sample an errored or empty probe yields.
    pub fn zero(sampled_at: DateTime<Utc>) -> Self {
        Self {
            queue_length: 0,
            head_age: Duration::ZERO,
            sampled_at,
        }
    }
}

/// Advisory scaling decision for the external autoscaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleVote {
    None,
    ScaleIn,
    ScaleOut,
}

/// Samples one queue and votes on worker-count changes.
pub struct ScaleMonitor {
    client: Arc<dyn QueueClient>,
    queue_name: String,
    window: usize,
    samples: Mutex<VecDeque<QueueMetricSample>>,
}

impl ScaleMonitor {
    pub fn new(client: Arc<dyn QueueClient>, queue_name: &str, window: usize) -> Self {
        Self {
            client,
            queue_name: queue_name.to_string(),
            window,
            samples: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    /// Takes one metric sample and records it in the window buffer.
    ///
    /// Transient storage errors yield a zero sample with a warning so a
    /// flapping queue reads as idle rather than poisoning the vote; other
    /// errors propagate.
    pub async fn get_metrics(&self) -> Result<QueueMetricSample, QueueClientError> {
        let sample = match self.sample_queue().await {
            Ok(sample) => sample,
            Err(error) if error.is_transient() => {
                warn!(
                    queue = %self.queue_name,
                    error = %error,
                    "Transient storage error while sampling queue metrics"
                );
                QueueMetricSample::zero(Utc::now())
            }
            Err(error) => return Err(error),
        };
        self.record(sample.clone());
        Ok(sample)
    }

    /// Records an externally obtained sample into the window buffer.
    pub fn record(&self, sample: QueueMetricSample) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.push_back(sample);
            while samples.len() > self.window {
                samples.pop_front();
            }
        }
    }

    /// Votes from the buffered window; `None` until the window fills.
    pub fn get_scale_status(&self, worker_count: usize) -> ScaleVote {
        let samples: Vec<QueueMetricSample> = match self.samples.lock() {
            Ok(samples) => samples.iter().cloned().collect(),
            Err(_) => return ScaleVote::None,
        };
        let (vote, rationale) = vote_with_rationale(worker_count, &samples, self.window);
        debug!(
            queue = %self.queue_name,
            worker_count,
            vote = ?vote,
            rationale,
            "Computed scale vote"
        );
        vote
    }

    async fn sample_queue(&self) -> Result<QueueMetricSample, QueueClientError> {
        let attributes = self.client.fetch_attributes().await?;
        let mut queue_length = attributes.approximate_length;
        let mut head_age = Duration::ZERO;

        if queue_length > 0 {
            match self.client.peek().await? {
                Some(head) => head_age = head.age(Utc::now()),
                // Attribute counts lag behind deletes; an empty peek is the
                // ground truth.
                None => queue_length = 0,
            }
        }

        Ok(QueueMetricSample {
            queue_length,
            head_age,
            sampled_at: Utc::now(),
        })
    }
}

/// Pure scale decision over the latest `window` samples.
///
/// `samples` is ordered oldest first; extra leading samples beyond the window
/// are ignored.
pub fn scale_vote(worker_count: usize, samples: &[QueueMetricSample], window: usize) -> ScaleVote {
    vote_with_rationale(worker_count, samples, window).0
}

fn vote_with_rationale(
    worker_count: usize,
    samples: &[QueueMetricSample],
    window: usize,
) -> (ScaleVote, &'static str) {
    if samples.len() < window {
        return (ScaleVote::None, "insufficient samples");
    }
    let recent = &samples[samples.len() - window..];
    let oldest = &recent[0];
    let latest = &recent[recent.len() - 1];

    let burst_threshold = (worker_count as u64).saturating_mul(SCALE_OUT_LENGTH_PER_WORKER);
    if latest.queue_length > burst_threshold {
        return (
            ScaleVote::ScaleOut,
            "latest queue length exceeds per-worker burst threshold",
        );
    }
    if recent.iter().all(|sample| sample.queue_length == 0) {
        return (ScaleVote::ScaleIn, "queue idle across the whole window");
    }
    if oldest.queue_length > 0 && all_adjacent(recent, |a, b| a.queue_length < b.queue_length) {
        return (ScaleVote::ScaleOut, "queue length strictly increasing");
    }
    if oldest.head_age > Duration::ZERO
        && oldest.head_age < latest.head_age
        && all_adjacent(recent, |a, b| a.head_age <= b.head_age)
    {
        return (ScaleVote::ScaleOut, "head age non-decreasing");
    }
    if all_adjacent(recent, |a, b| a.queue_length > b.queue_length) {
        return (ScaleVote::ScaleIn, "queue length strictly decreasing");
    }
    if all_adjacent(recent, |a, b| a.head_age > b.head_age) {
        return (ScaleVote::ScaleIn, "head age strictly decreasing");
    }
    (ScaleVote::None, "no clear trend")
}

/// Whether `predicate` holds for every adjacent pair in the window.
fn all_adjacent(
    samples: &[QueueMetricSample],
    predicate: impl Fn(&QueueMetricSample, &QueueMetricSample) -> bool,
) -> bool {
    debug_assert!(samples.len() > 1, "trend checks need at least two samples");
    samples
        .windows(2)
        .all(|pair| predicate(&pair[0], &pair[1]))
}
