//! Poll backoff strategy.

use std::time::Duration;

/// Randomized exponential backoff for queue polling.
///
/// Successful polls snap the delay back to `minimum`; idle or failed polls
/// grow it by a fresh random factor in `(1.0, 2.0]`, capped at `maximum`.
/// The jitter keeps a fleet of listeners on the same account from polling in
/// lockstep.
#[derive(Debug)]
pub struct RandomizedExponentialBackoff {
    minimum: Duration,
    maximum: Duration,
    current: Duration,
}

impl RandomizedExponentialBackoff {
    /// Creates a strategy bounded by `[minimum, maximum]`.
    ///
    /// `minimum` is raised to 1ms if smaller, and `maximum` is raised to
    /// `minimum` if the caller hands bounds in the wrong order.
    pub fn new(minimum: Duration, maximum: Duration) -> Self {
        let minimum = minimum.max(Duration::from_millis(1));
        let maximum = maximum.max(minimum);
        Self {
            minimum,
            maximum,
            current: minimum,
        }
    }

    /// Returns the next poll delay.
    ///
    /// `succeeded` reports whether work was found since the last delay.
    pub fn next(&mut self, succeeded: bool) -> Duration {
        if succeeded {
            self.current = self.minimum;
        } else {
            // rand::random::<f64>() is in [0, 1), so the factor lands in (1.0, 2.0].
            let factor = 2.0 - rand::random::<f64>();
            self.current = self
                .current
                .mul_f64(factor)
                .clamp(self.minimum, self.maximum);
        }
        self.current
    }
}
