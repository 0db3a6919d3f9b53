//! Scale-advice constants.

/// Number of recent metric samples a scale decision considers.
pub const TARGET_SCALE_SAMPLE_WINDOW: usize = 5;

/// Queue length per worker beyond which the latest sample alone forces a
/// scale-out vote.
pub const SCALE_OUT_LENGTH_PER_WORKER: u64 = 1000;
