//! Crate-wide constants, grouped by concern.

pub mod logging;
pub mod polling;
pub mod queues;
pub mod scale;

pub use logging::*;
pub use polling::*;
pub use queues::*;
pub use scale::*;
