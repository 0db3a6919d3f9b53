//! Data records shared across the listener.

pub mod message;

pub use message::{FunctionResult, QueueMessage};
