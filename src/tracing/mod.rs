//! Logging setup
//!
//! Everything is written to stderr through `tracing-subscriber`; stdout is
//! reserved for the run's start and elapsed lines.

pub mod subscriber;

pub use subscriber::{init_subscriber, SubscriberError};
