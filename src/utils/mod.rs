//! Utility functions and helpers.

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig};
pub use retry::{retry_async, RetryConfig};
