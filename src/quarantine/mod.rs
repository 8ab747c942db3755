//! Quarantine of flagged remote files.

pub mod executor;

pub use executor::QuarantineExecutor;
