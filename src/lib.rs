//! sitescan: deep malware scan engine for remote web site trees.
//!
//! Walks a remote directory tree through a pluggable filesystem capability,
//! classifies file contents with an ordered rule list under bounded
//! concurrency, aggregates findings into a risk score and can quarantine
//! malicious files. Progress and a per-scan log are pollable while a scan
//! runs.

pub mod core;
pub mod detection;
pub mod quarantine;
pub mod remote;
pub mod scanner;
pub mod service;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use crate::core::config::Config;
pub use crate::core::error::{Error, Result};
pub use crate::core::types::*;
pub use crate::service::{ScanHandle, ScanService};
