//! Deep scan engine.
//!
//! This module provides:
//! - Lazy remote directory walking with exclusion pruning
//! - The head+tail partial-read policy
//! - A bounded worker pool feeding the classifier
//! - Scan records, their state machine and the registry holding them
//! - The deep scan run tying these together

pub mod deep;
pub mod pool;
pub mod progress;
pub mod reader;
pub mod record;
pub mod registry;
pub mod walker;

pub use deep::DeepScanner;
pub use pool::{FileOutcome, PoolOutcome, ScanPool};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use reader::{ReadPlan, ReadPolicy};
pub use record::ScanRecord;
pub use registry::ScanRegistry;
pub use walker::{RemoteWalker, WalkEvent, WalkOptions};
