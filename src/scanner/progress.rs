//! Scan progress tracking.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Compute `round(100 * done / max(1, total))`, clamped to 0-100.
pub fn percentage(done: u64, total: u64) -> u8 {
    let total = total.max(1);
    let pct = (done as f64 * 100.0 / total as f64).round();
    pct.clamp(0.0, 100.0) as u8
}

/// File counters for one run. Owned by the scan record and updated under its lock.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_files: u64,
    done_files: u64,
    percent: u8,
    started: Option<Instant>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            total_files: 0,
            done_files: 0,
            percent: 0,
            started: None,
        }
    }

    /// Start the clock.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Set the number of files scheduled for this run.
    pub fn set_total_files(&mut self, total: u64) {
        self.total_files = total;
        self.refresh();
    }

    /// Record one file reaching its terminal outcome.
    pub fn complete_file(&mut self) {
        self.done_files += 1;
        self.refresh();
    }

    /// Mark the run finished; percentage goes to 100.
    pub fn finish(&mut self) {
        self.percent = 100;
    }

    pub fn total_files(&self) -> u64 {
        self.total_files
    }

    pub fn done_files(&self) -> u64 {
        self.done_files
    }

    /// Scheduled files with no outcome yet.
    pub fn remaining(&self) -> u64 {
        self.total_files.saturating_sub(self.done_files)
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    // Never moves backwards, even if the total is raised mid-run.
    fn refresh(&mut self) {
        let pct = percentage(self.done_files, self.total_files);
        self.percent = self.percent.max(pct);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        let secs = elapsed.as_secs_f64();
        ProgressSnapshot {
            total_files: self.total_files,
            done_files: self.done_files,
            percent: self.percent,
            elapsed,
            files_per_second: if secs > 0.0 {
                self.done_files as f64 / secs
            } else {
                0.0
            },
        }
    }
}

/// Point-in-time view of a run's progress.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub total_files: u64,
    pub done_files: u64,
    pub percent: u8,
    pub elapsed: Duration,
    pub files_per_second: f64,
}

impl ProgressSnapshot {
    /// Estimate remaining time based on the current rate.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        if self.done_files == 0 || self.done_files >= self.total_files || self.files_per_second <= 0.0 {
            return None;
        }
        let remaining = (self.total_files - self.done_files) as f64;
        Some(Duration::from_secs_f64(remaining / self.files_per_second))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(3, 3), 100);
        assert_eq!(percentage(5, 3), 100);
    }

    #[test]
    fn test_tracker_monotonic() {
        let mut tracker = ProgressTracker::new();
        tracker.set_total_files(4);
        tracker.complete_file();
        tracker.complete_file();
        assert_eq!(tracker.percent(), 50);

        tracker.set_total_files(10);
        assert_eq!(tracker.percent(), 50);
        assert_eq!(tracker.remaining(), 8);

        tracker.finish();
        assert_eq!(tracker.percent(), 100);
    }

    #[test]
    fn test_snapshot_without_start() {
        let tracker = ProgressTracker::new();
        let snap = tracker.snapshot();
        assert_eq!(snap.elapsed, Duration::ZERO);
        assert_eq!(snap.files_per_second, 0.0);
        assert!(snap.estimated_remaining().is_none());
    }
}
