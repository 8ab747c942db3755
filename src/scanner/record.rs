//! Scan record and its state machine.
//!
//! A [`ScanRecord`] is the only state shared between the API layer, the
//! worker pool and the quarantine executor. All mutable fields live behind a
//! single mutex so each update (counter, finding, log line) is applied
//! atomically and in order. Status only moves forward; once a run reaches a
//! terminal status its counts, score and findings are frozen, while the log
//! keeps accepting lines.

use crate::core::error::{Error, Result};
use crate::core::types::{
    Counts, Finding, LogPage, ScanKind, ScanStatus, ScanSummary, Severity,
};
use crate::detection::Classification;
use crate::remote::{normalize_root, RemoteCredentials};
use crate::scanner::progress::{ProgressSnapshot, ProgressTracker};
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug)]
struct RecordState {
    status: ScanStatus,
    progress: ProgressTracker,
    counts: Counts,
    failed: u64,
    bytes_scanned: u64,
    score: Option<u8>,
    findings: Vec<Finding>,
    logs: Vec<String>,
    root_path: Option<String>,
    credentials: Option<RemoteCredentials>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl RecordState {
    fn transition(&mut self, next: ScanStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// One scan: identity, lifecycle status, counters, findings and log.
#[derive(Debug)]
pub struct ScanRecord {
    id: String,
    ticket_id: String,
    kind: ScanKind,
    created_at: DateTime<Utc>,
    cancel_requested: AtomicBool,
    run_claimed: AtomicBool,
    state: Mutex<RecordState>,
}

impl ScanRecord {
    /// Create a queued record with a fresh id.
    pub fn new(ticket_id: impl Into<String>, kind: ScanKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ticket_id: ticket_id.into(),
            kind,
            created_at: Utc::now(),
            cancel_requested: AtomicBool::new(false),
            run_claimed: AtomicBool::new(false),
            state: Mutex::new(RecordState {
                status: ScanStatus::Queued,
                progress: ProgressTracker::new(),
                counts: Counts::default(),
                failed: 0,
                bytes_scanned: 0,
                score: None,
                findings: Vec::new(),
                logs: Vec::new(),
                root_path: None,
                credentials: None,
                started_at: None,
                ended_at: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    pub fn kind(&self) -> ScanKind {
        self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn state(&self) -> Result<MutexGuard<'_, RecordState>> {
        self.state
            .lock()
            .map_err(|_| Error::lock_poisoned(format!("scan record {}", self.id)))
    }

    pub fn status(&self) -> Result<ScanStatus> {
        Ok(self.state()?.status)
    }

    // ===== Log =====

    /// Append a timestamped line to the scan log.
    ///
    /// Accepted in every status, including terminal ones. The line is also
    /// emitted through the process logger.
    pub fn append_log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::info!("[scan {}] {}", self.id, message);

        match self.state.lock() {
            Ok(mut state) => Self::push_log(&mut state, message),
            Err(_) => log::error!("Dropping log line for scan {}: record lock poisoned", self.id),
        }
    }

    fn push_log(state: &mut RecordState, message: &str) {
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        state.logs.push(format!("[{}] {}", ts, message));
    }

    /// Lines appended since `cursor`, and the cursor for the next call.
    pub fn logs_since(&self, cursor: usize) -> Result<LogPage> {
        let state = self.state()?;
        let len = state.logs.len();
        let start = cursor.min(len);
        Ok(LogPage {
            lines: state.logs[start..].to_vec(),
            cursor: len,
        })
    }

    // ===== Configuration =====

    /// Set the root path and/or credentials. Only allowed while queued.
    pub fn set_config(
        &self,
        root_path: Option<String>,
        credentials: Option<RemoteCredentials>,
    ) -> Result<()> {
        let mut state = self.state()?;
        if state.status != ScanStatus::Queued {
            return Err(Error::ScanNotQueued {
                scan_id: self.id.clone(),
                status: state.status.to_string(),
            });
        }

        if let Some(root) = root_path {
            state.root_path = Some(normalize_root(&root));
        }
        if let Some(creds) = credentials {
            state.credentials = Some(creds);
        }

        let message = format!(
            "config saved root={} remote={}",
            state.root_path.as_deref().unwrap_or("-"),
            state
                .credentials
                .as_ref()
                .map(|c| c.display_target())
                .unwrap_or_else(|| "-".to_string())
        );
        drop(state);
        self.append_log(message);
        Ok(())
    }

    /// Root path and credentials, when both are configured.
    pub fn deep_scan_target(&self) -> Result<Option<(String, RemoteCredentials)>> {
        let state = self.state()?;
        Ok(match (&state.root_path, &state.credentials) {
            (Some(root), Some(creds)) => Some((root.clone(), creds.clone())),
            _ => None,
        })
    }

    // ===== Lifecycle =====

    /// Reserve this record for a single run.
    ///
    /// Succeeds at most once, and only while queued. Every later call gets
    /// `ScanNotQueued` and leaves the record untouched.
    pub fn claim_run(&self) -> Result<()> {
        let state = self.state()?;
        let status = state.status;
        if status == ScanStatus::Queued
            && self
                .run_claimed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Ok(());
        }

        Err(Error::ScanNotQueued {
            scan_id: self.id.clone(),
            status: if status == ScanStatus::Queued {
                "starting".to_string()
            } else {
                status.to_string()
            },
        })
    }

    /// `queued -> running`.
    pub fn begin(&self, root: &str) -> Result<()> {
        let mut state = self.state()?;
        state.transition(ScanStatus::Running)?;
        state.started_at = Some(Utc::now());
        state.progress.start();
        drop(state);

        self.append_log(format!("deep-scan started at root={}", root));
        Ok(())
    }

    /// Move to `error` and log the reason.
    ///
    /// Nothing is logged when the record can no longer move to `error`.
    pub fn fail(&self, message: impl AsRef<str>) -> Result<()> {
        self.state()?.transition(ScanStatus::Error)?;
        self.append_log(message);
        Ok(())
    }

    /// Finish a run normally: compute the score and move to `done` or `issues`.
    pub fn complete(&self) -> Result<ScanStatus> {
        let mut state = self.state()?;
        let next = if state.counts.has_issues() {
            ScanStatus::Issues
        } else {
            ScanStatus::Done
        };
        state.transition(next)?;

        let score = state.counts.score();
        state.score = Some(score);
        state.progress.finish();
        drop(state);

        self.append_log(format!("deep-scan finished status={} score={}", next, score));
        Ok(next)
    }

    /// Finish a cancelled run, noting files left unclassified.
    pub fn mark_canceled(&self) -> Result<()> {
        let mut state = self.state()?;
        state.transition(ScanStatus::Canceled)?;
        let unclassified = state.progress.remaining();
        drop(state);

        if unclassified > 0 {
            self.append_log(format!(
                "deep-scan canceled, {} files left unclassified",
                unclassified
            ));
        } else {
            self.append_log("deep-scan canceled");
        }
        Ok(())
    }

    /// Request cooperative cancellation.
    ///
    /// A queued record is cancelled immediately. A running one stops
    /// dispatching new files and is finalised by its run.
    pub fn request_cancel(&self) -> Result<ScanStatus> {
        self.cancel_requested.store(true, Ordering::SeqCst);

        let mut state = self.state()?;
        match state.status {
            ScanStatus::Queued => {
                state.transition(ScanStatus::Canceled)?;
                drop(state);
                self.append_log("scan canceled before start");
                Ok(ScanStatus::Canceled)
            }
            ScanStatus::Running => {
                drop(state);
                self.append_log("cancellation requested");
                Ok(ScanStatus::Running)
            }
            status => Ok(status),
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    // ===== Run results =====

    /// Set the number of files scheduled for this run.
    pub fn set_total_files(&self, total: u64) -> Result<()> {
        let mut state = self.state()?;
        if state.status == ScanStatus::Running {
            state.progress.set_total_files(total);
        }
        Ok(())
    }

    /// Apply a successful classification.
    ///
    /// Non-clean verdicts become findings. Ignored once the run has ended.
    pub fn record_classified(
        &self,
        path: &str,
        bytes: u64,
        verdict: &Classification,
        preview: String,
    ) -> Result<()> {
        let mut state = self.state()?;
        if state.status != ScanStatus::Running {
            log::debug!("Scan {} no longer running, dropping result for {}", self.id, path);
            return Ok(());
        }

        state.counts.increment(verdict.severity);
        state.bytes_scanned += bytes;
        state.progress.complete_file();
        if !verdict.is_clean() {
            state.findings.push(Finding {
                id: Uuid::new_v4().to_string(),
                path: path.to_string(),
                rule: verdict.rule.clone(),
                severity: verdict.severity,
                preview,
            });
            let line = format!("{} {} rule={}", verdict.severity, path, verdict.rule);
            Self::push_log(&mut state, &line);
            drop(state);
            log::warn!("[scan {}] {}", self.id, line);
        }
        Ok(())
    }

    /// Apply a per-file failure. Counts as processed for progress.
    pub fn record_failure(&self, path: &str, error: &Error) -> Result<()> {
        let mut state = self.state()?;
        if state.status != ScanStatus::Running {
            return Ok(());
        }
        state.failed += 1;
        state.progress.complete_file();
        drop(state);

        self.append_log(format!("read error {}: {}", path, error));
        Ok(())
    }

    // ===== Queries =====

    /// Findings in discovery order, optionally filtered by severity.
    pub fn findings(&self, severity: Option<Severity>) -> Result<Vec<Finding>> {
        let state = self.state()?;
        Ok(state
            .findings
            .iter()
            .filter(|f| severity.map_or(true, |s| f.severity == s))
            .cloned()
            .collect())
    }

    /// Distinct paths of malicious findings, in discovery order.
    pub fn malicious_paths(&self) -> Result<Vec<String>> {
        let state = self.state()?;
        let mut paths: Vec<String> = Vec::new();
        for finding in state.findings.iter().filter(|f| f.severity == Severity::Malicious) {
            if !paths.contains(&finding.path) {
                paths.push(finding.path.clone());
            }
        }
        Ok(paths)
    }

    pub fn root_path(&self) -> Result<Option<String>> {
        Ok(self.state()?.root_path.clone())
    }

    pub fn progress(&self) -> Result<ProgressSnapshot> {
        Ok(self.state()?.progress.snapshot())
    }

    pub fn summary(&self) -> Result<ScanSummary> {
        let state = self.state()?;
        Ok(ScanSummary {
            id: self.id.clone(),
            ticket_id: self.ticket_id.clone(),
            kind: self.kind,
            status: state.status,
            progress: state.progress.percent(),
            counts: state.counts,
            failed: state.failed,
            bytes_scanned: state.bytes_scanned,
            score: state.score,
            created_at: self.created_at,
            started_at: state.started_at,
            ended_at: state.ended_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::classifier::{RULE_NONE, RULE_OBFUSCATION, RULE_WEBSHELL};

    fn verdict(severity: Severity, rule: &str) -> Classification {
        Classification {
            severity,
            rule: rule.to_string(),
        }
    }

    fn running_record(total: u64) -> ScanRecord {
        let record = ScanRecord::new("T-1", ScanKind::Deep);
        record
            .set_config(
                Some("/www".into()),
                Some(RemoteCredentials::password("h", "u", "p")),
            )
            .unwrap();
        record.begin("/www").unwrap();
        record.set_total_files(total).unwrap();
        record
    }

    #[test]
    fn test_new_record_is_queued() {
        let record = ScanRecord::new("T-1", ScanKind::Deep);
        let summary = record.summary().unwrap();
        assert_eq!(summary.status, ScanStatus::Queued);
        assert_eq!(summary.progress, 0);
        assert_eq!(summary.score, None);
        assert!(record.deep_scan_target().unwrap().is_none());
    }

    #[test]
    fn test_counts_and_findings() {
        let record = running_record(4);
        record
            .record_classified("/www/a.php", 10, &verdict(Severity::Malicious, RULE_WEBSHELL), "eval".into())
            .unwrap();
        record
            .record_classified("/www/b.php", 20, &verdict(Severity::Suspicious, RULE_OBFUSCATION), "b64".into())
            .unwrap();
        record
            .record_classified("/www/c.php", 30, &verdict(Severity::Clean, RULE_NONE), String::new())
            .unwrap();
        record
            .record_failure("/www/d.php", &Error::remote("read", "/www/d.php", "denied"))
            .unwrap();

        let summary = record.summary().unwrap();
        assert_eq!(summary.counts.classified() + summary.failed, 4);
        assert_eq!(summary.progress, 100);
        assert_eq!(summary.bytes_scanned, 60);
        assert_eq!(record.progress().unwrap().done_files, 4);

        let findings = record.findings(None).unwrap();
        assert_eq!(findings.len(), 2);
        assert_ne!(findings[0].id, findings[1].id);
        assert_eq!(record.findings(Some(Severity::Malicious)).unwrap().len(), 1);
        assert_eq!(record.malicious_paths().unwrap(), vec!["/www/a.php"]);

        let logs = record.logs_since(0).unwrap();
        assert!(logs.lines.iter().any(|l| l.contains("read error /www/d.php")));
    }

    #[test]
    fn test_complete_freezes_results() {
        let record = running_record(2);
        record
            .record_classified("/www/a.php", 1, &verdict(Severity::Suspicious, RULE_OBFUSCATION), String::new())
            .unwrap();
        assert_eq!(record.complete().unwrap(), ScanStatus::Issues);

        record
            .record_classified("/www/b.php", 1, &verdict(Severity::Malicious, RULE_WEBSHELL), String::new())
            .unwrap();
        let summary = record.summary().unwrap();
        assert_eq!(summary.counts.malicious, 0);
        assert_eq!(summary.score, Some(95));
        assert_eq!(summary.progress, 100);
        assert!(summary.ended_at.is_some());
        let lines_before = record.logs_since(0).unwrap().cursor;
        assert!(record.fail("late").is_err());
        assert_eq!(record.status().unwrap(), ScanStatus::Issues);
        assert_eq!(record.logs_since(0).unwrap().cursor, lines_before);
    }

    #[test]
    fn test_run_claimed_once() {
        let record = ScanRecord::new("T-4", ScanKind::Deep);
        record.claim_run().unwrap();

        let err = record.claim_run().unwrap_err();
        assert!(matches!(err, Error::ScanNotQueued { ref status, .. } if status == "starting"));
        assert_eq!(record.status().unwrap(), ScanStatus::Queued);

        let canceled = ScanRecord::new("T-5", ScanKind::Deep);
        canceled.request_cancel().unwrap();
        assert!(canceled.claim_run().is_err());
    }

    #[test]
    fn test_clean_run_is_done() {
        let record = running_record(0);
        assert_eq!(record.complete().unwrap(), ScanStatus::Done);
        let summary = record.summary().unwrap();
        assert_eq!(summary.score, Some(100));
        assert_eq!(summary.progress, 100);
    }

    #[test]
    fn test_config_only_while_queued() {
        let record = running_record(1);
        let err = record.set_config(Some("/other".into()), None).unwrap_err();
        assert!(matches!(err, Error::ScanNotQueued { .. }));
    }

    #[test]
    fn test_cancel_queued_is_immediate() {
        let record = ScanRecord::new("T-2", ScanKind::Deep);
        assert_eq!(record.request_cancel().unwrap(), ScanStatus::Canceled);
        assert!(record.is_cancel_requested());
        assert!(record.begin("/www").is_err());
    }

    #[test]
    fn test_cancel_running_reports_unclassified() {
        let record = running_record(5);
        record
            .record_classified("/www/a.php", 1, &verdict(Severity::Clean, RULE_NONE), String::new())
            .unwrap();
        assert_eq!(record.request_cancel().unwrap(), ScanStatus::Running);
        record.mark_canceled().unwrap();

        assert_eq!(record.status().unwrap(), ScanStatus::Canceled);
        let logs = record.logs_since(0).unwrap().lines;
        assert!(logs.last().unwrap().contains("4 files left unclassified"));
    }

    #[test]
    fn test_log_cursor() {
        let record = ScanRecord::new("T-3", ScanKind::Deep);
        record.append_log("one");
        record.append_log("two");

        let page = record.logs_since(0).unwrap();
        assert_eq!(page.lines.len(), 2);
        assert_eq!(page.cursor, 2);
        assert!(page.lines[0].ends_with("] one"));
        assert!(page.lines[0].starts_with('['));

        record.append_log("three");
        let page = record.logs_since(page.cursor).unwrap();
        assert_eq!(page.lines.len(), 1);
        assert!(page.lines[0].ends_with("three"));

        let page = record.logs_since(99).unwrap();
        assert!(page.lines.is_empty());
        assert_eq!(page.cursor, 3);
    }
}
