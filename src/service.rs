//! Scan service: the inbound boundary used by the API layer.
//!
//! Owns the registry and wires records to the deep scanner and the
//! quarantine executor. Deep scans run as supervised tokio tasks; the caller
//! gets a [`ScanHandle`] to cancel or await them.

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{
    ActionOutcome, Finding, LogPage, ScanAction, ScanKind, ScanStatus, ScanSummary, Severity,
};
use crate::detection::Classifier;
use crate::quarantine::QuarantineExecutor;
use crate::remote::{RemoteConnector, RemoteCredentials};
use crate::scanner::{DeepScanner, ScanRecord, ScanRegistry};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Handle to a running deep scan.
pub struct ScanHandle {
    record: Arc<ScanRecord>,
    task: JoinHandle<()>,
}

impl ScanHandle {
    pub fn scan_id(&self) -> &str {
        self.record.id()
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) -> Result<ScanStatus> {
        self.record.request_cancel()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end and return the final summary.
    pub async fn join(self) -> Result<ScanSummary> {
        self.task
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))?;
        self.record.summary()
    }
}

/// Entry point for creating, running and inspecting scans.
pub struct ScanService {
    config: Arc<Config>,
    registry: Arc<ScanRegistry>,
    scanner: Arc<DeepScanner>,
    quarantine: Arc<QuarantineExecutor>,
}

impl ScanService {
    /// Create a service with the built-in classifier rules.
    pub fn new(config: Config, connector: Arc<dyn RemoteConnector>) -> Result<Self> {
        config.validate()?;
        let classifier = Classifier::with_default_rules(&config.detection)?;
        Ok(Self::with_classifier(config, connector, classifier))
    }

    /// Create a service with a custom classifier.
    pub fn with_classifier(
        config: Config,
        connector: Arc<dyn RemoteConnector>,
        classifier: Classifier,
    ) -> Self {
        let config = Arc::new(config);
        let scanner = DeepScanner::new(
            Arc::clone(&config),
            Arc::clone(&connector),
            Arc::new(classifier),
        );
        let quarantine = QuarantineExecutor::new(
            config.quarantine.clone(),
            config.remote.clone(),
            connector,
        );

        Self {
            config,
            registry: Arc::new(ScanRegistry::new()),
            scanner: Arc::new(scanner),
            quarantine: Arc::new(quarantine),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ScanRegistry> {
        &self.registry
    }

    /// Allocate a queued record and return its id.
    pub fn create_scan(&self, ticket_id: &str, kind: ScanKind) -> Result<String> {
        let record = self.registry.insert(ScanRecord::new(ticket_id, kind))?;
        record.append_log(format!("scan created kind={}", kind));
        Ok(record.id().to_string())
    }

    /// Set the root path and/or remote credentials of a queued scan.
    pub fn set_scan_config(
        &self,
        scan_id: &str,
        root_path: Option<String>,
        credentials: Option<RemoteCredentials>,
    ) -> Result<()> {
        self.registry.get(scan_id)?.set_config(root_path, credentials)
    }

    /// Start a queued deep scan on the current tokio runtime.
    ///
    /// The record is claimed before the task is spawned, so a repeated start
    /// gets `ScanNotQueued` and cannot disturb the first run. Incomplete
    /// configuration is not an error here: the run moves the record to
    /// `error` before any connection attempt.
    pub fn start_deep_scan(&self, scan_id: &str) -> Result<ScanHandle> {
        let record = self.registry.get(scan_id)?;
        if record.kind() != ScanKind::Deep {
            return Err(Error::UnsupportedScanKind(record.kind().to_string()));
        }
        record.claim_run()?;

        let scanner = Arc::clone(&self.scanner);
        let task_record = Arc::clone(&record);
        let task = tokio::spawn(async move {
            let id = task_record.id().to_string();
            match scanner.run_claimed(Arc::clone(&task_record)).await {
                Ok(status) => log::info!("Scan {} ended with status {}", id, status),
                Err(e) if e.is_lifecycle_rejection() => {
                    log::warn!("Scan {} run rejected: {}", id, e);
                }
                Err(e) => {
                    log::error!("Scan {} supervisor caught: {}", id, e);
                    if let Err(fail_err) = task_record.fail(format!("fatal: {}", e)) {
                        log::warn!("Scan {} could not be marked failed: {}", id, fail_err);
                    }
                }
            }
        });

        Ok(ScanHandle { record, task })
    }

    /// Request cancellation of a scan.
    pub fn cancel_scan(&self, scan_id: &str) -> Result<ScanStatus> {
        self.registry.get(scan_id)?.request_cancel()
    }

    /// Remove a scan from the registry, cancelling it first if still active.
    pub fn delete_scan(&self, scan_id: &str) -> Result<()> {
        let record = self.registry.remove(scan_id)?;
        if !record.status()?.is_terminal() {
            record.request_cancel()?;
        }
        log::info!("Scan {} deleted", scan_id);
        Ok(())
    }

    pub fn get_scan_summary(&self, scan_id: &str) -> Result<ScanSummary> {
        self.registry.get(scan_id)?.summary()
    }

    pub fn get_findings(&self, scan_id: &str, severity: Option<Severity>) -> Result<Vec<Finding>> {
        self.registry.get(scan_id)?.findings(severity)
    }

    pub fn get_logs(&self, scan_id: &str, cursor: usize) -> Result<LogPage> {
        self.registry.get(scan_id)?.logs_since(cursor)
    }

    /// Run a remediation action against a scan's findings.
    pub async fn run_action(
        &self,
        scan_id: &str,
        action: ScanAction,
        dry_run: bool,
    ) -> Result<ActionOutcome> {
        let record = self.registry.get(scan_id)?;

        let processed = match action {
            ScanAction::Quarantine => {
                let paths = record.malicious_paths()?;
                self.quarantine.quarantine(&record, &paths, dry_run).await
            }
            ScanAction::CoreRestore => {
                record.append_log("core_restore requested (stub)");
                0
            }
        };

        Ok(ActionOutcome {
            action,
            dry_run,
            processed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryConnector, MemoryFs};
    use std::time::Duration;

    fn service(fs: &Arc<MemoryFs>) -> ScanService {
        let mut config = Config::default();
        config.remote.connect_attempts = 1;
        ScanService::new(config, Arc::new(MemoryConnector::new(Arc::clone(fs)))).unwrap()
    }

    fn creds() -> RemoteCredentials {
        RemoteCredentials::password("memory", "deploy", "secret")
    }

    fn site() -> Arc<MemoryFs> {
        let fs = Arc::new(MemoryFs::new());
        fs.add_file("/www/index.php", "<?php echo 'ok';")
            .add_file("/www/wp-content/uploads/x.php", "<?php passthru($_REQUEST['c']);")
            .add_file("/www/wp-content/uploads/y.php", "<?php // wso_shell")
            .add_file("/www/lib/pack.js", "eval(atob('ZXZpbA=='))")
            .add_file("/www/vendor/pkg/shell.php", "c99");
        fs
    }

    #[tokio::test]
    async fn test_end_to_end_scan_and_quarantine() {
        let fs = site();
        let service = service(&fs);

        let id = service.create_scan("T-100", ScanKind::Deep).unwrap();
        service
            .set_scan_config(&id, Some("/www".into()), Some(creds()))
            .unwrap();

        let summary = service.start_deep_scan(&id).unwrap().join().await.unwrap();
        assert_eq!(summary.status, ScanStatus::Issues);
        assert_eq!(summary.counts.malicious, 2);
        assert_eq!(summary.counts.suspicious, 1);
        assert_eq!(summary.counts.clean, 1);
        assert_eq!(summary.score, Some(0));
        assert_eq!(summary.progress, 100);

        let findings = service.get_findings(&id, Some(Severity::Malicious)).unwrap();
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.rule == "yara_webshell"));

        let dry = service
            .run_action(&id, ScanAction::Quarantine, true)
            .await
            .unwrap();
        assert_eq!(dry.processed, 2);
        assert!(fs.renames().is_empty());

        let live = service
            .run_action(&id, ScanAction::Quarantine, false)
            .await
            .unwrap();
        assert_eq!(live.processed, 2);
        assert_eq!(fs.files_in("/www/.quarantine").len(), 2);
        assert!(fs.exists("/www/lib/pack.js"));

        // Status and counts stay frozen after remediation.
        let after = service.get_scan_summary(&id).unwrap();
        assert_eq!(after.status, ScanStatus::Issues);
        assert_eq!(after.counts, summary.counts);
    }

    #[tokio::test]
    async fn test_log_cursor_returns_each_line_once() {
        let fs = site();
        let service = service(&fs);
        let id = service.create_scan("T-1", ScanKind::Deep).unwrap();
        service
            .set_scan_config(&id, Some("/www".into()), Some(creds()))
            .unwrap();
        let handle = service.start_deep_scan(&id).unwrap();

        let mut cursor = 0;
        let mut collected = Vec::new();
        loop {
            let finished = handle.is_finished();
            let page = service.get_logs(&id, cursor).unwrap();
            cursor = page.cursor;
            collected.extend(page.lines);
            if finished {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle.join().await.unwrap();
        let tail = service.get_logs(&id, cursor).unwrap();
        collected.extend(tail.lines);

        let all = service.get_logs(&id, 0).unwrap();
        assert_eq!(collected, all.lines);
        assert_eq!(service.get_logs(&id, cursor).unwrap().cursor, all.cursor);
    }

    #[tokio::test]
    async fn test_missing_root_goes_straight_to_error() {
        let fs = site();
        let service = service(&fs);
        let id = service.create_scan("T-2", ScanKind::Deep).unwrap();
        service.set_scan_config(&id, None, Some(creds())).unwrap();

        let summary = service.start_deep_scan(&id).unwrap().join().await.unwrap();
        assert_eq!(summary.status, ScanStatus::Error);
        assert!(summary.started_at.is_none());
        assert_eq!(fs.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_start_rejections() {
        let fs = site();
        let service = service(&fs);

        let quick = service.create_scan("T-3", ScanKind::Quick).unwrap();
        assert!(matches!(
            service.start_deep_scan(&quick),
            Err(Error::UnsupportedScanKind(_))
        ));
        assert_eq!(
            service.get_scan_summary(&quick).unwrap().status,
            ScanStatus::Queued
        );

        let deep = service.create_scan("T-3", ScanKind::Deep).unwrap();
        service.cancel_scan(&deep).unwrap();
        assert!(matches!(
            service.start_deep_scan(&deep),
            Err(Error::ScanNotQueued { .. })
        ));

        assert!(matches!(
            service.start_deep_scan("nope"),
            Err(Error::ScanNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_running_scan() {
        let fs = site();
        fs.set_read_delay(Duration::from_millis(50));
        let mut config = Config::default();
        config.remote.connect_attempts = 1;
        config.scan.concurrency = 1;
        let service = ScanService::new(config, Arc::new(MemoryConnector::new(Arc::clone(&fs)))).unwrap();

        let id = service.create_scan("T-4", ScanKind::Deep).unwrap();
        service
            .set_scan_config(&id, Some("/www".into()), Some(creds()))
            .unwrap();
        let handle = service.start_deep_scan(&id).unwrap();

        while fs.read_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle.cancel().unwrap();
        let summary = handle.join().await.unwrap();

        assert_eq!(summary.status, ScanStatus::Canceled);
        assert!(summary.counts.classified() + summary.failed < 4);
        assert_eq!(summary.score, None);
    }

    #[tokio::test]
    async fn test_second_start_leaves_first_run_intact() {
        let fs = site();
        let service = service(&fs);
        let id = service.create_scan("T-7", ScanKind::Deep).unwrap();
        service
            .set_scan_config(&id, Some("/www".into()), Some(creds()))
            .unwrap();

        let first = service.start_deep_scan(&id).unwrap();
        assert!(matches!(
            service.start_deep_scan(&id),
            Err(Error::ScanNotQueued { .. })
        ));

        let summary = first.join().await.unwrap();
        assert_eq!(summary.status, ScanStatus::Issues);
        assert_eq!(summary.counts.malicious, 2);
        assert_eq!(summary.counts.classified(), 4);
        assert_eq!(fs.connect_count(), 1);

        let logs = service.get_logs(&id, 0).unwrap().lines;
        assert!(logs.iter().all(|l| !l.contains("fatal")));
        assert_eq!(
            logs.iter().filter(|l| l.contains("deep-scan started")).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_cancel_before_task_runs() {
        let fs = site();
        let service = service(&fs);
        let id = service.create_scan("T-8", ScanKind::Deep).unwrap();
        service
            .set_scan_config(&id, Some("/www".into()), Some(creds()))
            .unwrap();

        let handle = service.start_deep_scan(&id).unwrap();
        assert_eq!(service.cancel_scan(&id).unwrap(), ScanStatus::Canceled);

        let summary = handle.join().await.unwrap();
        assert_eq!(summary.status, ScanStatus::Canceled);
        assert_eq!(fs.connect_count(), 0);

        let logs = service.get_logs(&id, 0).unwrap().lines;
        assert!(logs.last().unwrap().contains("scan canceled before start"));
        assert!(logs.iter().all(|l| !l.contains("fatal")));
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let fs = site();
        fs.set_read_delay(Duration::from_millis(20));
        let mut config = Config::default();
        config.remote.connect_attempts = 1;
        config.scan.concurrency = 1;
        let service = ScanService::new(config, Arc::new(MemoryConnector::new(Arc::clone(&fs)))).unwrap();

        let id = service.create_scan("T-9", ScanKind::Deep).unwrap();
        service
            .set_scan_config(&id, Some("/www".into()), Some(creds()))
            .unwrap();
        let handle = service.start_deep_scan(&id).unwrap();

        let mut samples = Vec::new();
        while !handle.is_finished() {
            samples.push(service.get_scan_summary(&id).unwrap().progress);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let summary = handle.join().await.unwrap();
        samples.push(summary.progress);

        assert!(samples.windows(2).all(|w| w[0] <= w[1]), "{:?}", samples);
        assert!(samples.iter().any(|p| *p > 0 && *p < 100), "{:?}", samples);
        assert_eq!(summary.status, ScanStatus::Issues);
        assert_eq!(*samples.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn test_core_restore_is_stub() {
        let fs = site();
        let service = service(&fs);
        let id = service.create_scan("T-5", ScanKind::Deep).unwrap();

        let outcome = service
            .run_action(&id, ScanAction::CoreRestore, false)
            .await
            .unwrap();
        assert_eq!(outcome.processed, 0);
        let logs = service.get_logs(&id, 0).unwrap().lines;
        assert!(logs.last().unwrap().contains("core_restore requested (stub)"));
    }

    #[tokio::test]
    async fn test_delete_scan() {
        let fs = site();
        let service = service(&fs);
        let id = service.create_scan("T-6", ScanKind::Deep).unwrap();
        service.delete_scan(&id).unwrap();
        assert!(matches!(
            service.get_scan_summary(&id),
            Err(Error::ScanNotFound(_))
        ));
    }
}
