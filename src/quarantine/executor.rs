//! Quarantine executor.
//!
//! Moves malicious files into a quarantine directory under the scan root and
//! restricts their permissions. Every path is handled in isolation: a failed
//! rename is logged and skipped while the remaining paths are still
//! processed. Only a failure to open the session aborts the whole run.

use crate::core::config::{QuarantineConfig, RemoteConfig};
use crate::remote::{basename, join_path, open_session, with_timeout, RemoteConnector, RemoteSession};
use crate::scanner::record::ScanRecord;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

/// Moves flagged files into quarantine over a remote session.
pub struct QuarantineExecutor {
    config: QuarantineConfig,
    remote: RemoteConfig,
    connector: Arc<dyn RemoteConnector>,
}

impl QuarantineExecutor {
    pub fn new(
        config: QuarantineConfig,
        remote: RemoteConfig,
        connector: Arc<dyn RemoteConnector>,
    ) -> Self {
        Self {
            config,
            remote,
            connector,
        }
    }

    /// Quarantine `paths` for `record` and return the number processed.
    ///
    /// Only paths that are currently malicious findings of the record are
    /// touched. In dry-run mode intended moves are logged and counted without
    /// touching the remote filesystem.
    pub async fn quarantine(&self, record: &ScanRecord, paths: &[String], dry_run: bool) -> usize {
        let (root, credentials) = match record.deep_scan_target() {
            Ok(Some(target)) => target,
            Ok(None) => return 0,
            Err(e) => {
                log::error!("Quarantine for scan {} aborted: {}", record.id(), e);
                return 0;
            }
        };
        if paths.is_empty() {
            return 0;
        }

        let targets = match self.eligible(record, paths) {
            Some(targets) if !targets.is_empty() => targets,
            _ => return 0,
        };

        let session = match open_session(self.connector.as_ref(), &credentials, &self.remote).await {
            Ok(session) => session,
            Err(e) => {
                record.append_log(format!("quarantine error: {}", e));
                return 0;
            }
        };

        let qdir = join_path(&root, &self.config.dir_name);
        if dry_run {
            log::debug!("Dry run, not creating {}", qdir);
        } else if let Err(e) = with_timeout(
            "mkdir",
            &qdir,
            self.remote.op_timeout(),
            session.mkdir(&qdir, true),
        )
        .await
        {
            // Usually means the directory already exists.
            log::debug!("Quarantine directory {} not created: {}", qdir, e);
        }

        let processed = self
            .process(record, session.as_ref(), &qdir, &targets, dry_run)
            .await;

        if let Err(e) = with_timeout("close", &root, self.remote.op_timeout(), session.close()).await {
            log::debug!("Closing quarantine session failed: {}", e);
        }

        record.append_log(format!(
            "quarantine finished processed={} of {} dry_run={}",
            processed,
            targets.len(),
            dry_run
        ));
        processed
    }

    /// Requested paths that are malicious findings, deduplicated in request order.
    fn eligible(&self, record: &ScanRecord, paths: &[String]) -> Option<Vec<String>> {
        let malicious: HashSet<String> = match record.malicious_paths() {
            Ok(paths) => paths.into_iter().collect(),
            Err(e) => {
                log::error!("Quarantine for scan {} aborted: {}", record.id(), e);
                return None;
            }
        };

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for path in paths {
            if !malicious.contains(path) {
                record.append_log(format!("quarantine skipped {}: not a malicious finding", path));
                continue;
            }
            if seen.insert(path.as_str()) {
                targets.push(path.clone());
            }
        }
        Some(targets)
    }

    async fn process(
        &self,
        record: &ScanRecord,
        session: &dyn RemoteSession,
        qdir: &str,
        targets: &[String],
        dry_run: bool,
    ) -> usize {
        let op_timeout = self.remote.op_timeout();
        let mut names = QuarantineNames::new();
        let mut processed = 0;

        for path in targets {
            let target = join_path(qdir, &names.next(basename(path)));

            if dry_run {
                record.append_log(format!("[dry] quarantine {} -> {}", path, target));
                processed += 1;
                continue;
            }

            if let Err(e) = with_timeout("rename", path, op_timeout, session.rename(path, &target)).await {
                record.append_log(format!("rename failed: {}: {}", path, e));
                continue;
            }

            if let Err(e) = with_timeout(
                "chmod",
                &target,
                op_timeout,
                session.chmod(&target, self.config.file_mode),
            )
            .await
            {
                log::warn!("Could not restrict permissions on {}: {}", target, e);
            }

            record.append_log(format!("quarantined {} -> {}", path, target));
            processed += 1;
        }

        processed
    }
}

/// Generates `<unix-millis>-<basename>` names, unique within one run.
struct QuarantineNames {
    used: HashSet<String>,
}

impl QuarantineNames {
    fn new() -> Self {
        Self {
            used: HashSet::new(),
        }
    }

    fn next(&mut self, base: &str) -> String {
        let mut millis = Utc::now().timestamp_millis();
        loop {
            let name = format!("{}-{}", millis, base);
            if self.used.insert(name.clone()) {
                return name;
            }
            millis += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DetectionConfig;
    use crate::core::types::{ScanKind, ScanStatus};
    use crate::detection::Classifier;
    use crate::remote::{MemoryConnector, MemoryFs, RemoteCredentials};

    const SHELL: &str = "<?php eval($_GET['x']);";

    fn infected_site(count: usize) -> Arc<MemoryFs> {
        let fs = Arc::new(MemoryFs::new());
        for i in 0..count {
            fs.add_file(&format!("/www/s{}.php", i), SHELL);
        }
        fs
    }

    fn scanned_record(paths: &[String]) -> ScanRecord {
        let record = ScanRecord::new("T-1", ScanKind::Deep);
        record
            .set_config(
                Some("/www".into()),
                Some(RemoteCredentials::password("memory", "u", "p")),
            )
            .unwrap();
        record.begin("/www").unwrap();
        record.set_total_files(paths.len() as u64).unwrap();
        let classifier = Classifier::with_default_rules(&DetectionConfig::default()).unwrap();
        let verdict = classifier.classify(SHELL.as_bytes());
        for path in paths {
            record
                .record_classified(path, SHELL.len() as u64, &verdict, SHELL.into())
                .unwrap();
        }
        assert_eq!(record.complete().unwrap(), ScanStatus::Issues);
        record
    }

    fn executor(fs: &Arc<MemoryFs>) -> QuarantineExecutor {
        let remote = RemoteConfig {
            connect_attempts: 1,
            ..RemoteConfig::default()
        };
        QuarantineExecutor::new(
            QuarantineConfig::default(),
            remote,
            Arc::new(MemoryConnector::new(Arc::clone(fs))),
        )
    }

    fn paths(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("/www/s{}.php", i)).collect()
    }

    #[tokio::test]
    async fn test_dry_run_has_no_side_effects() {
        let fs = infected_site(3);
        let record = scanned_record(&paths(3));

        let processed = executor(&fs).quarantine(&record, &paths(3), true).await;
        assert_eq!(processed, 3);
        assert!(fs.renames().is_empty());
        assert!(!fs.exists("/www/.quarantine"));
        for path in paths(3) {
            assert!(fs.exists(&path));
        }

        let logs = record.logs_since(0).unwrap().lines;
        assert_eq!(logs.iter().filter(|l| l.contains("[dry] quarantine")).count(), 3);
    }

    #[tokio::test]
    async fn test_live_run_moves_and_locks() {
        let fs = infected_site(2);
        let record = scanned_record(&paths(2));

        let processed = executor(&fs).quarantine(&record, &paths(2), false).await;
        assert_eq!(processed, 2);
        assert!(fs.is_dir("/www/.quarantine"));

        let moved = fs.files_in("/www/.quarantine");
        assert_eq!(moved.len(), 2);
        for file in &moved {
            assert_eq!(fs.file_mode(file), Some(0o400));
            assert!(file.ends_with("-s0.php") || file.ends_with("-s1.php"));
        }
        assert!(!fs.exists("/www/s0.php"));
    }

    #[tokio::test]
    async fn test_partial_failure_continues() {
        let fs = infected_site(3);
        fs.fail_rename("/www/s1.php");
        let record = scanned_record(&paths(3));

        let processed = executor(&fs).quarantine(&record, &paths(3), false).await;
        assert_eq!(processed, 2);
        assert!(fs.exists("/www/s1.php"));
        assert!(!fs.exists("/www/s0.php"));
        assert!(!fs.exists("/www/s2.php"));

        let logs = record.logs_since(0).unwrap().lines;
        assert!(logs
            .iter()
            .any(|l| l.contains("rename failed: /www/s1.php")));
    }

    #[tokio::test]
    async fn test_existing_quarantine_dir_tolerated() {
        let fs = infected_site(1);
        fs.add_file("/www/.quarantine/1-old.php", "x");
        let record = scanned_record(&paths(1));

        let processed = executor(&fs).quarantine(&record, &paths(1), false).await;
        assert_eq!(processed, 1);
        assert_eq!(fs.files_in("/www/.quarantine").len(), 2);
    }

    #[tokio::test]
    async fn test_only_malicious_findings_are_touched() {
        let fs = infected_site(2);
        fs.add_file("/www/clean.php", "<?php echo 1;");
        let record = scanned_record(&paths(1));

        let requested = vec!["/www/s0.php".to_string(), "/www/clean.php".to_string()];
        let processed = executor(&fs).quarantine(&record, &requested, false).await;
        assert_eq!(processed, 1);
        assert!(fs.exists("/www/clean.php"));
    }

    #[tokio::test]
    async fn test_no_config_or_no_paths_is_noop() {
        let fs = infected_site(1);
        let record = ScanRecord::new("T-1", ScanKind::Deep);
        assert_eq!(executor(&fs).quarantine(&record, &paths(1), false).await, 0);

        let record = scanned_record(&paths(1));
        assert_eq!(executor(&fs).quarantine(&record, &[], false).await, 0);
        assert_eq!(fs.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_aborts() {
        let fs = infected_site(2);
        let record = scanned_record(&paths(2));
        fs.refuse_connections(true);

        assert_eq!(executor(&fs).quarantine(&record, &paths(2), false).await, 0);
        let logs = record.logs_since(0).unwrap().lines;
        assert!(logs.last().unwrap().contains("quarantine error:"));
    }

    #[test]
    fn test_names_unique_within_run() {
        let mut names = QuarantineNames::new();
        let a = names.next("index.php");
        let b = names.next("index.php");
        assert_ne!(a, b);
        assert!(a.ends_with("-index.php"));
    }
}
