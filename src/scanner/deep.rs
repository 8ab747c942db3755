//! Deep scan run.
//!
//! Drives one record through a full run: precondition check, connect, walk,
//! worker pool, finalisation. Only configuration and connection-class
//! failures change the record's status to `error`; per-directory and
//! per-file failures are absorbed into the log.

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{RemoteFileDescriptor, ScanStatus};
use crate::detection::Classifier;
use crate::remote::{open_session, with_timeout, RemoteConnector, RemoteCredentials, RemoteSession};
use crate::scanner::pool::ScanPool;
use crate::scanner::reader::ReadPolicy;
use crate::scanner::record::ScanRecord;
use crate::scanner::walker::{RemoteWalker, WalkEvent, WalkOptions};
use std::collections::VecDeque;
use std::sync::Arc;

/// Executes deep scans against a remote connector.
pub struct DeepScanner {
    config: Arc<Config>,
    connector: Arc<dyn RemoteConnector>,
    classifier: Arc<Classifier>,
}

impl DeepScanner {
    pub fn new(
        config: Arc<Config>,
        connector: Arc<dyn RemoteConnector>,
        classifier: Arc<Classifier>,
    ) -> Self {
        Self {
            config,
            connector,
            classifier,
        }
    }

    /// Claim a queued record and run it to a terminal status.
    pub async fn run(&self, record: Arc<ScanRecord>) -> Result<ScanStatus> {
        record.claim_run()?;
        self.run_claimed(record).await
    }

    /// Run a record already reserved with [`ScanRecord::claim_run`].
    ///
    /// A record cancelled between the claim and this call ends as
    /// `canceled` without touching the remote side.
    pub async fn run_claimed(&self, record: Arc<ScanRecord>) -> Result<ScanStatus> {
        match record.status()? {
            ScanStatus::Queued => {}
            ScanStatus::Canceled => return Ok(ScanStatus::Canceled),
            status => {
                return Err(Error::ScanNotQueued {
                    scan_id: record.id().to_string(),
                    status: status.to_string(),
                })
            }
        }

        // Checked before any connection attempt.
        let (root, credentials) = match record.deep_scan_target()? {
            Some(target) => target,
            None => {
                let e = Error::MissingScanConfig {
                    scan_id: record.id().to_string(),
                };
                log::warn!("{}", e);
                record.fail(format!("fatal: {}", e))?;
                return Ok(ScanStatus::Error);
            }
        };

        if let Err(e) = record.begin(&root) {
            if record.status()? == ScanStatus::Canceled {
                return Ok(ScanStatus::Canceled);
            }
            return Err(e);
        }

        match self.execute(&record, &root, &credentials).await {
            Ok(()) if record.is_cancel_requested() => {
                record.mark_canceled()?;
                Ok(ScanStatus::Canceled)
            }
            Ok(()) => record.complete(),
            Err(e) => {
                log::error!("Deep scan {} failed ({}): {}", record.id(), e.category(), e);
                record.fail(format!("fatal: {}", e))?;
                Ok(ScanStatus::Error)
            }
        }
    }

    /// Connect, then walk and scan under the wall-clock cap. The session is
    /// closed on every path out, including the cap firing.
    async fn execute(
        &self,
        record: &Arc<ScanRecord>,
        root: &str,
        credentials: &RemoteCredentials,
    ) -> Result<()> {
        let session = open_session(self.connector.as_ref(), credentials, &self.config.remote).await?;

        let limit = self.config.scan.max_run();
        let result = tokio::time::timeout(limit, self.scan_tree(record, Arc::clone(&session), root))
            .await
            .unwrap_or_else(|_| {
                log::error!("Deep scan {} hit its wall-clock limit", record.id());
                Err(Error::ScanTimeout {
                    limit_secs: self.config.scan.max_run_secs,
                })
            });

        if let Err(e) = with_timeout("close", root, self.config.remote.op_timeout(), session.close()).await {
            log::debug!("Closing session for scan {} failed: {}", record.id(), e);
        }
        result
    }

    async fn scan_tree(
        &self,
        record: &Arc<ScanRecord>,
        session: Arc<dyn RemoteSession>,
        root: &str,
    ) -> Result<()> {
        let options = WalkOptions::from_config(&self.config.scan, &self.config.remote);
        let mut walker = RemoteWalker::new(Arc::clone(&session), root, options);

        let mut files: VecDeque<RemoteFileDescriptor> = VecDeque::new();
        while let Some(event) = walker.next().await {
            match event {
                WalkEvent::File(file) => files.push_back(file),
                WalkEvent::ListFailed { dir, error } => {
                    record.append_log(format!("list error {}: {}", dir, error));
                }
            }
            if record.is_cancel_requested() {
                record.append_log("walk stopped on cancellation");
                break;
            }
        }

        record.set_total_files(files.len() as u64)?;
        record.append_log(format!("files queued: {}", files.len()));
        log::debug!(
            "Scan {} listed {} directories under {}",
            record.id(),
            walker.dirs_listed(),
            root
        );

        let pool = ScanPool::new(
            self.config.scan.concurrency,
            ReadPolicy::from_config(&self.config.scan, self.config.remote.op_timeout()),
            Arc::clone(&self.classifier),
            self.config.scan.preview_chars,
        );
        let outcome = pool.run(session, files, Arc::clone(record)).await?;

        log::info!(
            "Scan {} processed {} files ({} not dispatched)",
            record.id(),
            outcome.processed,
            outcome.not_dispatched
        );
        Ok(())
    }
}
