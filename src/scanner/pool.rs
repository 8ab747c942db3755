//! Bounded scan worker pool.
//!
//! Up to `concurrency` workers pull file descriptors from a shared queue,
//! fetch content through the read policy and classify it. Each worker has at
//! most one remote read outstanding, which caps in-flight reads at the worker
//! count. Outcomes flow over a channel to a single collector that applies
//! them to the scan record, so record updates never interleave.

use crate::core::error::{Error, Result};
use crate::core::types::RemoteFileDescriptor;
use crate::detection::{Classification, Classifier};
use crate::remote::RemoteSession;
use crate::scanner::reader::ReadPolicy;
use crate::scanner::record::ScanRecord;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Terminal outcome for one file.
#[derive(Debug)]
pub enum FileOutcome {
    Classified {
        path: String,
        bytes: u64,
        verdict: Classification,
        preview: String,
    },
    Failed {
        path: String,
        error: Error,
    },
}

/// What the pool did with its queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    /// Files that reached a terminal outcome
    pub processed: u64,
    /// Files left in the queue because of cancellation
    pub not_dispatched: u64,
}

/// Leading characters of the decoded buffer.
pub fn preview(data: &[u8], max_chars: usize) -> String {
    String::from_utf8_lossy(data).chars().take(max_chars).collect()
}

/// Fixed-size pool of scan workers.
pub struct ScanPool {
    concurrency: usize,
    policy: ReadPolicy,
    classifier: Arc<Classifier>,
    preview_chars: usize,
}

impl ScanPool {
    pub fn new(
        concurrency: usize,
        policy: ReadPolicy,
        classifier: Arc<Classifier>,
        preview_chars: usize,
    ) -> Self {
        Self {
            concurrency: concurrency.max(1),
            policy,
            classifier,
            preview_chars,
        }
    }

    /// Scan every queued file, writing outcomes into `record`.
    ///
    /// Returns once every dispatched file has an outcome. When the record's
    /// cancellation flag is raised, workers stop taking new files and the
    /// rest of the queue is reported as not dispatched.
    pub async fn run(
        &self,
        session: Arc<dyn RemoteSession>,
        files: VecDeque<RemoteFileDescriptor>,
        record: Arc<ScanRecord>,
    ) -> Result<PoolOutcome> {
        let num_workers = self.concurrency.min(files.len());
        let queue = Arc::new(Mutex::new(files));
        let (tx, mut rx) = mpsc::channel::<FileOutcome>(self.concurrency * 4);

        let mut workers = JoinSet::new();
        for worker_id in 0..num_workers {
            let queue = Arc::clone(&queue);
            let session = Arc::clone(&session);
            let classifier = Arc::clone(&self.classifier);
            let record = Arc::clone(&record);
            let policy = self.policy.clone();
            let preview_chars = self.preview_chars;
            let tx = tx.clone();

            workers.spawn(async move {
                loop {
                    if record.is_cancel_requested() {
                        log::debug!("Worker {} stopping on cancellation", worker_id);
                        break;
                    }

                    let next = match queue.lock() {
                        Ok(mut q) => q.pop_front(),
                        Err(_) => {
                            log::error!("File queue lock poisoned in worker {}", worker_id);
                            break;
                        }
                    };
                    let file = match next {
                        Some(file) => file,
                        None => break,
                    };

                    let outcome = match policy.fetch(session.as_ref(), &file).await {
                        Ok(data) => FileOutcome::Classified {
                            verdict: classifier.classify(&data),
                            preview: preview(&data, preview_chars),
                            bytes: data.len() as u64,
                            path: file.path,
                        },
                        Err(error) => FileOutcome::Failed {
                            path: file.path,
                            error,
                        },
                    };

                    if tx.send(outcome).await.is_err() {
                        break;
                    }
                }
            });
        }

        // Channel closes once every worker has dropped its sender.
        drop(tx);

        let mut processed = 0u64;
        while let Some(outcome) = rx.recv().await {
            match outcome {
                FileOutcome::Classified {
                    path,
                    bytes,
                    verdict,
                    preview,
                } => record.record_classified(&path, bytes, &verdict, preview)?,
                FileOutcome::Failed { path, error } => record.record_failure(&path, &error)?,
            }
            processed += 1;
        }

        while let Some(joined) = workers.join_next().await {
            joined.map_err(|e| Error::TaskJoin(e.to_string()))?;
        }

        let not_dispatched = queue
            .lock()
            .map_err(|_| Error::lock_poisoned("file queue (drain)"))?
            .len() as u64;

        Ok(PoolOutcome {
            processed,
            not_dispatched,
        })
    }
}
