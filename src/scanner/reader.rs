//! Partial-read policy for remote files.
//!
//! Small files are read whole. Large files are reduced to a head and a tail
//! segment joined by [`SEPARATOR`], which still catches payloads injected at
//! the top or appended to the end of a file.

use crate::core::config::ScanConfig;
use crate::core::error::Result;
use crate::core::types::RemoteFileDescriptor;
use crate::remote::{with_timeout, RemoteSession};
use std::time::Duration;

/// Marker placed between head and tail segments.
pub const SEPARATOR: &[u8] = b"\n...\n";

/// How a file of a given size is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPlan {
    /// Zero-byte file, no remote call
    Empty,
    Full,
    /// Head `0..head_end` and tail `tail_start..size`
    HeadTail { head_end: u64, tail_start: u64, size: u64 },
}

/// Size thresholds and timeout for fetching file content.
#[derive(Debug, Clone)]
pub struct ReadPolicy {
    pub max_full_read: u64,
    pub sample: u64,
    pub read_timeout: Duration,
}

impl ReadPolicy {
    pub fn new(max_full_read: u64, sample: u64, read_timeout: Duration) -> Self {
        Self {
            max_full_read,
            sample,
            read_timeout,
        }
    }

    pub fn from_config(config: &ScanConfig, read_timeout: Duration) -> Self {
        Self::new(config.max_full_read_bytes, config.sample_bytes, read_timeout)
    }

    /// Decide how to read a file of `size` bytes.
    pub fn plan(&self, size: u64) -> ReadPlan {
        if size == 0 {
            ReadPlan::Empty
        } else if size <= self.max_full_read {
            ReadPlan::Full
        } else {
            let sample = self.sample.min(size);
            ReadPlan::HeadTail {
                head_end: sample,
                tail_start: size - sample,
                size,
            }
        }
    }

    /// Fetch the buffer to classify for one file.
    pub async fn fetch(&self, session: &dyn RemoteSession, file: &RemoteFileDescriptor) -> Result<Vec<u8>> {
        let path = file.path.as_str();
        match self.plan(file.size) {
            ReadPlan::Empty => Ok(Vec::new()),
            ReadPlan::Full => {
                with_timeout("read", path, self.read_timeout, session.read(path, None)).await
            }
            ReadPlan::HeadTail {
                head_end,
                tail_start,
                size,
            } => {
                let head = with_timeout(
                    "read",
                    path,
                    self.read_timeout,
                    session.read(path, Some(0..head_end)),
                )
                .await?;
                let tail = with_timeout(
                    "read",
                    path,
                    self.read_timeout,
                    session.read(path, Some(tail_start..size)),
                )
                .await?;

                let mut buf = Vec::with_capacity(head.len() + SEPARATOR.len() + tail.len());
                buf.extend_from_slice(&head);
                buf.extend_from_slice(SEPARATOR);
                buf.extend_from_slice(&tail);
                Ok(buf)
            }
        }
    }
}
