//! Remote directory walker.
//!
//! Lazily enumerates a remote tree depth-first. Directories are listed only
//! when the consumer asks for more entries, so traversal and scheduling stay
//! decoupled. Excluded directory names are pruned without being listed.

use crate::core::config::{RemoteConfig, ScanConfig};
use crate::core::error::Error;
use crate::core::types::RemoteFileDescriptor;
use crate::remote::{join_path, normalize_root, with_timeout, EntryKind, RemoteSession};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Walker filtering and timeout options.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Directory names never descended into
    pub exclude_dirs: HashSet<String>,
    /// Lowercase file extensions never yielded
    pub skip_extensions: HashSet<String>,
    /// Files larger than this are never yielded
    pub max_file_bytes: u64,
    /// Timeout for each directory listing
    pub list_timeout: Duration,
}

impl WalkOptions {
    pub fn from_config(scan: &ScanConfig, remote: &RemoteConfig) -> Self {
        Self {
            exclude_dirs: scan.exclude_dirs.iter().cloned().collect(),
            skip_extensions: scan
                .skip_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            max_file_bytes: scan.max_file_bytes,
            list_timeout: remote.op_timeout(),
        }
    }

    fn is_excluded_dir(&self, name: &str) -> bool {
        self.exclude_dirs.contains(name)
    }

    fn is_skipped_file(&self, name: &str, size: u64) -> bool {
        if size > self.max_file_bytes {
            return true;
        }
        if self.skip_extensions.is_empty() {
            return false;
        }
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                self.skip_extensions.contains(&ext.to_lowercase())
            }
            _ => false,
        }
    }
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default(), &RemoteConfig::default())
    }
}

/// Item produced by the walker.
#[derive(Debug)]
pub enum WalkEvent {
    /// A file to scan
    File(RemoteFileDescriptor),
    /// Listing a directory failed; its subtree is skipped
    ListFailed { dir: String, error: Error },
}

/// Depth-first lazy walk over a remote tree.
pub struct RemoteWalker {
    session: Arc<dyn RemoteSession>,
    options: WalkOptions,
    pending_dirs: Vec<String>,
    pending_files: VecDeque<RemoteFileDescriptor>,
    dirs_listed: u64,
}

impl RemoteWalker {
    pub fn new(session: Arc<dyn RemoteSession>, root: &str, options: WalkOptions) -> Self {
        Self {
            session,
            options,
            pending_dirs: vec![normalize_root(root)],
            pending_files: VecDeque::new(),
            dirs_listed: 0,
        }
    }

    /// Number of directories listed so far.
    pub fn dirs_listed(&self) -> u64 {
        self.dirs_listed
    }

    /// Next file or listing failure, or `None` when the tree is exhausted.
    pub async fn next(&mut self) -> Option<WalkEvent> {
        loop {
            if let Some(file) = self.pending_files.pop_front() {
                return Some(WalkEvent::File(file));
            }

            let dir = self.pending_dirs.pop()?;
            if let Err(error) = self.expand(&dir).await {
                return Some(WalkEvent::ListFailed { dir, error });
            }
        }
    }

    /// List one directory, queueing its files and subdirectories.
    async fn expand(&mut self, dir: &str) -> crate::core::error::Result<()> {
        let entries = with_timeout(
            "list",
            dir,
            self.options.list_timeout,
            self.session.list(dir),
        )
        .await?;
        self.dirs_listed += 1;

        let mut subdirs = Vec::new();
        for entry in entries {
            if entry.name.is_empty() || entry.name == "." || entry.name == ".." {
                continue;
            }

            match entry.kind {
                EntryKind::Directory => {
                    if self.options.is_excluded_dir(&entry.name) {
                        log::debug!("Pruning excluded directory {}", join_path(dir, &entry.name));
                        continue;
                    }
                    subdirs.push(join_path(dir, &entry.name));
                }
                EntryKind::File | EntryKind::Symlink => {
                    if self.options.is_skipped_file(&entry.name, entry.size) {
                        log::trace!("Skipping {}", join_path(dir, &entry.name));
                        continue;
                    }
                    self.pending_files
                        .push_back(RemoteFileDescriptor::new(join_path(dir, &entry.name), entry.size));
                }
                EntryKind::Other => {}
            }
        }

        // Reverse so the first listed subdirectory is visited first.
        self.pending_dirs.extend(subdirs.into_iter().rev());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryConnector, MemoryFs, RemoteConnector, RemoteCredentials};

    async fn walk_all(fs: Arc<MemoryFs>, root: &str, options: WalkOptions) -> (Vec<String>, Vec<String>) {
        let session = MemoryConnector::new(fs)
            .connect(&RemoteCredentials::password("memory", "u", "p"))
            .await
            .unwrap();
        let mut walker = RemoteWalker::new(session, root, options);

        let mut files = Vec::new();
        let mut failed = Vec::new();
        while let Some(event) = walker.next().await {
            match event {
                WalkEvent::File(desc) => files.push(desc.path),
                WalkEvent::ListFailed { dir, .. } => failed.push(dir),
            }
        }
        (files, failed)
    }

    #[tokio::test]
    async fn test_excluded_dirs_pruned() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_file("/www/index.php", "x")
            .add_file("/www/.git/config", "x")
            .add_file("/www/.git/objects/ab/cd", "x")
            .add_file("/www/node_modules/lib/index.js", "x")
            .add_file("/www/app/main.php", "x");

        let (files, failed) = walk_all(fs, "/www", WalkOptions::default()).await;
        assert!(failed.is_empty());
        assert_eq!(files, vec!["/www/index.php", "/www/app/main.php"]);
    }

    #[tokio::test]
    async fn test_list_failure_skips_subtree_only() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_file("/www/a/one.php", "x")
            .add_file("/www/b/two.php", "x")
            .add_file("/www/b/deep/three.php", "x")
            .add_file("/www/c/four.php", "x")
            .fail_list("/www/b");

        let (files, failed) = walk_all(fs, "/www/", WalkOptions::default()).await;
        assert_eq!(failed, vec!["/www/b"]);
        assert_eq!(files, vec!["/www/a/one.php", "/www/c/four.php"]);
    }

    #[tokio::test]
    async fn test_empty_dirs_and_zero_byte_files() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_dir("/www/empty/nested").add_file("/www/blank.php", "");

        let (files, failed) = walk_all(fs, "/www", WalkOptions::default()).await;
        assert!(failed.is_empty());
        assert_eq!(files, vec!["/www/blank.php"]);
    }

    #[tokio::test]
    async fn test_root_listing_failure() {
        let fs = Arc::new(MemoryFs::new());
        let (files, failed) = walk_all(fs, "/missing", WalkOptions::default()).await;
        assert!(files.is_empty());
        assert_eq!(failed, vec!["/missing"]);
    }

    #[tokio::test]
    async fn test_skip_extensions() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_file("/www/logo.PNG", "x")
            .add_file("/www/index.php", "x")
            .add_file("/www/.png", "x");

        let mut options = WalkOptions::default();
        options.skip_extensions.insert("png".to_string());

        let (files, _) = walk_all(fs, "/www", options).await;
        assert_eq!(files, vec!["/www/.png", "/www/index.php"]);
    }

    #[tokio::test]
    async fn test_default_skips_assets() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_file("/www/img/logo.png", "x")
            .add_file("/www/fonts/a.woff2", "x")
            .add_file("/www/backup.ZIP", "x")
            .add_file("/www/app.js.map", "x")
            .add_file("/www/app.js", "x")
            .add_file("/www/.htaccess", "x");

        let (files, _) = walk_all(fs, "/www", WalkOptions::default()).await;
        assert_eq!(files, vec!["/www/.htaccess", "/www/app.js"]);
    }

    #[tokio::test]
    async fn test_oversized_files_skipped() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_file("/www/at_limit.php", "1234")
            .add_file("/www/over_limit.php", "12345");

        let mut options = WalkOptions::default();
        options.max_file_bytes = 4;

        let (files, _) = walk_all(fs, "/www", options).await;
        assert_eq!(files, vec!["/www/at_limit.php"]);
        assert_eq!(WalkOptions::default().max_file_bytes, 32 * 1024 * 1024);
    }
}
