//! In-memory remote filesystem.
//!
//! Holds a tree of directories and files behind a mutex and implements the
//! session capability against it. Individual paths can be made to fail on
//! list/read/rename/chmod, connections can be refused, and reads can be
//! slowed down. The highest number of simultaneous reads is recorded.

use super::{basename, EntryKind, RemoteConnector, RemoteCredentials, RemoteEntry, RemoteSession};
use crate::core::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File { data: Vec<u8>, mode: u32 },
}

#[derive(Debug, Default)]
struct MemoryState {
    nodes: BTreeMap<String, Node>,
    failing_lists: HashSet<String>,
    failing_reads: HashSet<String>,
    failing_renames: HashSet<String>,
    failing_chmods: HashSet<String>,
    refuse_connect: bool,
    read_delay: Option<Duration>,
    renames: Vec<(String, String)>,
}

/// In-memory filesystem tree shared by all sessions opened on it.
#[derive(Debug)]
pub struct MemoryFs {
    state: Mutex<MemoryState>,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "/",
    }
}

impl MemoryFs {
    /// Create an empty tree containing only `/`.
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        state.nodes.insert("/".to_string(), Node::Dir);
        Self {
            state: Mutex::new(state),
            reads: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_dirs(state: &mut MemoryState, dir: &str) {
        let mut current = String::new();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            state.nodes.entry(current.clone()).or_insert(Node::Dir);
        }
    }

    /// Add a file, creating parent directories as needed.
    pub fn add_file(&self, path: &str, data: impl Into<Vec<u8>>) -> &Self {
        let mut state = self.state();
        Self::ensure_dirs(&mut state, parent_of(path));
        state.nodes.insert(
            path.to_string(),
            Node::File {
                data: data.into(),
                mode: 0o644,
            },
        );
        drop(state);
        self
    }

    /// Add a directory and its parents.
    pub fn add_dir(&self, path: &str) -> &Self {
        Self::ensure_dirs(&mut self.state(), path);
        self
    }

    pub fn fail_list(&self, path: &str) -> &Self {
        self.state().failing_lists.insert(path.to_string());
        self
    }

    pub fn fail_read(&self, path: &str) -> &Self {
        self.state().failing_reads.insert(path.to_string());
        self
    }

    pub fn fail_rename(&self, path: &str) -> &Self {
        self.state().failing_renames.insert(path.to_string());
        self
    }

    pub fn fail_chmod(&self, path: &str) -> &Self {
        self.state().failing_chmods.insert(path.to_string());
        self
    }

    pub fn refuse_connections(&self, refuse: bool) -> &Self {
        self.state().refuse_connect = refuse;
        self
    }

    /// Delay every read by `delay`.
    pub fn set_read_delay(&self, delay: Duration) -> &Self {
        self.state().read_delay = Some(delay);
        self
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state().nodes.contains_key(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.state().nodes.get(path), Some(Node::Dir))
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.state().nodes.get(path) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn file_mode(&self, path: &str) -> Option<u32> {
        match self.state().nodes.get(path) {
            Some(Node::File { mode, .. }) => Some(*mode),
            _ => None,
        }
    }

    /// Files directly inside `dir`.
    pub fn files_in(&self, dir: &str) -> Vec<String> {
        self.state()
            .nodes
            .iter()
            .filter(|(path, node)| matches!(node, Node::File { .. }) && parent_of(path) == dir)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Completed renames, in order.
    pub fn renames(&self) -> Vec<(String, String)> {
        self.state().renames.clone()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Highest number of reads that were in progress at the same time.
    pub fn max_concurrent_reads(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter when a read ends, including on timeout.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connector handing out sessions on a shared [`MemoryFs`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    fs: Arc<MemoryFs>,
}

impl MemoryConnector {
    pub fn new(fs: Arc<MemoryFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl RemoteConnector for MemoryConnector {
    async fn connect(&self, credentials: &RemoteCredentials) -> Result<Arc<dyn RemoteSession>> {
        self.fs.connects.fetch_add(1, Ordering::SeqCst);
        if self.fs.state().refuse_connect {
            return Err(Error::connect(&credentials.host, "connection refused"));
        }
        Ok(Arc::new(MemorySession {
            fs: Arc::clone(&self.fs),
        }))
    }
}

struct MemorySession {
    fs: Arc<MemoryFs>,
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let state = self.fs.state();
        if state.failing_lists.contains(path) {
            return Err(Error::remote("list", path, "permission denied"));
        }
        match state.nodes.get(path) {
            Some(Node::Dir) => {}
            Some(_) => return Err(Error::remote("list", path, "not a directory")),
            None => return Err(Error::remote("list", path, "no such directory")),
        }

        Ok(state
            .nodes
            .iter()
            .filter(|(child, _)| child.as_str() != "/" && parent_of(child) == path)
            .map(|(child, node)| match node {
                Node::Dir => RemoteEntry::dir(basename(child)),
                Node::File { data, .. } => RemoteEntry {
                    name: basename(child).to_string(),
                    kind: EntryKind::File,
                    size: data.len() as u64,
                },
            })
            .collect())
    }

    async fn read(&self, path: &str, range: Option<Range<u64>>) -> Result<Vec<u8>> {
        let current = self.fs.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.fs.in_flight);
        self.fs.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.fs.reads.fetch_add(1, Ordering::SeqCst);

        let delay = self.fs.state().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.fs.state();
        if state.failing_reads.contains(path) {
            return Err(Error::remote("read", path, "permission denied"));
        }
        let data = match state.nodes.get(path) {
            Some(Node::File { data, .. }) => data,
            Some(Node::Dir) => return Err(Error::remote("read", path, "is a directory")),
            None => return Err(Error::remote("read", path, "no such file")),
        };

        let len = data.len() as u64;
        let (start, end) = match range {
            Some(r) => (r.start.min(len), r.end.min(len)),
            None => (0, len),
        };
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(data[start as usize..end as usize].to_vec())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.fs.state();
        if state.failing_renames.contains(from) {
            return Err(Error::remote("rename", from, "operation not permitted"));
        }
        if state.nodes.contains_key(to) {
            return Err(Error::remote("rename", to, "destination exists"));
        }
        if !matches!(state.nodes.get(parent_of(to)), Some(Node::Dir)) {
            return Err(Error::remote("rename", to, "destination directory missing"));
        }
        match state.nodes.remove(from) {
            Some(node @ Node::File { .. }) => {
                state.nodes.insert(to.to_string(), node);
                state.renames.push((from.to_string(), to.to_string()));
                Ok(())
            }
            Some(node) => {
                state.nodes.insert(from.to_string(), node);
                Err(Error::remote("rename", from, "not a file"))
            }
            None => Err(Error::remote("rename", from, "no such file")),
        }
    }

    async fn chmod(&self, path: &str, new_mode: u32) -> Result<()> {
        let mut state = self.fs.state();
        if state.failing_chmods.contains(path) {
            return Err(Error::remote("chmod", path, "operation not permitted"));
        }
        match state.nodes.get_mut(path) {
            Some(Node::File { mode, .. }) => {
                *mode = new_mode;
                Ok(())
            }
            Some(Node::Dir) => Ok(()),
            None => Err(Error::remote("chmod", path, "no such file")),
        }
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<()> {
        let mut state = self.fs.state();
        match state.nodes.get(path) {
            Some(Node::Dir) if recursive => return Ok(()),
            Some(_) => return Err(Error::remote("mkdir", path, "already exists")),
            None => {}
        }
        if recursive {
            MemoryFs::ensure_dirs(&mut state, path);
            return Ok(());
        }
        if !matches!(state.nodes.get(parent_of(path)), Some(Node::Dir)) {
            return Err(Error::remote("mkdir", path, "parent directory missing"));
        }
        state.nodes.insert(path.to_string(), Node::Dir);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.fs.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
