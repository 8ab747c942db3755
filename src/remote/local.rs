//! Local directory adapter.
//!
//! Maps remote absolute paths onto a base directory on this machine, so a
//! mounted or synced copy of a site can be scanned with the same engine.

use super::{EntryKind, RemoteConnector, RemoteCredentials, RemoteEntry, RemoteSession};
use crate::core::error::{Error, Result};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Connector whose sessions operate on a local base directory.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    base: PathBuf,
}

impl LocalConnector {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

#[async_trait]
impl RemoteConnector for LocalConnector {
    async fn connect(&self, credentials: &RemoteCredentials) -> Result<Arc<dyn RemoteSession>> {
        let meta = tokio::fs::metadata(&self.base)
            .await
            .map_err(|e| Error::connect(&credentials.host, format!("{}: {}", self.base.display(), e)))?;
        if !meta.is_dir() {
            return Err(Error::connect(
                &credentials.host,
                format!("{} is not a directory", self.base.display()),
            ));
        }

        log::debug!(
            "Opened local session on {} for {}",
            self.base.display(),
            credentials.display_target()
        );
        Ok(Arc::new(LocalSession {
            base: self.base.clone(),
        }))
    }
}

struct LocalSession {
    base: PathBuf,
}

impl LocalSession {
    /// Resolve a remote path under the base directory.
    fn resolve(&self, remote: &str) -> Result<PathBuf> {
        let mut resolved = self.base.clone();
        for component in Path::new(remote).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(segment) => resolved.push(segment),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(Error::InvalidRemotePath(remote.to_string()));
                }
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl RemoteSession for LocalSession {
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let dir = self.resolve(path)?;
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::remote("list", path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| Error::remote("list", path, e))?
        {
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => {
                    log::debug!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };

            let size = match kind {
                EntryKind::File | EntryKind::Symlink => tokio::fs::metadata(entry.path())
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0),
                _ => 0,
            };

            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
                size,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &str, range: Option<Range<u64>>) -> Result<Vec<u8>> {
        let file_path = self.resolve(path)?;
        let mut file = tokio::fs::File::open(&file_path)
            .await
            .map_err(|e| Error::remote("read", path, e))?;

        let mut buf = Vec::new();
        match range {
            None => {
                file.read_to_end(&mut buf)
                    .await
                    .map_err(|e| Error::remote("read", path, e))?;
            }
            Some(range) => {
                if range.end <= range.start {
                    return Ok(buf);
                }
                file.seek(SeekFrom::Start(range.start))
                    .await
                    .map_err(|e| Error::remote("read", path, e))?;
                file.take(range.end - range.start)
                    .read_to_end(&mut buf)
                    .await
                    .map_err(|e| Error::remote("read", path, e))?;
            }
        }
        Ok(buf)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if tokio::fs::symlink_metadata(&target).await.is_ok() {
            return Err(Error::remote("rename", to, "destination exists"));
        }
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| Error::remote("rename", from, e))
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let target = self.resolve(path)?;

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            std::fs::Permissions::from_mode(mode)
        };

        #[cfg(not(unix))]
        let permissions = {
            let mut permissions = tokio::fs::metadata(&target)
                .await
                .map_err(|e| Error::remote("chmod", path, e))?
                .permissions();
            permissions.set_readonly(mode & 0o222 == 0);
            permissions
        };

        tokio::fs::set_permissions(&target, permissions)
            .await
            .map_err(|e| Error::remote("chmod", path, e))
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<()> {
        let dir = self.resolve(path)?;
        let result = if recursive {
            tokio::fs::create_dir_all(&dir).await
        } else {
            tokio::fs::create_dir(&dir).await
        };
        result.map_err(|e| Error::remote("mkdir", path, e))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
