//! Remote filesystem capability.
//!
//! The scan engine never talks to a transport directly. It consumes the
//! [`RemoteConnector`] / [`RemoteSession`] pair defined here, so SFTP, FTP or
//! any other backend can be plugged in. Two adapters ship with the crate:
//! - [`local`]: a local directory standing in for the remote root
//! - [`memory`]: an in-memory tree with fault injection

pub mod local;
pub mod memory;

pub use local::LocalConnector;
pub use memory::{MemoryConnector, MemoryFs};

use crate::core::config::RemoteConfig;
use crate::core::error::{Error, Result};
use crate::utils::retry::{retry_async, RetryConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

fn default_port() -> u16 {
    22
}

/// Credentials used to open a remote session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCredentials {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub auth: RemoteAuth,
}

impl RemoteCredentials {
    /// Credentials authenticating with a password.
    pub fn password(host: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
            auth: RemoteAuth::Password {
                password: password.into(),
            },
        }
    }

    /// Credentials authenticating with a private key.
    pub fn key(host: impl Into<String>, user: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
            auth: RemoteAuth::Key { key: key.into() },
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `user@host:port`, safe for logs.
    pub fn display_target(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

// Secrets never reach log output.
impl std::fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("auth", &self.auth.method())
            .finish()
    }
}

/// Authentication method.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum RemoteAuth {
    Password { password: String },
    Key { key: String },
}

impl RemoteAuth {
    pub fn method(&self) -> &'static str {
        match self {
            RemoteAuth::Password { .. } => "password",
            RemoteAuth::Key { .. } => "key",
        }
    }
}

/// Type of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// A single entry returned by [`RemoteSession::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: 0,
        }
    }
}

/// Opens sessions against a remote host.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, credentials: &RemoteCredentials) -> Result<Arc<dyn RemoteSession>>;
}

/// An open session. Implementations must accept concurrent outstanding calls.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// List the entries of a directory.
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Read a whole file, or the half-open byte range when given.
    async fn read(&self, path: &str, range: Option<Range<u64>>) -> Result<Vec<u8>>;

    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    async fn chmod(&self, path: &str, mode: u32) -> Result<()>;

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Run a remote call under a timeout.
pub async fn with_timeout<T, F>(operation: &str, path: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::remote_timeout(
            operation,
            path,
            limit.as_millis() as u64,
        )),
    }
}

/// Open a session with the configured connect timeout and retries.
pub async fn open_session(
    connector: &dyn RemoteConnector,
    credentials: &RemoteCredentials,
    config: &RemoteConfig,
) -> Result<Arc<dyn RemoteSession>> {
    let target = credentials.display_target();
    let retry = RetryConfig::default()
        .with_max_attempts(config.connect_attempts)
        .with_initial_delay(Duration::from_millis(config.retry_initial_delay_ms));

    retry_async(
        &format!("connect {}", target),
        retry,
        |e: &Error| e.is_retryable(),
        || {
            with_timeout(
                "connect",
                &target,
                config.connect_timeout(),
                connector.connect(credentials),
            )
        },
    )
    .await
}

/// Normalize a root path: trailing slashes removed, empty becomes `/`.
pub fn normalize_root(root: &str) -> String {
    let trimmed = root.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Join a directory path and an entry name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" || parent.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

/// Last path segment.
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}
