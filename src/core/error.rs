//! Error types and result handling for sitescan.

use thiserror::Error;

/// Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sitescan operations.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Configuration Errors =====
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    #[error("Failed to save configuration: {0}")]
    ConfigSave(String),

    #[error("Invalid configuration value: {field} - {message}")]
    ConfigInvalid { field: String, message: String },

    #[error("Scan {scan_id} is missing root_path or remote credentials")]
    MissingScanConfig { scan_id: String },

    #[error("Invalid detection rule {rule}: {message}")]
    RuleCompile { rule: String, message: String },

    // ===== Remote Errors =====
    #[error("Failed to connect to {host}: {message}")]
    RemoteConnect { host: String, message: String },

    #[error("Remote {operation} failed for {path}: {message}")]
    RemoteOperation {
        operation: String,
        path: String,
        message: String,
    },

    #[error("Remote {operation} timed out after {timeout_ms}ms: {path}")]
    RemoteTimeout {
        operation: String,
        path: String,
        timeout_ms: u64,
    },

    #[error("Invalid remote path: {0}")]
    InvalidRemotePath(String),

    // ===== Scan Lifecycle Errors =====
    #[error("Scan not found: {0}")]
    ScanNotFound(String),

    #[error("Invalid scan status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Scan {scan_id} is not queued (status: {status})")]
    ScanNotQueued { scan_id: String, status: String },

    #[error("Scan kind {0} is not handled by the deep scan engine")]
    UnsupportedScanKind(String),

    #[error("Scan exceeded its wall-clock limit of {limit_secs}s")]
    ScanTimeout { limit_secs: u64 },

    // ===== Concurrency Errors =====
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    #[error("Background task failed: {0}")]
    TaskJoin(String),

    // ===== Serialization Errors =====
    #[error("JSON serialization error")]
    Json(#[from] serde_json::Error),

    // ===== Generic Errors =====
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a remote operation error.
    pub fn remote(
        operation: impl Into<String>,
        path: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Self::RemoteOperation {
            operation: operation.into(),
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a remote timeout error.
    pub fn remote_timeout(operation: impl Into<String>, path: impl Into<String>, timeout_ms: u64) -> Self {
        Self::RemoteTimeout {
            operation: operation.into(),
            path: path.into(),
            timeout_ms,
        }
    }

    /// Create a connection error.
    pub fn connect(host: impl Into<String>, message: impl ToString) -> Self {
        Self::RemoteConnect {
            host: host.into(),
            message: message.to_string(),
        }
    }

    /// Create a lock poisoned error.
    pub fn lock_poisoned(context: impl Into<String>) -> Self {
        Self::LockPoisoned {
            context: context.into(),
        }
    }

    /// Check if this error is recoverable (the enclosing scan or quarantine can continue).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::RemoteOperation { .. } | Error::RemoteTimeout { .. } | Error::InvalidRemotePath(_)
        )
    }

    /// Check if this error is worth another connection attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RemoteConnect { .. } | Error::RemoteTimeout { .. })
    }

    /// Check if this error only rejects a lifecycle step, leaving the record as it was.
    pub fn is_lifecycle_rejection(&self) -> bool {
        matches!(self, Error::ScanNotQueued { .. } | Error::InvalidTransition { .. })
    }

    /// Get the error category for logging.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ConfigLoad(_)
            | Error::ConfigSave(_)
            | Error::ConfigInvalid { .. }
            | Error::MissingScanConfig { .. }
            | Error::RuleCompile { .. } => ErrorCategory::Configuration,

            Error::RemoteConnect { .. } => ErrorCategory::Connection,

            Error::RemoteOperation { .. } | Error::RemoteTimeout { .. } | Error::InvalidRemotePath(_) => {
                ErrorCategory::Remote
            }

            Error::ScanNotFound(_)
            | Error::InvalidTransition { .. }
            | Error::ScanNotQueued { .. }
            | Error::UnsupportedScanKind(_)
            | Error::ScanTimeout { .. } => ErrorCategory::Scanning,

            Error::LockPoisoned { .. } | Error::TaskJoin(_) => ErrorCategory::Concurrency,

            Error::Json(_) => ErrorCategory::Serialization,

            Error::Io(_) | Error::Internal(_) => ErrorCategory::Other,
        }
    }
}

/// Error category for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Connection,
    Remote,
    Scanning,
    Concurrency,
    Serialization,
    Other,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Connection => write!(f, "Connection"),
            Self::Remote => write!(f, "Remote"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Concurrency => write!(f, "Concurrency"),
            Self::Serialization => write!(f, "Serialization"),
            Self::Other => write!(f, "Other"),
        }
    }
}
