//! Configuration management for sitescan.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deep scan settings
    pub scan: ScanConfig,
    /// Classifier settings
    pub detection: DetectionConfig,
    /// Remote transport timeouts and retries
    pub remote: RemoteConfig,
    /// Quarantine settings
    pub quarantine: QuarantineConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigLoad(format!("Failed to read config file: {}", e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| Error::ConfigLoad(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigSave(format!("Failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| Error::ConfigSave(format!("Failed to write config file: {}", e)))
    }

    /// Load configuration from default location, or create default if not exists.
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        if config_path.exists() {
            match Self::load(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    log::warn!("Failed to load config, using defaults: {}", e);
                }
            }
        }

        let config = Self::default();

        if let Err(e) = config.save(&config_path) {
            log::warn!("Failed to save default config: {}", e);
        }

        config
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        Self::data_dir().join("config.json")
    }

    /// Get the application data directory.
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("sitescan")
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.scan.concurrency == 0 {
            return Err(invalid("scan.concurrency", "Must be greater than 0"));
        }

        if self.scan.sample_bytes == 0 {
            return Err(invalid("scan.sample_bytes", "Must be greater than 0"));
        }

        if self.scan.sample_bytes > self.scan.max_full_read_bytes {
            return Err(invalid(
                "scan.sample_bytes",
                "Must not exceed scan.max_full_read_bytes",
            ));
        }

        if self.scan.max_file_bytes == 0 {
            return Err(invalid("scan.max_file_bytes", "Must be greater than 0"));
        }

        if self.scan.max_run_secs == 0 {
            return Err(invalid("scan.max_run_secs", "Must be greater than 0"));
        }

        if let Some(threshold) = self.detection.entropy_threshold {
            if !(0.0..=8.0).contains(&threshold) {
                return Err(invalid(
                    "detection.entropy_threshold",
                    "Must be between 0.0 and 8.0",
                ));
            }
        }

        if self.remote.op_timeout_secs == 0 || self.remote.connect_timeout_secs == 0 {
            return Err(invalid("remote", "Timeouts must be greater than 0"));
        }

        if self.remote.connect_attempts == 0 {
            return Err(invalid("remote.connect_attempts", "Must be at least 1"));
        }

        let dir_name = self.quarantine.dir_name.trim();
        if dir_name.is_empty() || dir_name.contains('/') || dir_name == "." || dir_name == ".." {
            return Err(invalid(
                "quarantine.dir_name",
                "Must be a single non-empty path segment",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> Error {
    Error::ConfigInvalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Deep scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Maximum number of simultaneous remote reads
    pub concurrency: usize,
    /// Files at or below this size are read in full
    pub max_full_read_bytes: u64,
    /// Head and tail segment size for larger files
    pub sample_bytes: u64,
    /// Directory names pruned by the walker
    pub exclude_dirs: Vec<String>,
    /// File extensions the walker never yields (lowercase, without dot)
    pub skip_extensions: Vec<String>,
    /// Files larger than this are never yielded
    pub max_file_bytes: u64,
    /// Maximum characters kept in a finding preview
    pub preview_chars: usize,
    /// Wall-clock cap for a whole deep scan run
    pub max_run_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 6,
            max_full_read_bytes: 2 * 1024 * 1024,
            sample_bytes: 64 * 1024,
            exclude_dirs: [
                "node_modules",
                "vendor",
                ".git",
                ".svn",
                ".cache",
                "cache",
                ".well-known",
                ".quarantine",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            skip_extensions: [
                "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "zip", "tar", "gz", "7z",
                "rar", "pdf", "mp4", "mp3", "woff", "woff2", "ttf", "eot", "map",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_file_bytes: 32 * 1024 * 1024,
            preview_chars: 300,
            max_run_secs: 45 * 60,
        }
    }
}

impl ScanConfig {
    pub fn max_run(&self) -> Duration {
        Duration::from_secs(self.max_run_secs)
    }
}

/// Classifier configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Flag buffers above this Shannon entropy as obfuscated (disabled when unset)
    pub entropy_threshold: Option<f64>,
}

/// Remote transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Timeout for establishing a session
    pub connect_timeout_secs: u64,
    /// Timeout for each list/read/rename/chmod/mkdir call
    pub op_timeout_secs: u64,
    /// Connection attempts before giving up
    pub connect_attempts: u32,
    /// Delay before the first connection retry
    pub retry_initial_delay_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            op_timeout_secs: 30,
            connect_attempts: 2,
            retry_initial_delay_ms: 500,
        }
    }
}

impl RemoteConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }
}

/// Quarantine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    /// Directory created under the scan root
    pub dir_name: String,
    /// Permissions applied to quarantined files
    pub file_mode: u32,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            dir_name: ".quarantine".to_string(),
            file_mode: 0o400,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Include module paths in console output
    pub verbose_console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            verbose_console: false,
        }
    }
}
