//! Core type definitions used throughout sitescan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification tier of scanned content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// No rule fired
    Clean,
    /// Obfuscation or other weak signal
    Suspicious,
    /// Web shell signature or exec-with-tainted-input
    Malicious,
}

impl Severity {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Clean => "clean",
            Severity::Suspicious => "suspicious",
            Severity::Malicious => "malicious",
        }
    }

    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "clean" => Some(Severity::Clean),
            "suspicious" => Some(Severity::Suspicious),
            "malicious" => Some(Severity::Malicious),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Kind of scan requested for a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    /// Lightweight checks, not handled by the deep engine
    Quick,
    /// Full remote tree walk with content classification
    Deep,
    /// Site health checks, not handled by the deep engine
    Health,
}

impl ScanKind {
    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "quick" => Some(ScanKind::Quick),
            "deep" => Some(ScanKind::Deep),
            "health" => Some(ScanKind::Health),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanKind::Quick => write!(f, "quick"),
            ScanKind::Deep => write!(f, "deep"),
            ScanKind::Health => write!(f, "health"),
        }
    }
}

/// Lifecycle status of a scan record.
///
/// `queued -> running -> {done | issues | error}`, with `canceled` reachable
/// from `queued` and `running`, and `error` reachable from `queued` when the
/// run cannot start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Queued,
    Running,
    Done,
    Issues,
    Error,
    Canceled,
}

impl ScanStatus {
    /// Whether no further status change is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Done | ScanStatus::Issues | ScanStatus::Error | ScanStatus::Canceled
        )
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        use ScanStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Error)
                | (Queued, Canceled)
                | (Running, Done)
                | (Running, Issues)
                | (Running, Error)
                | (Running, Canceled)
        )
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanStatus::Queued => "queued",
            ScanStatus::Running => "running",
            ScanStatus::Done => "done",
            ScanStatus::Issues => "issues",
            ScanStatus::Error => "error",
            ScanStatus::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

/// A file discovered by the remote walker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileDescriptor {
    /// Remote absolute path
    pub path: String,
    /// Size in bytes as reported by the listing
    pub size: u64,
}

impl RemoteFileDescriptor {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

/// A recorded detection of non-clean content at a remote path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Unique finding identifier
    pub id: String,
    /// Remote absolute path
    pub path: String,
    /// Classifier rule id
    pub rule: String,
    /// Malicious or suspicious
    pub severity: Severity,
    /// Leading text of the scanned buffer
    pub preview: String,
}

/// Per-severity classification counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub malicious: u64,
    pub suspicious: u64,
    pub clean: u64,
}

impl Counts {
    /// Total number of classified files.
    pub fn classified(&self) -> u64 {
        self.malicious + self.suspicious + self.clean
    }

    /// Whether any non-clean verdict was recorded.
    pub fn has_issues(&self) -> bool {
        self.malicious > 0 || self.suspicious > 0
    }

    /// Risk score: `max(0, 100 - 50*malicious - 5*suspicious)`.
    pub fn score(&self) -> u8 {
        let penalty = self
            .malicious
            .saturating_mul(50)
            .saturating_add(self.suspicious.saturating_mul(5));
        100u64.saturating_sub(penalty) as u8
    }

    pub(crate) fn increment(&mut self, severity: Severity) {
        match severity {
            Severity::Malicious => self.malicious += 1,
            Severity::Suspicious => self.suspicious += 1,
            Severity::Clean => self.clean += 1,
        }
    }
}

/// Externally visible summary of a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    pub id: String,
    pub ticket_id: String,
    pub kind: ScanKind,
    pub status: ScanStatus,
    /// 0-100, derived from processed / total files
    pub progress: u8,
    pub counts: Counts,
    /// Files whose read or classification failed
    pub failed: u64,
    pub bytes_scanned: u64,
    /// Set once when a run completes normally
    pub score: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ScanSummary {
    /// Calculate run duration in seconds.
    pub fn duration_secs(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}

/// A page of log lines read from a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPage {
    pub lines: Vec<String>,
    /// Cursor to pass on the next call
    pub cursor: usize,
}

/// Remediation action that can be run against a scan's findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanAction {
    /// Move malicious files into the quarantine directory
    Quarantine,
    /// Restore CMS core files (not implemented by this engine)
    CoreRestore,
}

impl ScanAction {
    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "quarantine" => Some(ScanAction::Quarantine),
            "core_restore" => Some(ScanAction::CoreRestore),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanAction::Quarantine => write!(f, "quarantine"),
            ScanAction::CoreRestore => write!(f, "core_restore"),
        }
    }
}

/// Result of running an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: ScanAction,
    pub dry_run: bool,
    /// Paths processed (planned in dry-run mode, renamed otherwise)
    pub processed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Clean < Severity::Suspicious);
        assert!(Severity::Suspicious < Severity::Malicious);
        assert_eq!(Severity::from_str("Malicious"), Some(Severity::Malicious));
        assert_eq!(Severity::from_str("bogus"), None);
    }

    #[test]
    fn test_status_transitions_only_move_forward() {
        use ScanStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Error));
        assert!(Running.can_transition_to(Issues));
        assert!(Running.can_transition_to(Canceled));

        assert!(!Running.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Done));
        for terminal in [Done, Issues, Error, Canceled] {
            assert!(terminal.is_terminal());
            for next in [Queued, Running, Done, Issues, Error, Canceled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_score_formula() {
        let counts = Counts::default();
        assert_eq!(counts.score(), 100);

        let counts = Counts {
            malicious: 1,
            suspicious: 3,
            clean: 10,
        };
        assert_eq!(counts.score(), 35);

        let counts = Counts {
            malicious: 0,
            suspicious: 25,
            clean: 0,
        };
        assert_eq!(counts.score(), 0);

        let counts = Counts {
            malicious: 3,
            suspicious: 0,
            clean: 0,
        };
        assert_eq!(counts.score(), 0);
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(ScanAction::from_str("quarantine"), Some(ScanAction::Quarantine));
        assert_eq!(ScanAction::from_str("core-restore"), Some(ScanAction::CoreRestore));
        assert_eq!(
            serde_json::to_string(&ScanAction::CoreRestore).unwrap(),
            "\"core_restore\""
        );
    }
}
