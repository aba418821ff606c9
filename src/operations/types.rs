//! Operation Types
//!
//! Tracked state for one unit of work and the read-only snapshots handed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Lifecycle state of an operation
///
/// `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Mutable record for one tracked operation, owned by the manager
#[derive(Debug)]
pub(crate) struct OperationRecord {
    pub id: String,
    /// Distinguishes successive registrations of the same id
    pub serial: u64,
    pub status: OperationStatus,
    pub progress: f64,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancel_token: CancellationToken,
    started: Instant,
    finished: Option<Instant>,
}

impl OperationRecord {
    pub fn new(id: impl Into<String>, serial: u64, cancel_token: CancellationToken) -> Self {
        Self {
            id: id.into(),
            serial,
            status: OperationStatus::Running,
            progress: 0.0,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            cancel_token,
            started: Instant::now(),
            finished: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == OperationStatus::Running
    }

    /// Record a progress report, clamped to [0, 1]
    ///
    /// Returns the stored value, or `None` when the report was ignored.
    pub fn set_progress(&mut self, progress: f64) -> Option<f64> {
        if !self.is_running() || progress.is_nan() {
            return None;
        }
        self.progress = progress.clamp(0.0, 1.0);
        Some(self.progress)
    }

    pub fn complete(&mut self) -> bool {
        if !self.finish(OperationStatus::Completed) {
            return false;
        }
        self.progress = 1.0;
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if !self.finish(OperationStatus::Failed) {
            return false;
        }
        self.error = Some(error.into());
        true
    }

    /// Mark cancelled and trip the token
    pub fn cancel(&mut self) -> bool {
        if !self.finish(OperationStatus::Cancelled) {
            return false;
        }
        self.error = Some("Operation cancelled".to_string());
        self.cancel_token.cancel();
        true
    }

    fn finish(&mut self, status: OperationStatus) -> bool {
        if !self.is_running() {
            return false;
        }
        self.status = status;
        self.finished = Some(Instant::now());
        self.completed_at = Some(Utc::now());
        true
    }

    /// Elapsed time, frozen once the operation is terminal
    pub fn duration(&self) -> Duration {
        match self.finished {
            Some(finished) => finished.duration_since(self.started),
            None => self.started.elapsed(),
        }
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.finished
    }

    pub fn snapshot(&self) -> OperationInfo {
        OperationInfo {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
            started_at: self.started_at.to_rfc3339(),
            completed_at: self.completed_at.map(|t| t.to_rfc3339()),
            duration_ms: self.duration().as_millis() as u64,
        }
    }
}

/// Point-in-time snapshot of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub id: String,
    pub status: OperationStatus,
    pub progress: f64,
    pub error: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: u64,
}

impl OperationInfo {
    /// Finished with a value or an error
    pub fn is_completed(&self) -> bool {
        matches!(self.status, OperationStatus::Completed | OperationStatus::Failed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == OperationStatus::Cancelled
    }

    pub fn is_running(&self) -> bool {
        !self.is_completed() && !self.is_cancelled()
    }

    pub fn is_failed(&self) -> bool {
        self.status == OperationStatus::Failed
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Counts over the registry, by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> OperationRecord {
        OperationRecord::new("op-1", 1, CancellationToken::new())
    }

    #[test]
    fn test_new_record_is_running() {
        let record = record();
        assert_eq!(record.status, OperationStatus::Running);
        assert_eq!(record.progress, 0.0);
        assert!(record.snapshot().is_running());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut record = record();
        assert_eq!(record.set_progress(1.7), Some(1.0));
        assert_eq!(record.set_progress(-0.3), Some(0.0));
        assert_eq!(record.set_progress(0.4), Some(0.4));
        assert_eq!(record.set_progress(f64::NAN), None);
        assert_eq!(record.progress, 0.4);
    }

    #[test]
    fn test_progress_may_go_backwards() {
        let mut record = record();
        record.set_progress(0.9);
        assert_eq!(record.set_progress(0.1), Some(0.1));
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut record = record();
        assert!(record.fail("disk full"));
        assert!(!record.complete());
        assert!(!record.cancel());
        assert!(!record.fail("other"));
        assert_eq!(record.status, OperationStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("disk full"));
        assert_eq!(record.set_progress(0.5), None);
    }

    #[test]
    fn test_cancel_trips_token() {
        let mut record = record();
        let token = record.cancel_token.clone();
        assert!(record.cancel());
        assert!(token.is_cancelled());

        let info = record.snapshot();
        assert!(info.is_cancelled());
        assert!(!info.is_completed());
        assert!(!info.is_running());
    }

    #[test]
    fn test_duration_is_frozen_after_completion() {
        let mut record = record();
        record.complete();
        let frozen = record.duration();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(record.duration(), frozen);
        assert_eq!(record.progress, 1.0);
    }

    #[test]
    fn test_failed_counts_as_completed() {
        let mut record = record();
        record.fail("boom");
        let info = record.snapshot();
        assert!(info.is_completed());
        assert!(info.is_failed());
        assert!(!info.is_running());
    }
}
