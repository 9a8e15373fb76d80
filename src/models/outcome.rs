//! Run outcome models
//!
//! Per-artifact test status and outcome records produced by worker sessions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Test execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Errored,
    Skipped,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::Errored => "!",
            TestStatus::Skipped => "○",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "PASS"),
            TestStatus::Failed => write!(f, "FAIL"),
            TestStatus::Errored => write!(f, "ERROR"),
            TestStatus::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Outcome of one content artifact on one worker session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Content artifact path
    pub path: String,
    pub status: TestStatus,
    /// Ordinal of the session that produced this outcome
    pub session: usize,
    pub duration_ms: u64,
    pub message: Option<String>,
}

impl RunOutcome {
    pub fn passed(path: impl Into<String>, session: usize, duration_ms: u64) -> Self {
        Self {
            path: path.into(),
            status: TestStatus::Passed,
            session,
            duration_ms,
            message: None,
        }
    }

    pub fn failed(
        path: impl Into<String>,
        session: usize,
        duration_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            status: TestStatus::Failed,
            session,
            duration_ms,
            message: Some(message.into()),
        }
    }

    pub fn errored(path: impl Into<String>, session: usize, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: TestStatus::Errored,
            session,
            duration_ms: 0,
            message: Some(error.into()),
        }
    }

    pub fn skipped(path: impl Into<String>, session: usize, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: TestStatus::Skipped,
            session,
            duration_ms: 0,
            message: Some(reason.into()),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [worker {}, {}ms]",
            self.status.symbol(),
            self.path,
            self.session,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_constructors() {
        let outcome = RunOutcome::passed("detections/endpoint/a.yml", 0, 120);
        assert!(outcome.status.is_success());
        assert_eq!(outcome.duration_ms, 120);
        assert!(outcome.message.is_none());

        let outcome = RunOutcome::failed("detections/endpoint/b.yml", 1, 80, "no results");
        assert_eq!(outcome.status, TestStatus::Failed);
        assert_eq!(outcome.message.as_deref(), Some("no results"));

        let outcome = RunOutcome::skipped("detections/endpoint/c.yml", 2, "not run");
        assert!(!outcome.status.is_success());
        assert_eq!(outcome.duration_ms, 0);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&TestStatus::Errored).unwrap();
        assert_eq!(json, "\"errored\"");
    }

    #[test]
    fn test_outcome_display() {
        let outcome = RunOutcome::failed("detections/a.yml", 1, 5, "boom");
        assert_eq!(outcome.to_string(), "✗ detections/a.yml [worker 1, 5ms] - boom");
    }
}
