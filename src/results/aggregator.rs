//! Outcome aggregation
//!
//! Merges the outcome lists of every session into one summary ordered by the
//! original selection, regardless of which session finished first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::executor::{FailureCause, PoolReport, SessionState};
use crate::models::{ContentArtifact, RunOutcome, SelectionMode, TestStatus};

/// Diagnostic for selected artifacts no session reported on
pub const NO_OUTCOME: &str = "no outcome reported";

/// One row of the summary
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    pub status: TestStatus,
    /// Ordinal of the session that ran the artifact
    pub session: Option<usize>,
    pub duration_ms: u64,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
}

impl SummaryCounts {
    fn add(&mut self, status: TestStatus) {
        self.total += 1;
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Errored => self.errored += 1,
            TestStatus::Skipped => self.skipped += 1,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64 * 100.0
        }
    }
}

/// Result of one run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Summary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: SelectionMode,
    pub workers: usize,
    /// Every session reached a terminal state without a fault or interrupt
    pub completed: bool,
    /// Completed and every artifact passed
    pub success: bool,
    pub cause: Option<String>,
    pub counts: SummaryCounts,
    pub entries: Vec<SummaryEntry>,
}

impl Summary {
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }

    pub fn not_passed(&self) -> impl Iterator<Item = &SummaryEntry> {
        self.entries.iter().filter(|e| e.status != TestStatus::Passed)
    }
}

/// Generate a run id: timestamp plus a random suffix
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

pub struct ResultsAggregator {
    run_id: String,
    started_at: DateTime<Utc>,
    mode: SelectionMode,
    workers: usize,
}

impl ResultsAggregator {
    pub fn new(mode: SelectionMode, workers: usize) -> Self {
        Self {
            run_id: generate_run_id(),
            started_at: Utc::now(),
            mode,
            workers,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Merge session outcomes into a summary in `selection` order
    pub fn merge(
        &self,
        selection: &[ContentArtifact],
        pool: &PoolReport,
        cause: Option<&FailureCause>,
    ) -> Summary {
        let mut by_path: HashMap<&str, &RunOutcome> = HashMap::new();
        for outcome in pool.outcomes() {
            if by_path.insert(outcome.path.as_str(), outcome).is_some() {
                warn!("{} reported more than once, keeping the last outcome", outcome.path);
            }
        }

        let mut counts = SummaryCounts::default();
        let mut entries = Vec::with_capacity(selection.len());
        for artifact in selection {
            let entry = match by_path.remove(artifact.path.as_str()) {
                Some(outcome) => SummaryEntry {
                    path: artifact.path.clone(),
                    content_type: artifact.content_type.clone(),
                    status: outcome.status,
                    session: Some(outcome.session),
                    duration_ms: outcome.duration_ms,
                    message: outcome.message.clone(),
                },
                None => SummaryEntry {
                    path: artifact.path.clone(),
                    content_type: artifact.content_type.clone(),
                    status: TestStatus::Errored,
                    session: None,
                    duration_ms: 0,
                    message: Some(NO_OUTCOME.to_string()),
                },
            };
            counts.add(entry.status);
            entries.push(entry);
        }

        for path in by_path.keys() {
            warn!("Ignoring outcome for unselected artifact {}", path);
        }

        let completed = cause.is_none()
            && pool
                .sessions
                .iter()
                .all(|s| s.final_state == SessionState::Stopped);
        let success = completed
            && pool.overall_success
            && entries.iter().all(|e| e.status == TestStatus::Passed);

        Summary {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            mode: self.mode,
            workers: self.workers,
            completed,
            success,
            cause: cause.map(ToString::to_string),
            counts,
            entries,
        }
    }
}
