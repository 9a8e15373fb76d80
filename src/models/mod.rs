//! Data models for content test orchestration
//!
//! This module contains the data structures shared across selection, planning
//! and execution.

mod artifact;
mod outcome;

pub use artifact::{is_alternate_dialect, ContentArtifact, SelectionMode};
pub use outcome::{RunOutcome, TestStatus};
