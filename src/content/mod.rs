//! Content selection
//!
//! Path convention, discovery from disk, change detection and mode-driven
//! selection of the artifacts a run tests.

mod convention;
mod discovery;
mod selector;
mod vcs;

pub use convention::PathConvention;
pub use discovery::{discover, ContentCatalog};
pub use selector::{ContentSelector, SelectionFilter};
pub use vcs::{ChangeSet, DiffProvider, GitDiffProvider};
