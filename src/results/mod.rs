//! Run results
//!
//! Aggregates session outcomes into a summary and persists it.

mod aggregator;
mod storage;

pub use aggregator::{ResultsAggregator, Summary, SummaryCounts, SummaryEntry};
pub use storage::SummaryWriter;
