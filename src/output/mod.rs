//! Output formatting module
//!
//! Renders run summaries and shard plans for the terminal.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};
