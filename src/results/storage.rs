//! Summary persistence
//!
//! JSON by default, CSV when the destination ends in `.csv`. A summary that
//! cannot be written is reported; it never changes the run's verdict.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tracing::{info, warn};

use super::aggregator::{Summary, SummaryEntry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SummaryFormat {
    Json,
    Csv,
}

impl SummaryFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => SummaryFormat::Csv,
            _ => SummaryFormat::Json,
        }
    }
}

/// Flat CSV row
#[derive(Serialize)]
struct CsvRow<'a> {
    run_id: &'a str,
    path: &'a str,
    #[serde(rename = "type")]
    content_type: &'a str,
    status: String,
    session: Option<usize>,
    duration_ms: u64,
    message: &'a str,
}

impl<'a> CsvRow<'a> {
    fn new(run_id: &'a str, entry: &'a SummaryEntry) -> Self {
        Self {
            run_id,
            path: &entry.path,
            content_type: entry.content_type.as_deref().unwrap_or_default(),
            status: format!("{:?}", entry.status).to_lowercase(),
            session: entry.session,
            duration_ms: entry.duration_ms,
            message: entry.message.as_deref().unwrap_or_default(),
        }
    }
}

pub struct SummaryWriter;

impl SummaryWriter {
    pub fn write(summary: &Summary, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = File::create(path)
            .with_context(|| format!("Failed to create summary file {}", path.display()))?;
        let writer = BufWriter::new(file);

        match SummaryFormat::for_path(path) {
            SummaryFormat::Json => {
                serde_json::to_writer_pretty(writer, summary).context("Failed to write summary")?;
            }
            SummaryFormat::Csv => {
                let mut csv = csv::Writer::from_writer(writer);
                for entry in &summary.entries {
                    csv.serialize(CsvRow::new(&summary.run_id, entry))
                        .context("Failed to write summary row")?;
                }
                csv.flush().context("Failed to flush summary")?;
            }
        }

        info!("Wrote summary to {}", path.display());
        Ok(())
    }

    /// Write the summary, logging instead of failing; returns whether it was written
    pub fn write_or_warn(summary: &Summary, path: &Path) -> bool {
        match Self::write(summary, path) {
            Ok(()) => true,
            Err(e) => {
                warn!("Summary not written: {:#}", e);
                false
            }
        }
    }
}
