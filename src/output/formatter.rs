//! Terminal rendering of run summaries
//!
//! Provides table, JSON and one-line brief formats.

use std::str::FromStr;

use crate::error::OrchestratorError;
use crate::models::TestStatus;
use crate::results::{Summary, SummaryEntry};
use crate::shard::Shard;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Brief,
}

impl FromStr for OutputFormat {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            "brief" | "summary" => Ok(OutputFormat::Brief),
            other => Err(OrchestratorError::config(format!(
                "unknown output format [{other}], expected table, json, json-pretty or brief"
            ))),
        }
    }
}

/// Summary formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn format_summary(&self, summary: &Summary) -> String {
        match self.format {
            OutputFormat::Table => self.format_table(summary),
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Brief => self.format_brief(summary),
        }
    }

    fn status_label(&self, status: TestStatus) -> String {
        let label = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return label;
        }
        let color = match status {
            TestStatus::Passed => "32",
            TestStatus::Failed | TestStatus::Errored => "31",
            TestStatus::Skipped => "33",
        };
        format!("\x1b[{color}m{label}\x1b[0m")
    }

    fn format_entry(&self, entry: &SummaryEntry) -> String {
        let session = entry
            .session
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{:<9} {:>3}  {:>7}ms  {}",
            self.status_label(entry.status),
            session,
            entry.duration_ms,
            entry.path
        )
    }

    fn format_table(&self, summary: &Summary) -> String {
        let mut output = String::new();

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(
            " Run {} ({} mode, {} worker(s))\n",
            summary.run_id, summary.mode, summary.workers
        ));
        output.push_str("═══════════════════════════════════════════════════════════════\n");

        for entry in &summary.entries {
            output.push_str(&format!(" {}\n", self.format_entry(entry)));
        }

        output.push_str(" ───────────────────────────────────────────────────────────\n");
        let c = &summary.counts;
        output.push_str(&format!(
            " Total: {} | Pass: {} | Fail: {} | Error: {} | Skip: {} ({:.1}%)\n",
            c.total,
            c.passed,
            c.failed,
            c.errored,
            c.skipped,
            c.pass_rate()
        ));

        let failures: Vec<&SummaryEntry> = summary
            .not_passed()
            .filter(|e| e.status != TestStatus::Skipped)
            .collect();
        if !failures.is_empty() {
            output.push_str("\n Not passed:\n");
            for entry in failures {
                output.push_str(&format!(
                    "   - {}: {}\n",
                    entry.path,
                    entry.message.as_deref().unwrap_or("")
                ));
            }
        }

        if let Some(cause) = &summary.cause {
            output.push_str(&format!("\n Run stopped early: {cause}\n"));
        }

        let verdict = if summary.success { "PASS" } else { "FAIL" };
        output.push_str(&format!(" Result: {verdict}\n"));
        output
    }

    fn format_brief(&self, summary: &Summary) -> String {
        format!(
            "{} {}: {}/{} passed, {} failed, {} errored, {} skipped{}",
            summary.run_id,
            if summary.success { "PASS" } else { "FAIL" },
            summary.counts.passed,
            summary.counts.total,
            summary.counts.failed,
            summary.counts.errored,
            summary.counts.skipped,
            if summary.completed { "" } else { " (incomplete)" }
        )
    }

    /// Describe a shard plan, as printed by a dry run
    pub fn format_plan(&self, shards: &[Shard]) -> String {
        let mut output = String::new();
        for shard in shards {
            output.push_str(&format!("Worker {} ({} test(s))\n", shard.index, shard.len()));
            for artifact in &shard.artifacts {
                output.push_str(&format!("  {}\n", artifact.path));
            }
        }
        output
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}
