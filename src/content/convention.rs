//! Content/test path convention
//!
//! Maps a content artifact path to its paired test artifact path and back, and
//! verifies that both trees pair up.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{error, warn};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::is_alternate_dialect;

/// Bidirectional content <-> test path mapping
///
/// Content artifacts live under `<content_root>/<category>/...` with the
/// content suffix; tests mirror them under `<test_root>/<category>/...` with the
/// test suffix. Paths are relative and `/`-separated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConvention {
    pub content_root: String,
    pub test_root: String,
    pub content_suffix: String,
    pub test_suffix: String,
}

impl Default for PathConvention {
    fn default() -> Self {
        Self {
            content_root: "detections".to_string(),
            test_root: "tests".to_string(),
            content_suffix: ".yml".to_string(),
            test_suffix: ".test.yml".to_string(),
        }
    }
}

impl PathConvention {
    pub fn new(content_root: impl Into<String>, test_root: impl Into<String>) -> Self {
        Self {
            content_root: content_root.into(),
            test_root: test_root.into(),
            ..Default::default()
        }
    }

    fn content_prefix(&self) -> String {
        format!("{}/", self.content_root)
    }

    fn test_prefix(&self) -> String {
        format!("{}/", self.test_root)
    }

    pub fn is_content_path(&self, path: &str) -> bool {
        path.starts_with(&self.content_prefix()) && path.ends_with(&self.content_suffix)
    }

    pub fn is_test_path(&self, path: &str) -> bool {
        path.starts_with(&self.test_prefix()) && path.ends_with(&self.test_suffix)
    }

    /// Map `detections/<category>/x.yml` to `tests/<category>/x.test.yml`
    pub fn to_test_path(&self, content_path: &str) -> OrchestratorResult<String> {
        let prefix = self.content_prefix();
        let rest = content_path.strip_prefix(&prefix).ok_or_else(|| {
            OrchestratorError::convention(
                content_path,
                format!("expected content path to start with [{prefix}]"),
            )
        })?;
        let stem = rest.strip_suffix(&self.content_suffix).ok_or_else(|| {
            OrchestratorError::convention(
                content_path,
                format!("expected content path to end with [{}]", self.content_suffix),
            )
        })?;

        Ok(format!("{}{}{}", self.test_prefix(), stem, self.test_suffix))
    }

    /// Map `tests/<category>/x.test.yml` to `detections/<category>/x.yml`
    pub fn to_content_path(&self, test_path: &str) -> OrchestratorResult<String> {
        let prefix = self.test_prefix();
        let rest = test_path.strip_prefix(&prefix).ok_or_else(|| {
            OrchestratorError::convention(
                test_path,
                format!("expected test path to start with [{prefix}]"),
            )
        })?;
        let stem = rest.strip_suffix(&self.test_suffix).ok_or_else(|| {
            OrchestratorError::convention(
                test_path,
                format!("expected test path to end with [{}]", self.test_suffix),
            )
        })?;

        Ok(format!("{}{}{}", self.content_prefix(), stem, self.content_suffix))
    }

    /// Normalize either side of the convention to the content path
    pub fn normalize_to_content(&self, path: &str) -> OrchestratorResult<String> {
        let path = path.trim_start_matches("./");
        if self.is_test_path(path) {
            self.to_content_path(path)
        } else if self.is_content_path(path) {
            Ok(path.to_string())
        } else {
            Err(OrchestratorError::convention(
                path,
                format!(
                    "expected a path under [{}/] or [{}/]",
                    self.content_root, self.test_root
                ),
            ))
        }
    }

    /// Check that every content path has its test and every test its content
    ///
    /// Pure over the two path lists; nothing is read from disk. Missing
    /// partners of alternate-dialect artifacts are warnings when
    /// `exclude_alternate_dialect` is set.
    pub fn verify_pairing(
        &self,
        content_paths: &[String],
        test_paths: &[String],
        exclude_alternate_dialect: bool,
    ) -> OrchestratorResult<PairingReport> {
        let contents: HashSet<&str> = content_paths.iter().map(String::as_str).collect();
        let tests: HashSet<&str> = test_paths.iter().map(String::as_str).collect();
        let mut entries = Vec::new();

        let severity_for = |subject: &str| {
            if exclude_alternate_dialect && is_alternate_dialect(subject) {
                Severity::Warning
            } else {
                Severity::Error
            }
        };

        for content in content_paths {
            let test = self.to_test_path(content)?;
            if !tests.contains(test.as_str()) {
                entries.push(PairingEntry {
                    missing_side: ArtifactSide::Test,
                    existing: content.clone(),
                    missing: test,
                    severity: severity_for(content),
                });
            }
        }

        for test in test_paths {
            let content = self.to_content_path(test)?;
            if !contents.contains(content.as_str()) {
                entries.push(PairingEntry {
                    missing_side: ArtifactSide::Content,
                    existing: test.clone(),
                    missing: content,
                    severity: severity_for(test),
                });
            }
        }

        Ok(PairingReport::new(entries))
    }
}

/// Which side of a pair an entry refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSide {
    Content,
    Test,
}

impl fmt::Display for ArtifactSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactSide::Content => write!(f, "content"),
            ArtifactSide::Test => write!(f, "test"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// One unpaired artifact
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingEntry {
    pub missing_side: ArtifactSide,
    pub existing: String,
    pub missing: String,
    pub severity: Severity,
}

impl fmt::Display for PairingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Missing {} file:\n\tEXISTS  - {}\n\tMISSING - {}",
            self.missing_side, self.existing, self.missing
        )
    }
}

/// Result of a pairing check
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingReport {
    pub ok: bool,
    pub entries: Vec<PairingEntry>,
}

impl PairingReport {
    fn new(entries: Vec<PairingEntry>) -> Self {
        let ok = entries.iter().all(|e| e.severity == Severity::Warning);
        Self { ok, entries }
    }

    pub fn errors(&self) -> impl Iterator<Item = &PairingEntry> {
        self.entries.iter().filter(|e| e.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &PairingEntry> {
        self.entries.iter().filter(|e| e.severity == Severity::Warning)
    }

    /// Emit every entry through the logger
    pub fn log(&self) {
        for entry in &self.entries {
            match entry.severity {
                Severity::Warning => warn!(
                    "{entry}\n\tAlternate-dialect content is excluded, so this is only a warning"
                ),
                Severity::Error => error!("{entry}"),
            }
        }
    }

    /// Convert into a hard failure when any entry is an error
    pub fn into_result(self) -> OrchestratorResult<Self> {
        if self.ok {
            Ok(self)
        } else {
            Err(OrchestratorError::PairingViolation {
                missing: self.errors().count(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_to_test_path() {
        let convention = PathConvention::default();
        assert_eq!(
            convention
                .to_test_path("detections/endpoint/suspicious_exec.yml")
                .unwrap(),
            "tests/endpoint/suspicious_exec.test.yml"
        );
    }

    #[test]
    fn test_round_trip_both_directions() {
        let convention = PathConvention::default();
        let samples = [
            "detections/cloud/aws_root_login.yml",
            "detections/endpoint/nested/dir/ssa___process.yml",
            "detections/network/detections_in_name.yml",
        ];

        for content in samples {
            let test = convention.to_test_path(content).unwrap();
            assert_eq!(convention.to_content_path(&test).unwrap(), content);
        }

        let test = "tests/endpoint/tests/registry.test.yml";
        let content = convention.to_content_path(test).unwrap();
        assert_eq!(content, "detections/endpoint/tests/registry.yml");
        assert_eq!(convention.to_test_path(&content).unwrap(), test);
    }

    #[test]
    fn test_prefix_swapped_only_once() {
        let convention = PathConvention::default();
        let test = convention
            .to_test_path("detections/detections/a.yml")
            .unwrap();
        assert_eq!(test, "tests/detections/a.test.yml");
    }

    #[test]
    fn test_wrong_root_is_violation() {
        let convention = PathConvention::default();
        let err = convention.to_test_path("rules/endpoint/a.yml").unwrap_err();
        assert!(matches!(err, OrchestratorError::ConventionViolation { .. }));

        let err = convention
            .to_content_path("detections/endpoint/a.test.yml")
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ConventionViolation { .. }));
    }

    #[test]
    fn test_wrong_suffix_is_violation() {
        let convention = PathConvention::default();
        assert!(convention.to_test_path("detections/endpoint/a.json").is_err());
        assert!(convention.to_content_path("tests/endpoint/a.yml").is_err());
    }

    #[test]
    fn test_normalize_to_content() {
        let convention = PathConvention::default();
        assert_eq!(
            convention
                .normalize_to_content("tests/cloud/x.test.yml")
                .unwrap(),
            "detections/cloud/x.yml"
        );
        assert_eq!(
            convention
                .normalize_to_content("./detections/cloud/x.yml")
                .unwrap(),
            "detections/cloud/x.yml"
        );
        assert!(convention.normalize_to_content("docs/readme.md").is_err());
    }

    #[test]
    fn test_pairing_reports_missing_test() {
        let convention = PathConvention::default();
        let contents = paths(&["detections/endpoint/a.yml", "detections/endpoint/b.yml"]);
        let tests = paths(&["tests/endpoint/a.test.yml"]);

        let report = convention.verify_pairing(&contents, &tests, true).unwrap();
        assert!(!report.ok);
        assert_eq!(report.entries.len(), 1);
        let entry = &report.entries[0];
        assert_eq!(entry.missing_side, ArtifactSide::Test);
        assert_eq!(entry.missing, "tests/endpoint/b.test.yml");
        assert_eq!(entry.severity, Severity::Error);
    }

    #[test]
    fn test_pairing_alternate_dialect_is_warning() {
        let convention = PathConvention::default();
        let contents = paths(&["detections/endpoint/ssa___b.yml"]);
        let tests: Vec<String> = Vec::new();

        let report = convention.verify_pairing(&contents, &tests, true).unwrap();
        assert!(report.ok);
        assert_eq!(report.warnings().count(), 1);
        assert_eq!(report.errors().count(), 0);

        let strict = convention.verify_pairing(&contents, &tests, false).unwrap();
        assert!(!strict.ok);
    }

    #[test]
    fn test_pairing_reports_missing_content() {
        let convention = PathConvention::default();
        let contents: Vec<String> = Vec::new();
        let tests = paths(&["tests/cloud/orphan.test.yml"]);

        let report = convention.verify_pairing(&contents, &tests, true).unwrap();
        assert!(!report.ok);
        assert_eq!(report.entries[0].missing_side, ArtifactSide::Content);
        assert_eq!(report.entries[0].missing, "detections/cloud/orphan.yml");

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, OrchestratorError::PairingViolation { missing: 1 }));
    }
}
