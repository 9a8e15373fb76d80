//! Content artifact models
//!
//! Defines content artifacts, their lifecycle flags, and selection modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::OrchestratorError;

/// File name prefix marking alternate-dialect content
pub const ALTERNATE_DIALECT_PREFIX: &str = "ssa___";

/// Category folder holding experimental content
pub const EXPERIMENTAL_CATEGORY: &str = "experimental";

/// Category folder holding deprecated content
pub const DEPRECATED_CATEGORY: &str = "deprecated";

/// Lifecycle flags derived from an artifact's location and name
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleFlags {
    pub experimental: bool,
    pub deprecated: bool,
    pub alternate_dialect: bool,
}

impl LifecycleFlags {
    /// Derive flags from a relative path such as `detections/endpoint/foo.yml`
    pub fn from_path(path: &str) -> Self {
        let mut segments = path.split('/');
        let _root = segments.next();
        let category = segments.next().unwrap_or_default();

        Self {
            experimental: category == EXPERIMENTAL_CATEGORY,
            deprecated: category == DEPRECATED_CATEGORY,
            alternate_dialect: is_alternate_dialect(path),
        }
    }
}

/// Whether the file name of `path` carries the alternate-dialect marker
pub fn is_alternate_dialect(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .map(|name| name.starts_with(ALTERNATE_DIALECT_PREFIX))
        .unwrap_or(false)
}

/// A single unit of testable content, identified by its relative path
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentArtifact {
    /// Path relative to the repository root, `/`-separated
    pub path: String,

    /// Logical type tag (e.g. "Anomaly", "Hunting", "TTP")
    #[serde(rename = "type")]
    pub content_type: Option<String>,

    /// Human readable name from the artifact body, when present
    pub name: Option<String>,

    pub flags: LifecycleFlags,
}

impl ContentArtifact {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let flags = LifecycleFlags::from_path(&path);
        Self {
            path,
            content_type: None,
            name: None,
            flags,
        }
    }

    #[cfg(test)]
    pub fn with_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Display name: the declared name, or the file name
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.path.rsplit('/').next().unwrap_or(&self.path))
    }
}

impl fmt::Display for ContentArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// How the authoritative set of content to test is chosen
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    All,
    Changes,
    Selected,
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMode::All => "all",
            SelectionMode::Changes => "changes",
            SelectionMode::Selected => "selected",
        }
    }
}

impl FromStr for SelectionMode {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SelectionMode::All),
            "changes" => Ok(SelectionMode::Changes),
            "selected" => Ok(SelectionMode::Selected),
            other => Err(OrchestratorError::selection(format!(
                "Unsupported mode [{other}]. Supported modes are: all, changes, selected"
            ))),
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_from_path() {
        let flags = LifecycleFlags::from_path("detections/experimental/cloud/foo.yml");
        assert!(flags.experimental);
        assert!(!flags.deprecated);

        let flags = LifecycleFlags::from_path("detections/deprecated/foo.yml");
        assert!(flags.deprecated);

        let flags = LifecycleFlags::from_path("detections/endpoint/ssa___foo.yml");
        assert!(flags.alternate_dialect);
        assert!(!flags.experimental);
    }

    #[test]
    fn test_experimental_only_matches_category_segment() {
        let flags = LifecycleFlags::from_path("detections/endpoint/experimental_rule.yml");
        assert!(!flags.experimental);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("all".parse::<SelectionMode>().unwrap(), SelectionMode::All);
        assert_eq!(
            "selected".parse::<SelectionMode>().unwrap(),
            SelectionMode::Selected
        );
        let err = "everything".parse::<SelectionMode>().unwrap_err();
        assert!(matches!(err, OrchestratorError::Selection(_)));
    }

    #[test]
    fn test_display_name_falls_back_to_file_name() {
        let artifact = ContentArtifact::new("detections/network/dns_tunnel.yml");
        assert_eq!(artifact.display_name(), "dns_tunnel.yml");

        let mut named = artifact;
        named.name = Some("DNS Tunnel".to_string());
        assert_eq!(named.display_name(), "DNS Tunnel");
    }
}
