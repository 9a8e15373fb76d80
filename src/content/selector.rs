//! Content selection
//!
//! Turns a selection mode plus the discovered catalog into the ordered,
//! deduplicated list of artifacts a run tests.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::{DiffProvider, PathConvention};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::{ContentArtifact, SelectionMode};

/// Standing exclusion rules and the type allow-list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionFilter {
    /// Logical types eligible for testing
    pub allowed_types: Vec<String>,
    pub exclude_experimental: bool,
    pub exclude_deprecated: bool,
    pub exclude_alternate_dialect: bool,
}

impl Default for SelectionFilter {
    fn default() -> Self {
        Self {
            allowed_types: vec!["Anomaly".into(), "Hunting".into(), "TTP".into()],
            exclude_experimental: true,
            exclude_deprecated: true,
            exclude_alternate_dialect: true,
        }
    }
}

impl SelectionFilter {
    /// Reason an artifact is filtered out, if any
    pub fn rejection(&self, artifact: &ContentArtifact) -> Option<String> {
        if self.exclude_experimental && artifact.flags.experimental {
            return Some("experimental".to_string());
        }
        if self.exclude_deprecated && artifact.flags.deprecated {
            return Some("deprecated".to_string());
        }
        if self.exclude_alternate_dialect && artifact.flags.alternate_dialect {
            return Some("alternate dialect".to_string());
        }
        match &artifact.content_type {
            Some(t) if self.allowed_types.iter().any(|a| a == t) => None,
            Some(t) => Some(format!("type [{t}] not in {:?}", self.allowed_types)),
            None => Some("no type".to_string()),
        }
    }
}

/// Chooses the authoritative set of content to test
#[derive(Clone, Debug, Default)]
pub struct ContentSelector {
    convention: PathConvention,
    filter: SelectionFilter,
}

impl ContentSelector {
    pub fn new(convention: PathConvention, filter: SelectionFilter) -> Self {
        Self { convention, filter }
    }

    /// Select artifacts for `mode`
    ///
    /// `explicit` is required for `selected` mode; an empty list is a valid,
    /// empty selection. The result keeps discovery order.
    pub async fn select(
        &self,
        mode: SelectionMode,
        all: &[ContentArtifact],
        explicit: Option<&[String]>,
        diff: &dyn DiffProvider,
    ) -> OrchestratorResult<Vec<ContentArtifact>> {
        let candidates: Vec<&ContentArtifact> = match mode {
            SelectionMode::All => all.iter().collect(),
            SelectionMode::Selected => {
                let explicit = explicit.ok_or_else(|| {
                    OrchestratorError::selection(
                        "mode [selected] requires an explicit list of content paths",
                    )
                })?;
                self.explicit_candidates(all, explicit)?
            }
            SelectionMode::Changes => {
                let changes = diff.changed_paths().await?;
                let wanted = self.changed_content_paths(&changes.paths());
                all.iter()
                    .filter(|a| wanted.contains(a.path.as_str()))
                    .collect()
            }
        };

        let candidate_count = candidates.len();
        let mut seen = HashSet::new();
        let selection: Vec<ContentArtifact> = candidates
            .into_iter()
            .filter(|a| match self.filter.rejection(a) {
                Some(reason) => {
                    debug!("Excluding {}: {}", a.path, reason);
                    false
                }
                None => true,
            })
            .filter(|a| seen.insert(a.path.clone()))
            .cloned()
            .collect();

        info!(
            "Mode [{}] selected {} of {} candidate artifacts ({} discovered)",
            mode,
            selection.len(),
            candidate_count,
            all.len()
        );

        Ok(selection)
    }

    fn explicit_candidates<'a>(
        &self,
        all: &'a [ContentArtifact],
        explicit: &[String],
    ) -> OrchestratorResult<Vec<&'a ContentArtifact>> {
        let mut wanted = HashSet::new();
        for entry in explicit {
            wanted.insert(self.convention.normalize_to_content(entry)?);
        }

        let known: HashSet<&str> = all.iter().map(|a| a.path.as_str()).collect();
        let mut unknown: Vec<&String> = wanted.iter().filter(|p| !known.contains(p.as_str())).collect();
        if !unknown.is_empty() {
            unknown.sort();
            return Err(OrchestratorError::selection(format!(
                "explicit list names content that does not exist: {}",
                unknown
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        Ok(all.iter().filter(|a| wanted.contains(&a.path)).collect())
    }

    /// Map changed paths on either side of the convention to content paths
    fn changed_content_paths(&self, changed: &[String]) -> HashSet<String> {
        let mut wanted = HashSet::new();
        for path in changed {
            if self.convention.is_test_path(path) {
                match self.convention.to_content_path(path) {
                    Ok(content) => {
                        wanted.insert(content);
                    }
                    Err(e) => warn!("{e}"),
                }
            } else if self.convention.is_content_path(path) {
                wanted.insert(path.clone());
            } else {
                debug!("Ignoring change outside the content and test trees: {}", path);
            }
        }
        wanted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ChangeSet;
    use async_trait::async_trait;

    struct FixedDiff(ChangeSet);

    #[async_trait]
    impl DiffProvider for FixedDiff {
        async fn changed_paths(&self) -> OrchestratorResult<ChangeSet> {
            Ok(self.0.clone())
        }
    }

    fn no_changes() -> FixedDiff {
        FixedDiff(ChangeSet::default())
    }

    fn catalog() -> Vec<ContentArtifact> {
        vec![
            ContentArtifact::new("detections/endpoint/a.yml").with_type("TTP"),
            ContentArtifact::new("detections/endpoint/b.yml").with_type("Anomaly"),
            ContentArtifact::new("detections/experimental/c.yml").with_type("TTP"),
            ContentArtifact::new("detections/deprecated/d.yml").with_type("TTP"),
            ContentArtifact::new("detections/endpoint/ssa___e.yml").with_type("TTP"),
            ContentArtifact::new("detections/cloud/f.yml").with_type("Correlation"),
            ContentArtifact::new("detections/cloud/g.yml").with_type("Hunting"),
        ]
    }

    fn paths(selection: &[ContentArtifact]) -> Vec<&str> {
        selection.iter().map(|a| a.path.as_str()).collect()
    }

    #[tokio::test]
    async fn test_all_applies_exclusions_and_types() {
        let selector = ContentSelector::default();
        let selection = selector
            .select(SelectionMode::All, &catalog(), None, &no_changes())
            .await
            .unwrap();

        assert_eq!(
            paths(&selection),
            vec![
                "detections/endpoint/a.yml",
                "detections/endpoint/b.yml",
                "detections/cloud/g.yml"
            ]
        );
    }

    #[tokio::test]
    async fn test_exclusions_can_be_disabled() {
        let filter = SelectionFilter {
            exclude_experimental: false,
            ..Default::default()
        };
        let selector = ContentSelector::new(PathConvention::default(), filter);
        let selection = selector
            .select(SelectionMode::All, &catalog(), None, &no_changes())
            .await
            .unwrap();
        assert!(paths(&selection).contains(&"detections/experimental/c.yml"));
        assert!(!paths(&selection).contains(&"detections/deprecated/d.yml"));
    }

    #[tokio::test]
    async fn test_selected_empty_list_is_empty_selection() {
        let selector = ContentSelector::default();
        let empty: Vec<String> = Vec::new();
        let selection = selector
            .select(SelectionMode::Selected, &catalog(), Some(&empty), &no_changes())
            .await
            .unwrap();
        assert!(selection.is_empty());
    }

    #[tokio::test]
    async fn test_selected_without_list_is_error() {
        let selector = ContentSelector::default();
        let err = selector
            .select(SelectionMode::Selected, &catalog(), None, &no_changes())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Selection(_)));
    }

    #[tokio::test]
    async fn test_selected_full_path_matching_keeps_discovery_order() {
        let selector = ContentSelector::default();
        let explicit = vec![
            "detections/cloud/g.yml".to_string(),
            "tests/endpoint/a.test.yml".to_string(),
            "detections/cloud/g.yml".to_string(),
            "detections/experimental/c.yml".to_string(),
        ];
        let selection = selector
            .select(SelectionMode::Selected, &catalog(), Some(&explicit), &no_changes())
            .await
            .unwrap();

        // Experimental content is still downselected in selected mode
        assert_eq!(
            paths(&selection),
            vec!["detections/endpoint/a.yml", "detections/cloud/g.yml"]
        );
    }

    #[tokio::test]
    async fn test_selected_suffix_does_not_match() {
        let selector = ContentSelector::default();
        let explicit = vec!["endpoint/a.yml".to_string()];
        let err = selector
            .select(SelectionMode::Selected, &catalog(), Some(&explicit), &no_changes())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ConventionViolation { .. }));

        let explicit = vec!["detections/endpoint/zzz.yml".to_string()];
        let err = selector
            .select(SelectionMode::Selected, &catalog(), Some(&explicit), &no_changes())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Selection(_)));
    }

    #[tokio::test]
    async fn test_changes_maps_tests_back_to_content() {
        let selector = ContentSelector::default();
        let diff = FixedDiff(ChangeSet {
            untracked: vec!["tests/cloud/g.test.yml".into()],
            changed: vec![
                "detections/endpoint/b.yml".into(),
                "tests/endpoint/b.test.yml".into(),
                "README.md".into(),
                "detections/experimental/c.yml".into(),
            ],
        });

        let selection = selector
            .select(SelectionMode::Changes, &catalog(), None, &diff)
            .await
            .unwrap();
        assert_eq!(
            paths(&selection),
            vec!["detections/endpoint/b.yml", "detections/cloud/g.yml"]
        );
    }

    #[tokio::test]
    async fn test_changes_with_no_diff_is_empty() {
        let selector = ContentSelector::default();
        let selection = selector
            .select(SelectionMode::Changes, &catalog(), None, &no_changes())
            .await
            .unwrap();
        assert!(selection.is_empty());
    }
}
