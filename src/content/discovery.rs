//! Content discovery
//!
//! Walks the content and test trees of a repository and builds the artifact
//! catalog a run selects from.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::PathConvention;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::ContentArtifact;

/// The fields of a content artifact body that selection cares about
#[derive(Debug, Default, Deserialize)]
struct ArtifactHeader {
    #[serde(rename = "type")]
    content_type: Option<String>,
    name: Option<String>,
}

/// Every artifact found on disk, in discovery order
#[derive(Clone, Debug, Default)]
pub struct ContentCatalog {
    pub artifacts: Vec<ContentArtifact>,
    pub test_paths: Vec<String>,
}

/// Discover content and test artifacts under `repo`
///
/// Walk order is sorted by file name so the catalog is identical between runs.
/// Content files whose body does not parse are skipped with a warning.
pub fn discover(repo: &Path, convention: &PathConvention) -> OrchestratorResult<ContentCatalog> {
    let content_dir = repo.join(&convention.content_root);
    if !content_dir.is_dir() {
        return Err(OrchestratorError::config(format!(
            "content root {} does not exist",
            content_dir.display()
        )));
    }

    let mut catalog = ContentCatalog::default();

    for path in walk_files(repo, &convention.content_root)? {
        if !convention.is_content_path(&path) {
            continue;
        }

        match read_header(&repo.join(&path)) {
            Ok(header) => {
                let mut artifact = ContentArtifact::new(&path);
                artifact.content_type = header.content_type;
                artifact.name = header.name;
                catalog.artifacts.push(artifact);
            }
            Err(e) => warn!("Skipping unparseable content file {}: {}", path, e),
        }
    }

    let test_dir = repo.join(&convention.test_root);
    if test_dir.is_dir() {
        catalog.test_paths = walk_files(repo, &convention.test_root)?
            .into_iter()
            .filter(|p| convention.is_test_path(p))
            .collect();
    } else {
        warn!("Test root {} does not exist", test_dir.display());
    }

    debug!(
        "Discovered {} content artifacts and {} test artifacts",
        catalog.artifacts.len(),
        catalog.test_paths.len()
    );

    Ok(catalog)
}

fn walk_files(repo: &Path, root: &str) -> OrchestratorResult<Vec<String>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(repo.join(root)).sort_by_file_name() {
        let entry = entry.map_err(|e| OrchestratorError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(relative) = relative_path(repo, entry.path()) {
            files.push(relative);
        }
    }

    Ok(files)
}

/// `/`-separated path of `path` relative to `repo`
fn relative_path(repo: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(repo).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn read_header(path: &Path) -> Result<ArtifactHeader, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_yaml::from_str(&content).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, relative: &str, body: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn content_paths(catalog: &ContentCatalog) -> Vec<&str> {
        catalog.artifacts.iter().map(|a| a.path.as_str()).collect()
    }

    #[test]
    fn test_discover_reads_type_and_flags() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "detections/endpoint/b.yml", "name: B\ntype: TTP\n");
        write(root, "detections/endpoint/a.yml", "name: A\ntype: Anomaly\nsearch: x\n");
        write(root, "detections/experimental/c.yml", "type: Hunting\n");
        write(root, "detections/endpoint/readme.md", "not content");
        write(root, "tests/endpoint/a.test.yml", "tests: []\n");

        let catalog = discover(root, &PathConvention::default()).unwrap();
        let paths = content_paths(&catalog);
        assert_eq!(
            paths,
            vec![
                "detections/endpoint/a.yml",
                "detections/endpoint/b.yml",
                "detections/experimental/c.yml",
            ]
        );
        assert_eq!(catalog.artifacts[0].content_type.as_deref(), Some("Anomaly"));
        assert_eq!(catalog.artifacts[0].name.as_deref(), Some("A"));
        assert!(catalog.artifacts[2].flags.experimental);
        assert_eq!(catalog.test_paths, vec!["tests/endpoint/a.test.yml"]);
    }

    #[test]
    fn test_unparseable_content_is_skipped() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "detections/cloud/good.yml", "type: TTP\n");
        write(root, "detections/cloud/bad.yml", "type: [unclosed\n");

        let catalog = discover(root, &PathConvention::default()).unwrap();
        assert_eq!(content_paths(&catalog), vec!["detections/cloud/good.yml"]);
        assert!(catalog.test_paths.is_empty());
    }

    #[test]
    fn test_missing_content_root_is_config_error() {
        let dir = tempdir().unwrap();
        let err = discover(dir.path(), &PathConvention::default()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }
}
