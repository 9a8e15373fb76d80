//! Work partitioning
//!
//! Splits a selection across worker sessions and writes dry-run manifests that
//! can be fed back later as `selected` runs.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::ConfigFile;
use crate::content::PathConvention;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::{ContentArtifact, SelectionMode};

/// File name of the manifest for shard `index`
pub fn manifest_file_name(index: usize) -> String {
    format!("config_tests_{index}.yml")
}

/// One worker's share of the selection
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Shard {
    pub index: usize,
    pub artifacts: Vec<ContentArtifact>,
}

impl Shard {
    pub fn paths(&self) -> Vec<String> {
        self.artifacts.iter().map(|a| a.path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Round-robin partitioner
pub struct Sharder;

impl Sharder {
    /// Element `i` of the selection goes to shard `i % worker_count`
    ///
    /// Always returns exactly `worker_count` shards; trailing shards are empty
    /// when the selection is smaller than the worker count.
    pub fn shard(
        selection: &[ContentArtifact],
        worker_count: usize,
    ) -> OrchestratorResult<Vec<Shard>> {
        if worker_count == 0 {
            return Err(OrchestratorError::config("worker count must be at least 1"));
        }

        let mut shards: Vec<Shard> = (0..worker_count)
            .map(|index| Shard {
                index,
                artifacts: Vec::new(),
            })
            .collect();

        for (i, artifact) in selection.iter().enumerate() {
            shards[i % worker_count].artifacts.push(artifact.clone());
        }

        debug!(
            "Sharded {} artifacts across {} workers: {:?}",
            selection.len(),
            worker_count,
            shards.iter().map(Shard::len).collect::<Vec<_>>()
        );

        Ok(shards)
    }
}

/// Writes one single-worker `selected` configuration per shard
pub struct ManifestWriter<'a> {
    base: &'a ConfigFile,
    convention: &'a PathConvention,
}

impl<'a> ManifestWriter<'a> {
    pub fn new(base: &'a ConfigFile, convention: &'a PathConvention) -> Self {
        Self { base, convention }
    }

    /// The configuration recorded for one shard
    pub fn manifest(&self, shard: &Shard) -> OrchestratorResult<ConfigFile> {
        let paths = shard
            .artifacts
            .iter()
            .map(|a| self.convention.normalize_to_content(&a.path))
            .collect::<OrchestratorResult<Vec<String>>>()?;

        let mut manifest = self.base.without_credentials();
        manifest.test.workers = Some(1);
        manifest.test.mode = Some(SelectionMode::Selected);
        manifest.test.selected = Some(paths);
        if let Some(server) = manifest.test.servers.get(shard.index).cloned() {
            manifest.test.servers = vec![server];
        }

        Ok(manifest)
    }

    /// Write every manifest into `dir`, returning the written paths in shard order
    pub fn write_all(&self, shards: &[Shard], dir: &Path) -> OrchestratorResult<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;

        let mut written = Vec::with_capacity(shards.len());
        for shard in shards {
            let manifest = self.manifest(shard)?;
            let content = serde_yaml::to_string(&manifest).map_err(|e| {
                OrchestratorError::config(format!("cannot serialize manifest: {e}"))
            })?;

            let path = dir.join(manifest_file_name(shard.index));
            fs::write(&path, content)?;
            info!(
                "Wrote manifest for worker {} ({} artifacts) to {}",
                shard.index,
                shard.len(),
                path.display()
            );
            written.push(path);
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn selection(n: usize) -> Vec<ContentArtifact> {
        (0..n)
            .map(|i| ContentArtifact::new(format!("detections/endpoint/rule_{i}.yml")).with_type("TTP"))
            .collect()
    }

    #[test]
    fn test_round_robin_sizes() {
        let shards = Sharder::shard(&selection(7), 3).unwrap();
        let sizes: Vec<usize> = shards.iter().map(Shard::len).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
        assert_eq!(
            shards[1].paths(),
            vec!["detections/endpoint/rule_1.yml", "detections/endpoint/rule_4.yml"]
        );
    }

    #[test]
    fn test_partition_is_exact() {
        for n in [0, 1, 5, 12] {
            for workers in 1..6 {
                let items = selection(n);
                let shards = Sharder::shard(&items, workers).unwrap();
                assert_eq!(shards.len(), workers);

                let mut all: Vec<String> = shards.iter().flat_map(Shard::paths).collect();
                assert_eq!(all.len(), n);
                let unique: HashSet<&String> = all.iter().collect();
                assert_eq!(unique.len(), n);

                all.sort();
                let mut expected: Vec<String> = items.iter().map(|a| a.path.clone()).collect();
                expected.sort();
                assert_eq!(all, expected);
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let items = selection(9);
        assert_eq!(
            Sharder::shard(&items, 4).unwrap(),
            Sharder::shard(&items, 4).unwrap()
        );
    }

    #[test]
    fn test_more_workers_than_items() {
        let shards = Sharder::shard(&selection(2), 4).unwrap();
        assert!(shards[2].is_empty());
        assert!(shards[3].is_empty());
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(Sharder::shard(&selection(2), 0).is_err());
    }

    #[test]
    fn test_manifest_forces_single_selected_worker() {
        let mut base = ConfigFile::default();
        base.test.workers = Some(4);
        base.test.container.password = "secret".to_string();
        let convention = PathConvention::default();
        let writer = ManifestWriter::new(&base, &convention);

        let shard = Sharder::shard(&selection(3), 2).unwrap().remove(0);
        let manifest = writer.manifest(&shard).unwrap();
        assert_eq!(manifest.test.workers, Some(1));
        assert_eq!(manifest.test.mode, Some(SelectionMode::Selected));
        assert_eq!(
            manifest.test.selected,
            Some(vec![
                "detections/endpoint/rule_0.yml".to_string(),
                "detections/endpoint/rule_2.yml".to_string()
            ])
        );
        assert!(manifest.test.container.password.is_empty());
    }

    #[test]
    fn test_write_all_round_trips_through_config_loader() {
        let dir = tempdir().unwrap();
        let base = ConfigFile::default();
        let convention = PathConvention::default();
        let shards = Sharder::shard(&selection(5), 2).unwrap();

        let written = ManifestWriter::new(&base, &convention)
            .write_all(&shards, dir.path())
            .unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[1], dir.path().join("config_tests_1.yml"));

        let reloaded = ConfigFile::load(&written[1]).unwrap();
        assert_eq!(reloaded.test.selected.unwrap().len(), 2);
    }
}
