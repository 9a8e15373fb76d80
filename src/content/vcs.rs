//! Version-control change detection
//!
//! Supplies the set of changed and untracked files that `changes` mode selects
//! from. The provider is passed into selection explicitly so tests can inject a
//! fixed change set.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Files that differ from the base reference
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Files not yet tracked by version control
    pub untracked: Vec<String>,
    /// Files added, modified or renamed between base and head
    pub changed: Vec<String>,
}

impl ChangeSet {
    /// Untracked files first, then changed files, without duplicates
    pub fn paths(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.untracked
            .iter()
            .chain(self.changed.iter())
            .filter(|p| seen.insert(p.as_str()))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.untracked.is_empty() && self.changed.is_empty()
    }
}

/// Source of changed paths for `changes` mode
#[async_trait]
pub trait DiffProvider: Send + Sync {
    async fn changed_paths(&self) -> OrchestratorResult<ChangeSet>;
}

/// Diff provider backed by the `git` CLI
#[derive(Clone, Debug)]
pub struct GitDiffProvider {
    repo: PathBuf,
    base_ref: String,
    head_ref: String,
    roots: Vec<String>,
}

impl GitDiffProvider {
    pub fn new(repo: impl Into<PathBuf>, base_ref: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            base_ref: base_ref.into(),
            head_ref: "HEAD".to_string(),
            roots: Vec::new(),
        }
    }

    pub fn with_head(mut self, head_ref: impl Into<String>) -> Self {
        self.head_ref = head_ref.into();
        self
    }

    /// Restrict the diff to these repository-relative directories
    pub fn with_roots(mut self, roots: Vec<String>) -> Self {
        self.roots = roots;
        self
    }

    async fn git(&self, args: &[String]) -> OrchestratorResult<String> {
        debug!("git {}", args.join(" "));

        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .output()
            .await
            .map_err(|e| OrchestratorError::selection(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::selection(format!(
                "git {} failed: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn resolve(&self, reference: &str) -> OrchestratorResult<String> {
        let args = vec![
            "rev-parse".to_string(),
            "--verify".to_string(),
            format!("{reference}^{{commit}}"),
        ];
        self.git(&args)
            .await
            .map(|s| s.trim().to_string())
            .map_err(|_| {
                OrchestratorError::selection(format!(
                    "cannot resolve reference [{reference}] in {}",
                    self.repo.display()
                ))
            })
    }

    fn with_pathspec(&self, mut args: Vec<String>) -> Vec<String> {
        if !self.roots.is_empty() {
            args.push("--".to_string());
            args.extend(self.roots.iter().cloned());
        }
        args
    }
}

#[async_trait]
impl DiffProvider for GitDiffProvider {
    async fn changed_paths(&self) -> OrchestratorResult<ChangeSet> {
        let base = self.resolve(&self.base_ref).await?;
        let head = self.resolve(&self.head_ref).await?;

        if base == head {
            info!(
                "Base [{}] and head [{}] resolve to the same commit, nothing to diff",
                self.base_ref, self.head_ref
            );
            return Ok(ChangeSet::default());
        }

        let untracked = self
            .git(&self.with_pathspec(vec![
                "ls-files".to_string(),
                "--others".to_string(),
                "--exclude-standard".to_string(),
            ]))
            .await?;

        let changed = self
            .git(&self.with_pathspec(vec![
                "diff".to_string(),
                "--name-only".to_string(),
                "--diff-filter=AMR".to_string(),
                format!("{base}...{head}"),
            ]))
            .await?;

        let change_set = ChangeSet {
            untracked: parse_name_list(&untracked),
            changed: parse_name_list(&changed),
        };

        info!(
            "Found {} untracked and {} changed files between {} and {}",
            change_set.untracked.len(),
            change_set.changed.len(),
            self.base_ref,
            self.head_ref
        );

        Ok(change_set)
    }
}

/// Parse newline-separated `git` path output
pub fn parse_name_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.trim_matches('"').to_string())
        .collect()
}
