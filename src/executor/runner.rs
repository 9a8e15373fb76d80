//! Test run orchestration
//!
//! Discovers content, selects and pairs it, shards the selection and then
//! either writes dry-run manifests or runs every shard on its own session and
//! aggregates the outcomes.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::backend::{SessionSpec, WorkerBackend};
use super::docker::DockerBackend;
use super::interrupt::spawn_interrupt_handler;
use super::pool::WorkerPool;
use super::server::ServerBackend;
use super::session::SessionSettings;
use super::signal::{FailureSignal, PhaseTracker};
use crate::config::{InfrastructureKind, RunConfig};
use crate::content::{discover, ContentCatalog, ContentSelector, DiffProvider, GitDiffProvider};
use crate::deploy::{apps_env_value, AppStager, ReadinessProbe};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::http::ManagementClient;
use crate::models::{ContentArtifact, SelectionMode};
use crate::results::{ResultsAggregator, Summary, SummaryWriter};
use crate::shard::{ManifestWriter, Shard, Sharder};
use crate::utils::Timer;

/// Selection and its shards, fixed before any session exists
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub selection: Vec<ContentArtifact>,
    pub shards: Vec<Shard>,
}

/// What a run produced
#[derive(Debug)]
pub enum RunReport {
    DryRun {
        plan: RunPlan,
        manifests: Vec<PathBuf>,
    },
    Completed(Summary),
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunReport::DryRun { .. } => 0,
            RunReport::Completed(summary) => summary.exit_code(),
        }
    }
}

/// Session specs for the configured infrastructure, one per worker
pub fn session_specs(config: &RunConfig) -> OrchestratorResult<Vec<SessionSpec>> {
    match config.infrastructure {
        InfrastructureKind::Container => (0..config.workers)
            .map(|ordinal| SessionSpec::for_container(ordinal, &config.container))
            .collect(),
        InfrastructureKind::Server => Ok(config
            .servers
            .iter()
            .enumerate()
            .map(|(ordinal, server)| SessionSpec::for_server(ordinal, server))
            .collect()),
    }
}

/// Test runner for one resolved configuration
pub struct TestRunner {
    config: RunConfig,
    handle_interrupts: bool,
}

impl TestRunner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            handle_interrupts: true,
        }
    }

    /// Leave operator interrupts to the default process behavior
    #[cfg(test)]
    pub fn without_interrupt_handler(mut self) -> Self {
        self.handle_interrupts = false;
        self
    }

    fn diff_provider(&self) -> GitDiffProvider {
        GitDiffProvider::new(&self.config.repo, &self.config.base_ref)
            .with_head(&self.config.head_ref)
            .with_roots(self.config.roots())
    }

    /// Run against git and the configured infrastructure
    pub async fn run(&self) -> Result<RunReport> {
        let diff = self.diff_provider();
        self.run_with(&diff, None).await
    }

    /// Run with an explicit change source and, optionally, a ready-made backend
    pub async fn run_with(
        &self,
        diff: &dyn DiffProvider,
        backend: Option<Arc<dyn WorkerBackend>>,
    ) -> Result<RunReport> {
        let plan = self.plan(diff).await?;

        if self.config.dry_run {
            let manifests = self.write_manifests(&plan)?;
            return Ok(RunReport::DryRun { plan, manifests });
        }

        let backend = match backend {
            Some(backend) => backend,
            None => self.build_backend().await?,
        };
        let summary = self.execute(backend, &plan).await?;
        Ok(RunReport::Completed(summary))
    }

    /// Discover, select, verify pairing and shard; nothing is started
    pub async fn plan(&self, diff: &dyn DiffProvider) -> OrchestratorResult<RunPlan> {
        let config = &self.config;
        let catalog = discover(&config.repo, &config.convention)?;
        info!(
            "Discovered {} content artifact(s) and {} test(s)",
            catalog.artifacts.len(),
            catalog.test_paths.len()
        );

        let selector = ContentSelector::new(config.convention.clone(), config.filter.clone());
        let selection = selector
            .select(config.mode, &catalog.artifacts, config.explicit.as_deref(), diff)
            .await?;

        self.verify_pairing(&catalog, &selection)?;

        if selection.is_empty() {
            warn!("Nothing selected for mode [{}]", config.mode);
        }

        let shards = Sharder::shard(&selection, config.workers)?;
        Ok(RunPlan { selection, shards })
    }

    fn verify_pairing(
        &self,
        catalog: &ContentCatalog,
        selection: &[ContentArtifact],
    ) -> OrchestratorResult<()> {
        let convention = &self.config.convention;
        let selected: HashSet<&str> = selection.iter().map(|a| a.path.as_str()).collect();
        let known: HashSet<&str> = catalog.artifacts.iter().map(|a| a.path.as_str()).collect();

        // Tests of selected content, plus orphaned tests when everything is tested
        let tests: Vec<String> = catalog
            .test_paths
            .iter()
            .filter(|t| match convention.to_content_path(t) {
                Ok(content) => {
                    selected.contains(content.as_str())
                        || (self.config.mode == SelectionMode::All && !known.contains(content.as_str()))
                }
                Err(_) => false,
            })
            .cloned()
            .collect();
        let contents: Vec<String> = selection.iter().map(|a| a.path.clone()).collect();

        let report = convention.verify_pairing(
            &contents,
            &tests,
            self.config.filter.exclude_alternate_dialect,
        )?;
        report.log();
        report.into_result().map(|_| ())
    }

    fn write_manifests(&self, plan: &RunPlan) -> OrchestratorResult<Vec<PathBuf>> {
        let base = self.config.to_config_file();
        let written = ManifestWriter::new(&base, &self.config.convention)
            .write_all(&plan.shards, &self.config.manifest_dir)?;
        info!(
            "Dry run: wrote {} manifest(s) for {} artifact(s) to {}",
            written.len(),
            plan.selection.len(),
            self.config.manifest_dir.display()
        );
        Ok(written)
    }

    async fn build_backend(&self) -> Result<Arc<dyn WorkerBackend>> {
        let config = &self.config;
        let client = ManagementClient::with_timeout(config.readiness.request_timeout_secs)?;
        let repo_dir = config
            .repo
            .canonicalize()
            .with_context(|| format!("Repository {} not found", config.repo.display()))?;

        let backend: Arc<dyn WorkerBackend> = match config.infrastructure {
            InfrastructureKind::Container => {
                let stager = AppStager::new(
                    client.clone(),
                    &config.container.apps_dir,
                    &config.container.apps_mount,
                );
                let staged = stager.stage(&config.apps).await?;
                let apps_dir = stager
                    .dir()
                    .canonicalize()
                    .with_context(|| format!("Apps directory {} not found", stager.dir().display()))?;

                Arc::new(DockerBackend::new(
                    config.container.clone(),
                    config.readiness.clone(),
                    client,
                    apps_dir,
                    repo_dir,
                    apps_env_value(&staged),
                    config.test_command.clone(),
                ))
            }
            InfrastructureKind::Server => Arc::new(ServerBackend::new(
                config.readiness.clone(),
                client,
                repo_dir,
                config.test_command.clone(),
            )),
        };

        backend.check_available().await?;
        Ok(backend)
    }

    /// Run the plan on `backend`, aggregate and persist the summary
    pub async fn execute(
        &self,
        backend: Arc<dyn WorkerBackend>,
        plan: &RunPlan,
    ) -> OrchestratorResult<Summary> {
        let config = &self.config;
        let timer = Timer::start();
        let specs = session_specs(config)?;
        if specs.len() != plan.shards.len() {
            return Err(OrchestratorError::config(format!(
                "{} session(s) configured for {} shard(s)",
                specs.len(),
                plan.shards.len()
            )));
        }

        let signal = FailureSignal::new();
        let phase = PhaseTracker::new();
        let interrupts = self.handle_interrupts.then(|| {
            spawn_interrupt_handler(
                backend.clone(),
                specs.iter().map(|s| s.name.clone()).collect(),
                signal.clone(),
                phase.clone(),
            )
        });

        let settings = SessionSettings::new(
            config.convention.clone(),
            &config.bundles,
            ReadinessProbe::from_policy(&config.readiness),
        )
        .with_bundle_attempts(config.readiness.bundle_attempts)
        .with_retry_delay(Duration::from_secs(config.readiness.interval_secs));

        let aggregator = ResultsAggregator::new(config.mode, config.workers);
        info!(
            "Run {}: {} artifact(s) on {} {} session(s)",
            aggregator.run_id(),
            plan.selection.len(),
            specs.len(),
            backend.kind()
        );

        let pool = WorkerPool::new(backend, signal.clone(), phase, settings);
        let result = pool.run_all(specs, plan.shards.clone()).await;

        if let Some(handle) = interrupts {
            handle.abort();
        }
        let report = result?;
        for session in report.faulted() {
            warn!(
                "{} faulted: {}",
                session.name,
                session.fault.as_deref().unwrap_or("unknown cause")
            );
        }

        let summary = aggregator.merge(&plan.selection, &report, signal.cause().as_ref());
        SummaryWriter::write_or_warn(&summary, &config.summary_path);

        info!(
            "Run {} finished in {:.1}s: {}/{} passed",
            summary.run_id,
            timer.elapsed().as_secs_f64(),
            summary.counts.passed,
            summary.counts.total
        );
        Ok(summary)
    }
}
