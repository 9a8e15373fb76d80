//! Configuration module
//!
//! Loads the config file and environment overrides and resolves them, together
//! with command-line values, into one `RunConfig` used for the rest of a run.

mod env;
mod file;
mod infrastructure;

pub use env::{print_env_help, EnvConfig};
pub use file::{ConfigFile, RepoSection};
pub use infrastructure::{resolve_servers, InfrastructureKind, ServerInfo, SERVER_INFO_ENV};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::content::{PathConvention, SelectionFilter};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::SelectionMode;

/// Settings for container sessions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Image every worker container is started from
    pub image: String,

    /// Container name template; `{}` is replaced by the worker ordinal
    pub name_template: String,

    /// Host port bases; worker `n` gets `base + n * port_stride`
    pub web_port: u16,
    pub hec_port: u16,
    pub mgmt_port: u16,
    pub port_stride: u16,

    pub username: String,
    pub password: String,

    /// Host directory content packages are staged into
    pub apps_dir: String,

    /// Where the staged packages are mounted (read-only) inside the container
    pub apps_mount: String,

    /// Environment variable telling the container which packages to install
    pub apps_env: String,

    /// Where the repository is mounted (read-only) so tests can be read
    pub repo_mount: String,

    /// Extra environment passed to every container
    pub env: BTreeMap<String, String>,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("SPLUNK_START_ARGS".to_string(), "--accept-license".to_string());

        Self {
            image: "splunk/splunk:latest".to_string(),
            name_template: "contentctl_worker_{}".to_string(),
            web_port: 8000,
            hec_port: 8088,
            mgmt_port: 8089,
            port_stride: 100,
            username: "admin".to_string(),
            password: "Chang3d!".to_string(),
            apps_dir: "apps".to_string(),
            apps_mount: "/tmp/apps".to_string(),
            apps_env: "SPLUNK_APPS_URL".to_string(),
            repo_mount: "/tmp/content".to_string(),
            env,
        }
    }
}

impl ContainerSettings {
    pub fn without_credentials(&self) -> Self {
        Self {
            password: String::new(),
            ..self.clone()
        }
    }
}

/// Support bundle kinds in the order they must be applied
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Indexes,
    DataModels,
    Authorizations,
}

/// A tar archive extracted into every container during provisioning
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportBundle {
    pub kind: BundleKind,
    pub local_path: String,
    pub container_path: String,
}

impl SupportBundle {
    pub fn new(
        kind: BundleKind,
        local_path: impl Into<String>,
        container_path: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            local_path: local_path.into(),
            container_path: container_path.into(),
        }
    }

    /// Index definitions, shared data models and access control
    pub fn defaults() -> Vec<SupportBundle> {
        vec![
            SupportBundle::new(
                BundleKind::Indexes,
                "support/indexes.conf.tar",
                "/opt/splunk/etc/apps/search",
            ),
            SupportBundle::new(
                BundleKind::DataModels,
                "support/datamodels.conf.tar",
                "/opt/splunk/etc/apps/Splunk_SA_CIM",
            ),
            SupportBundle::new(
                BundleKind::Authorizations,
                "support/authorize.conf.tar",
                "/opt/splunk/etc/system/local",
            ),
        ]
    }
}

/// Sort bundles into application order, keeping config order within a kind
pub fn ordered_bundles(bundles: &[SupportBundle]) -> Vec<SupportBundle> {
    let mut ordered = bundles.to_vec();
    ordered.sort_by_key(|b| b.kind);
    ordered
}

/// A content package installed into every session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_path: Option<String>,
}

/// How long to wait for a session's management endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessPolicy {
    /// Path probed on the management endpoint
    pub path: String,
    /// Probe over https
    pub tls: bool,
    pub attempts: u32,
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Attempts per support bundle copy
    pub bundle_attempts: u32,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            path: "/services/server/info".to_string(),
            tls: true,
            attempts: 60,
            interval_secs: 5,
            request_timeout_secs: 10,
            bundle_attempts: 3,
        }
    }
}

/// Values supplied on the command line; `None` means not given
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub mode: Option<String>,
    pub workers: Option<usize>,
    pub explicit: Option<Vec<String>>,
    pub servers: Vec<String>,
    pub infrastructure: Option<String>,
    pub repo: Option<PathBuf>,
    pub base_ref: Option<String>,
    pub head_ref: Option<String>,
    pub summary: Option<PathBuf>,
    pub manifest_dir: Option<PathBuf>,
    pub dry_run: bool,
}

/// Fully resolved configuration of one run
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub repo: PathBuf,
    pub convention: PathConvention,
    pub filter: SelectionFilter,
    pub mode: SelectionMode,
    pub workers: usize,
    pub explicit: Option<Vec<String>>,
    pub infrastructure: InfrastructureKind,
    pub servers: Vec<ServerInfo>,
    pub base_ref: String,
    pub head_ref: String,
    pub container: ContainerSettings,
    pub bundles: Vec<SupportBundle>,
    pub apps: Vec<AppSpec>,
    pub readiness: ReadinessPolicy,
    pub test_command: Vec<String>,
    pub summary_path: PathBuf,
    pub manifest_dir: PathBuf,
    pub dry_run: bool,

    /// The file configuration the run was resolved from
    pub source: ConfigFile,
}

impl RunConfig {
    /// Resolve every option once: command line, then environment, then file,
    /// then built-in default
    pub fn resolve(
        file: ConfigFile,
        env: &EnvConfig,
        cli: &CliOverrides,
    ) -> OrchestratorResult<Self> {
        let test = &file.test;

        let explicit = cli.explicit.clone().or_else(|| test.selected.clone());

        let mode = match cli.mode.as_deref().or(env.mode.as_deref()) {
            Some(mode) => mode.parse()?,
            None => test.mode.unwrap_or(if explicit.is_some() {
                SelectionMode::Selected
            } else {
                SelectionMode::All
            }),
        };
        if explicit.is_some() && mode != SelectionMode::Selected {
            warn!("An explicit content list was given but mode is [{mode}]; the list is ignored");
        }

        let infrastructure = match cli.infrastructure.as_deref() {
            Some(kind) => kind.parse()?,
            None => test.infrastructure,
        };

        let (servers, source) =
            resolve_servers(&cli.servers, env.infrastructures.as_deref(), &test.servers)?;

        let requested_workers = cli.workers.or(env.workers).or(test.workers).unwrap_or(1);
        let workers = match infrastructure {
            InfrastructureKind::Container => requested_workers,
            InfrastructureKind::Server if servers.is_empty() && cli.dry_run => requested_workers,
            InfrastructureKind::Server => {
                if servers.is_empty() {
                    return Err(OrchestratorError::config(format!(
                        "server infrastructure requires server records from --server-info, \
                         {SERVER_INFO_ENV} or the config file"
                    )));
                }
                info!("Using {} server(s) from {}", servers.len(), source);
                servers.len()
            }
        };
        if workers == 0 {
            return Err(OrchestratorError::config("worker count must be at least 1"));
        }

        let repo = cli
            .repo
            .clone()
            .unwrap_or_else(|| PathBuf::from(&file.repo.path));

        let config = Self {
            repo,
            convention: PathConvention::new(&file.repo.content_root, &file.repo.test_root),
            filter: test.filter.clone(),
            mode,
            workers,
            explicit,
            infrastructure,
            servers,
            base_ref: cli
                .base_ref
                .clone()
                .or_else(|| env.base_ref.clone())
                .unwrap_or_else(|| test.base_ref.clone()),
            head_ref: cli.head_ref.clone().unwrap_or_else(|| test.head_ref.clone()),
            container: test.container.clone(),
            bundles: test.bundles.clone(),
            apps: test.apps.clone(),
            readiness: test.readiness.clone(),
            test_command: test.test_command.clone(),
            summary_path: cli
                .summary
                .clone()
                .or_else(|| env.summary.clone().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(&test.summary)),
            manifest_dir: cli
                .manifest_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(&test.manifest_dir)),
            dry_run: cli.dry_run,
            source: file,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> OrchestratorResult<()> {
        if self.dry_run {
            return Ok(());
        }
        if self.test_command.is_empty() {
            return Err(OrchestratorError::config("test_command must not be empty"));
        }
        if self.infrastructure == InfrastructureKind::Container
            && !self.container.name_template.contains("{}")
        {
            return Err(OrchestratorError::config(format!(
                "container name template [{}] must contain {{}}",
                self.container.name_template
            )));
        }
        Ok(())
    }

    /// File form of the resolved values, so a written copy reproduces this run
    pub fn to_config_file(&self) -> ConfigFile {
        let mut file = self.source.clone();
        file.repo = RepoSection {
            path: self.repo.display().to_string(),
            content_root: self.convention.content_root.clone(),
            test_root: self.convention.test_root.clone(),
        };

        let test = &mut file.test;
        test.mode = Some(self.mode);
        test.workers = Some(self.workers);
        test.selected = self.explicit.clone();
        test.filter = self.filter.clone();
        test.infrastructure = self.infrastructure;
        test.servers = self.servers.clone();
        test.base_ref = self.base_ref.clone();
        test.head_ref = self.head_ref.clone();
        test.container = self.container.clone();
        test.bundles = self.bundles.clone();
        test.apps = self.apps.clone();
        test.readiness = self.readiness.clone();
        test.test_command = self.test_command.clone();
        test.summary = self.summary_path.display().to_string();
        test.manifest_dir = self.manifest_dir.display().to_string();
        file
    }

    pub fn roots(&self) -> Vec<String> {
        vec![
            self.convention.content_root.clone(),
            self.convention.test_root.clone(),
        ]
    }
}
