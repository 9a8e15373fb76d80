//! Container sessions through the `docker` CLI

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::backend::{child_command, SessionSpec, TestVerdict, WorkerBackend};
use crate::config::{ContainerSettings, ReadinessPolicy, SupportBundle};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::http::{endpoint_url, ManagementClient};
use crate::utils::Timer;

/// Container-side ports the image listens on
const CONTAINER_WEB_PORT: u16 = 8000;
const CONTAINER_HEC_PORT: u16 = 8088;
const CONTAINER_MGMT_PORT: u16 = 8089;

/// `docker exec` could not run the command at all
fn is_launch_failure(code: Option<i32>) -> bool {
    matches!(code, Some(125) | Some(126) | Some(127) | None)
}

/// Backend that runs every session as a local container
pub struct DockerBackend {
    settings: ContainerSettings,
    readiness: ReadinessPolicy,
    client: ManagementClient,
    /// Absolute host directory holding staged packages
    apps_dir: PathBuf,
    /// Absolute host path of the repository
    repo_dir: PathBuf,
    /// In-container package list exported through `settings.apps_env`
    apps_env_value: String,
    test_command: Vec<String>,
}

impl DockerBackend {
    pub fn new(
        settings: ContainerSettings,
        readiness: ReadinessPolicy,
        client: ManagementClient,
        apps_dir: PathBuf,
        repo_dir: PathBuf,
        apps_env_value: String,
        test_command: Vec<String>,
    ) -> Self {
        Self {
            settings,
            readiness,
            client,
            apps_dir,
            repo_dir,
            apps_env_value,
            test_command,
        }
    }

    async fn docker(&self, session: &str, args: &[String]) -> OrchestratorResult<Output> {
        debug!("docker {}", args.join(" "));
        child_command("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| OrchestratorError::infrastructure(session, format!("failed to run docker: {e}")))
    }

    async fn docker_ok(&self, session: &str, args: &[String]) -> OrchestratorResult<Output> {
        let output = self.docker(session, args).await?;
        if !output.status.success() {
            return Err(OrchestratorError::infrastructure(
                session,
                format!(
                    "docker {} failed: {}",
                    args.first().map(String::as_str).unwrap_or_default(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(output)
    }

    /// Arguments of the `docker run` that creates `spec`
    pub fn run_args(&self, spec: &SessionSpec) -> Vec<String> {
        let s = &self.settings;
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "-p".to_string(),
            format!("{}:{CONTAINER_WEB_PORT}", spec.endpoints.web_port),
            "-p".to_string(),
            format!("{}:{CONTAINER_HEC_PORT}", spec.endpoints.hec_port),
            "-p".to_string(),
            format!("{}:{CONTAINER_MGMT_PORT}", spec.endpoints.mgmt_port),
            "-v".to_string(),
            format!("{}:{}:ro", self.apps_dir.display(), s.apps_mount),
            "-v".to_string(),
            format!("{}:{}:ro", self.repo_dir.display(), s.repo_mount),
            "-e".to_string(),
            format!("SPLUNK_PASSWORD={}", spec.password),
        ];

        if !self.apps_env_value.is_empty() {
            args.push("-e".to_string());
            args.push(format!("{}={}", s.apps_env, self.apps_env_value));
        }
        for (key, value) in &s.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(s.image.clone());
        args
    }

    /// Arguments of the `docker exec` that runs one test
    pub fn exec_args(&self, spec: &SessionSpec, test_path: &str) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "-w".to_string(),
            self.settings.repo_mount.clone(),
            spec.name.clone(),
        ];
        args.extend(self.test_command.iter().cloned());
        args.push(test_path.to_string());
        args
    }
}

#[async_trait]
impl WorkerBackend for DockerBackend {
    fn kind(&self) -> &'static str {
        "container"
    }

    async fn check_available(&self) -> OrchestratorResult<()> {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        let output = self.docker_ok("docker", &args).await?;
        info!(
            "Docker server {} available",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    async fn start(&self, spec: &SessionSpec) -> OrchestratorResult<()> {
        // A container left over from an earlier run would hold the name and ports
        let removed = self
            .docker(&spec.name, &["rm".to_string(), "-f".to_string(), spec.name.clone()])
            .await?;
        if removed.status.success() {
            debug!("Removed stale container {}", spec.name);
        }

        info!("Starting {} on {}", spec.name, spec.endpoints);
        self.docker_ok(&spec.name, &self.run_args(spec)).await?;
        Ok(())
    }

    async fn copy_bundle(&self, spec: &SessionSpec, bundle: &SupportBundle) -> OrchestratorResult<()> {
        let archive = tokio::fs::read(&bundle.local_path).await.map_err(|e| {
            OrchestratorError::infrastructure(
                &spec.name,
                format!("cannot read bundle {}: {e}", bundle.local_path),
            )
        })?;

        self.docker_ok(
            &spec.name,
            &[
                "exec".to_string(),
                spec.name.clone(),
                "mkdir".to_string(),
                "-p".to_string(),
                bundle.container_path.clone(),
            ],
        )
        .await?;

        // `docker cp -` extracts a tar stream from stdin into the target directory
        let target = format!("{}:{}", spec.name, bundle.container_path);
        debug!("docker cp - {}", target);
        let mut child = child_command("docker")
            .args(["cp", "-", target.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OrchestratorError::infrastructure(&spec.name, format!("failed to run docker: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&archive).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(OrchestratorError::infrastructure(
                &spec.name,
                format!(
                    "copy of {} to {} failed: {}",
                    bundle.local_path,
                    bundle.container_path,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(())
    }

    async fn is_ready(&self, spec: &SessionSpec) -> bool {
        let url = endpoint_url(
            self.readiness.tls,
            &spec.endpoints.address,
            spec.endpoints.mgmt_port,
            &self.readiness.path,
        );
        self.client
            .ping(&url, Some((spec.username.as_str(), spec.password.as_str())))
            .await
            .is_ok()
    }

    async fn run_test(&self, spec: &SessionSpec, test_path: &str) -> OrchestratorResult<TestVerdict> {
        let timer = Timer::start();
        let output = self.docker(&spec.name, &self.exec_args(spec, test_path)).await?;
        let code = output.status.code();

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if is_launch_failure(code) {
            return Err(OrchestratorError::infrastructure(
                &spec.name,
                format!("cannot execute test command (exit {code:?}): {}", text.trim()),
            ));
        }

        Ok(TestVerdict {
            passed: code == Some(0),
            output: text.trim().to_string(),
            duration: timer.elapsed(),
        })
    }

    async fn stop(&self, name: &str) -> OrchestratorResult<()> {
        info!("Stopping {}", name);
        self.docker_ok(
            name,
            &[
                "stop".to_string(),
                "-t".to_string(),
                "10".to_string(),
                name.to_string(),
            ],
        )
        .await?;
        Ok(())
    }
}
