//! Sessions backed by pre-existing servers
//!
//! Servers are already running and provisioned, so starting and stopping are
//! no-ops. Tests run locally with the server's endpoints in the environment.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use super::backend::{child_command, SessionSpec, TestVerdict, WorkerBackend};
use crate::config::{ReadinessPolicy, SupportBundle};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::http::{endpoint_url, ManagementClient};
use crate::utils::Timer;

/// Environment handed to the test command
pub fn server_env(spec: &SessionSpec) -> Vec<(&'static str, String)> {
    vec![
        ("CONTENTCTL_SERVER_ADDRESS", spec.endpoints.address.clone()),
        ("CONTENTCTL_SERVER_USERNAME", spec.username.clone()),
        ("CONTENTCTL_SERVER_PASSWORD", spec.password.clone()),
        ("CONTENTCTL_SERVER_WEB_PORT", spec.endpoints.web_port.to_string()),
        ("CONTENTCTL_SERVER_HEC_PORT", spec.endpoints.hec_port.to_string()),
        ("CONTENTCTL_SERVER_API_PORT", spec.endpoints.mgmt_port.to_string()),
    ]
}

/// Backend addressing servers described by `ServerInfo` records
pub struct ServerBackend {
    readiness: ReadinessPolicy,
    client: ManagementClient,
    repo_dir: PathBuf,
    test_command: Vec<String>,
}

impl ServerBackend {
    pub fn new(
        readiness: ReadinessPolicy,
        client: ManagementClient,
        repo_dir: PathBuf,
        test_command: Vec<String>,
    ) -> Self {
        Self {
            readiness,
            client,
            repo_dir,
            test_command,
        }
    }
}

#[async_trait]
impl WorkerBackend for ServerBackend {
    fn kind(&self) -> &'static str {
        "server"
    }

    async fn check_available(&self) -> OrchestratorResult<()> {
        if self.test_command.is_empty() {
            return Err(OrchestratorError::config("test_command must not be empty"));
        }
        Ok(())
    }

    async fn start(&self, spec: &SessionSpec) -> OrchestratorResult<()> {
        info!("Using existing server {} at {}", spec.name, spec.endpoints);
        Ok(())
    }

    async fn copy_bundle(&self, spec: &SessionSpec, bundle: &SupportBundle) -> OrchestratorResult<()> {
        debug!(
            "Skipping {:?} bundle for {}; servers are provisioned out of band",
            bundle.kind, spec.name
        );
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
        let (program, args) = self
            .test_command
            .split_first()
            .ok_or_else(|| OrchestratorError::config("test_command must not be empty"))?;

        let timer = Timer::start();
        let output = child_command(program)
            .args(args)
            .arg(test_path)
            .current_dir(&self.repo_dir)
            .envs(server_env(spec))
            .output()
            .await
            .map_err(|e| {
                OrchestratorError::infrastructure(&spec.name, format!("cannot launch {program}: {e}"))
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        // No exit code means a signal ended the command before it could report
        if output.status.code().is_none() {
            return Err(OrchestratorError::infrastructure(
                &spec.name,
                format!("test command terminated by a signal: {}", text.trim()),
            ));
        }

        Ok(TestVerdict {
            passed: output.status.success(),
            output: text.trim().to_string(),
            duration: timer.elapsed(),
        })
    }

    async fn stop(&self, name: &str) -> OrchestratorResult<()> {
        debug!("Releasing server session {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerInfo;

    fn spec() -> SessionSpec {
        let server: ServerInfo = "10.0.0.9,admin,pw,8000,8088,8089".parse().unwrap();
        SessionSpec::for_server(0, &server)
    }

    fn backend(command: &[&str]) -> ServerBackend {
        ServerBackend::new(
            ReadinessPolicy::default(),
            ManagementClient::with_timeout(1).unwrap(),
            std::env::temp_dir(),
            command.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_server_env() {
        let env = server_env(&spec());
        assert!(env.contains(&("CONTENTCTL_SERVER_ADDRESS", "10.0.0.9".to_string())));
        assert!(env.contains(&("CONTENTCTL_SERVER_API_PORT", "8089".to_string())));
    }

    #[tokio::test]
    async fn test_exit_status_decides_verdict() {
        let passed = backend(&["sh", "-c", "exit 0"])
            .run_test(&spec(), "tests/a.test.yml")
            .await
            .unwrap();
        assert!(passed.passed);

        let failed = backend(&["sh", "-c", "echo no match; exit 3"])
            .run_test(&spec(), "tests/a.test.yml")
            .await
            .unwrap();
        assert!(!failed.passed);
        assert_eq!(failed.output, "no match");
    }

    #[tokio::test]
    async fn test_killed_command_is_infrastructure_error() {
        let err = backend(&["sh", "-c", "kill -9 $$"])
            .run_test(&spec(), "tests/a.test.yml")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Infrastructure { .. }));
    }

    /// Process group id from a `/proc/<pid>/stat` line
    #[cfg(target_os = "linux")]
    fn pgrp(stat: &str) -> String {
        let (_, rest) = stat.rsplit_once(')').unwrap();
        rest.split_whitespace().nth(2).unwrap().to_string()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_test_command_runs_in_its_own_process_group() {
        let verdict = backend(&["sh", "-c", "cat /proc/$$/stat"])
            .run_test(&spec(), "tests/a.test.yml")
            .await
            .unwrap();
        assert!(verdict.passed);

        let own = std::fs::read_to_string("/proc/self/stat").unwrap();
        assert_ne!(pgrp(&verdict.output), pgrp(&own));
    }

    #[tokio::test]
    async fn test_unlaunchable_command_is_infrastructure_error() {
        let err = backend(&["/nonexistent/contentctl-runner"])
            .run_test(&spec(), "tests/a.test.yml")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Infrastructure { .. }));
    }
}
