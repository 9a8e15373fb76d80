//! Worker backend seam
//!
//! A backend knows how to bring one kind of worker session up, feed it tests
//! and stop it. The session state machine drives a backend without caring
//! whether the session is a container or an existing server.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::process::Command;

use crate::config::{ContainerSettings, ServerInfo, SupportBundle};
use crate::error::{OrchestratorError, OrchestratorResult};

/// Command for a child process of the run. It gets its own process group, so
/// an interrupt typed at the terminal reaches the orchestrator but not the child.
pub fn child_command(program: &str) -> Command {
    let mut command = Command::new(program);
    #[cfg(unix)]
    command.process_group(0);
    command
}

/// Name of the session with `ordinal` under `template`
pub fn session_name(template: &str, ordinal: usize) -> String {
    template.replacen("{}", &ordinal.to_string(), 1)
}

/// Network endpoints of one session
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Endpoints {
    pub address: String,
    pub web_port: u16,
    pub hec_port: u16,
    pub mgmt_port: u16,
}

impl fmt::Display for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (web {}, hec {}, mgmt {})",
            self.address, self.web_port, self.hec_port, self.mgmt_port
        )
    }
}

/// Everything a backend needs to address one session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSpec {
    pub ordinal: usize,
    pub name: String,
    pub endpoints: Endpoints,
    pub username: String,
    pub password: String,
}

impl SessionSpec {
    /// Container session `ordinal`; host ports are offset by `ordinal * port_stride`
    pub fn for_container(ordinal: usize, settings: &ContainerSettings) -> OrchestratorResult<Self> {
        let name = session_name(&settings.name_template, ordinal);
        let offset = u16::try_from(ordinal)
            .ok()
            .and_then(|o| o.checked_mul(settings.port_stride));
        let port = |base: u16| {
            offset.and_then(|o| base.checked_add(o)).ok_or_else(|| {
                OrchestratorError::infrastructure(
                    name.clone(),
                    format!("no host port available above base {base} for worker {ordinal}"),
                )
            })
        };

        Ok(Self {
            ordinal,
            endpoints: Endpoints {
                address: "127.0.0.1".to_string(),
                web_port: port(settings.web_port)?,
                hec_port: port(settings.hec_port)?,
                mgmt_port: port(settings.mgmt_port)?,
            },
            username: settings.username.clone(),
            password: settings.password.clone(),
            name,
        })
    }

    /// Session `ordinal` backed by an existing server
    pub fn for_server(ordinal: usize, server: &ServerInfo) -> Self {
        Self {
            ordinal,
            name: format!("server_{ordinal}_{}", server.address),
            endpoints: Endpoints {
                address: server.address.clone(),
                web_port: server.web_ui_port,
                hec_port: server.hec_port,
                mgmt_port: server.api_port,
            },
            username: server.username.clone(),
            password: server.password.clone(),
        }
    }
}

/// Result of running one test to completion
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestVerdict {
    pub passed: bool,
    /// Captured output, used as the diagnostic of a failed test
    pub output: String,
    pub duration: Duration,
}

/// Drives one kind of worker session
///
/// Every method returning `Err` reports an infrastructure fault. A test that
/// ran and did not pass is `Ok` with `passed == false`.
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    /// Whether the runtime this backend needs can be used at all
    async fn check_available(&self) -> OrchestratorResult<()>;

    /// Create and start the session
    async fn start(&self, spec: &SessionSpec) -> OrchestratorResult<()>;

    /// Extract one support bundle into the session
    async fn copy_bundle(&self, spec: &SessionSpec, bundle: &SupportBundle)
        -> OrchestratorResult<()>;

    /// Whether the management endpoint answers
    async fn is_ready(&self, spec: &SessionSpec) -> bool;

    /// Run the test at `test_path` (repository relative)
    async fn run_test(&self, spec: &SessionSpec, test_path: &str)
        -> OrchestratorResult<TestVerdict>;

    /// Stop the session named `name`; stopping a stopped session is not an error
    async fn stop(&self, name: &str) -> OrchestratorResult<()>;
}
