//! Test infrastructure records
//!
//! Pre-existing servers are described by `address,username,password,web_ui_port,
//! hec_port,api_port` records. Records may come from the config file, the
//! `CONTENTCTL_TEST_INFRASTRUCTURES` variable (`;`-separated) or repeated
//! `--server-info` flags, highest precedence last.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Environment variable carrying `;`-separated server records
pub const SERVER_INFO_ENV: &str = "CONTENTCTL_TEST_INFRASTRUCTURES";

/// Kind of worker sessions a run uses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfrastructureKind {
    /// Fresh containers provisioned per run
    #[default]
    Container,
    /// Servers that already exist and are addressed directly
    Server,
}

impl FromStr for InfrastructureKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "container" => Ok(InfrastructureKind::Container),
            "server" => Ok(InfrastructureKind::Server),
            other => Err(OrchestratorError::config(format!(
                "Unknown infrastructure [{other}]. Supported: container, server"
            ))),
        }
    }
}

impl fmt::Display for InfrastructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfrastructureKind::Container => write!(f, "container"),
            InfrastructureKind::Server => write!(f, "server"),
        }
    }
}

/// Connection details of one pre-existing server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub address: String,
    pub username: String,
    pub password: String,
    pub web_ui_port: u16,
    pub hec_port: u16,
    pub api_port: u16,
}

impl ServerInfo {
    /// Copy with the password blanked
    pub fn without_credentials(&self) -> Self {
        Self {
            password: String::new(),
            ..self.clone()
        }
    }
}

impl FromStr for ServerInfo {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        if fields.len() != 6 {
            return Err(OrchestratorError::config(format!(
                "server record [{s}] has {} fields, expected \
                 address,username,password,web_ui_port,hec_port,api_port",
                fields.len()
            )));
        }

        let port = |name: &str, value: &str| -> OrchestratorResult<u16> {
            value.parse().map_err(|_| {
                OrchestratorError::config(format!("invalid {name} [{value}] in server record"))
            })
        };

        Ok(Self {
            address: fields[0].to_string(),
            username: fields[1].to_string(),
            password: fields[2].to_string(),
            web_ui_port: port("web_ui_port", fields[3])?,
            hec_port: port("hec_port", fields[4])?,
            api_port: port("api_port", fields[5])?,
        })
    }
}

/// Where the effective server records came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerSource {
    CommandLine,
    Environment,
    ConfigFile,
}

impl fmt::Display for ServerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerSource::CommandLine => write!(f, "command line"),
            ServerSource::Environment => write!(f, "{SERVER_INFO_ENV} environment variable"),
            ServerSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Pick server records by precedence: command line, then environment, then file
pub fn resolve_servers(
    cli: &[String],
    env: Option<&str>,
    file: &[ServerInfo],
) -> OrchestratorResult<(Vec<ServerInfo>, ServerSource)> {
    if !cli.is_empty() {
        let servers = cli
            .iter()
            .map(|s| s.parse())
            .collect::<OrchestratorResult<Vec<ServerInfo>>>()?;
        return Ok((servers, ServerSource::CommandLine));
    }

    if let Some(value) = env.filter(|v| !v.trim().is_empty()) {
        let servers = value
            .split(';')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse())
            .collect::<OrchestratorResult<Vec<ServerInfo>>>()?;
        return Ok((servers, ServerSource::Environment));
    }

    Ok((file.to_vec(), ServerSource::ConfigFile))
}
