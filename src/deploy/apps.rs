//! Content package staging
//!
//! Copies or downloads every configured package into the host directory that is
//! mounted read-only into each worker container.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::AppSpec;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::http::ManagementClient;

const STAGING: &str = "apps";

/// A package ready to be mounted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedApp {
    pub name: String,
    pub host_path: PathBuf,
    /// Path of the package as seen from inside a container
    pub container_path: String,
}

/// Stages packages into a host directory
pub struct AppStager {
    client: ManagementClient,
    dir: PathBuf,
    mount: String,
}

impl AppStager {
    pub fn new(client: ManagementClient, dir: impl Into<PathBuf>, mount: impl Into<String>) -> Self {
        Self {
            client,
            dir: dir.into(),
            mount: mount.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stage every app, in config order
    pub async fn stage(&self, apps: &[AppSpec]) -> OrchestratorResult<Vec<StagedApp>> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut staged = Vec::with_capacity(apps.len());
        for app in apps {
            staged.push(self.stage_one(app).await?);
        }

        info!("Staged {} app(s) in {}", staged.len(), self.dir.display());
        Ok(staged)
    }

    async fn stage_one(&self, app: &AppSpec) -> OrchestratorResult<StagedApp> {
        let source = app
            .local_path
            .as_deref()
            .or(app.http_path.as_deref())
            .ok_or_else(|| {
                OrchestratorError::config(format!(
                    "app '{}' needs either local_path or http_path",
                    app.name
                ))
            })?;
        let file_name = file_name_of(source).ok_or_else(|| {
            OrchestratorError::config(format!("cannot derive a file name from [{source}]"))
        })?;
        let host_path = self.dir.join(&file_name);

        if let Some(local) = &app.local_path {
            tokio::fs::copy(local, &host_path).await.map_err(|e| {
                OrchestratorError::infrastructure(STAGING, format!("copy {local}: {e}"))
            })?;
            info!("Copied app {} from {}", app.name, local);
        } else if let Some(url) = &app.http_path {
            let bytes = self
                .client
                .download(url, &host_path)
                .await
                .map_err(|e| OrchestratorError::infrastructure(STAGING, e.to_string()))?;
            info!("Downloaded app {} ({} bytes) from {}", app.name, bytes, url);
        }

        Ok(StagedApp {
            name: app.name.clone(),
            host_path,
            container_path: format!("{}/{}", self.mount.trim_end_matches('/'), file_name),
        })
    }
}

/// Value of the environment variable listing packages to install
pub fn apps_env_value(staged: &[StagedApp]) -> String {
    staged
        .iter()
        .map(|a| a.container_path.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn file_name_of(source: &str) -> Option<String> {
    let without_query = source.split(['?', '#']).next().unwrap_or(source);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
