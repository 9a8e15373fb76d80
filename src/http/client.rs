//! HTTP client for worker management endpoints
//!
//! Probes session management endpoints for readiness and downloads content
//! packages for staging.

use anyhow::{Context, Result};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// HTTP client errors
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
}

/// Client for management endpoints and package downloads
#[derive(Clone)]
pub struct ManagementClient {
    client: Client,
    timeout_secs: u64,
}

impl ManagementClient {
    /// Create client with custom timeout
    ///
    /// Management endpoints of fresh containers serve self-signed certificates.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .danger_accept_invalid_certs(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            timeout_secs,
        })
    }

    fn classify(&self, url: &str, e: reqwest::Error) -> HttpError {
        if e.is_timeout() {
            HttpError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            HttpError::ConnectionRefused(url.to_string())
        } else {
            HttpError::RequestFailed(e.to_string())
        }
    }

    /// GET `url`; any HTTP response means the endpoint is up
    pub async fn ping(&self, url: &str, auth: Option<(&str, &str)>) -> Result<u16, HttpError> {
        debug!("Probing {}", url);

        let mut request = self.client.get(url);
        if let Some((username, password)) = auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(|e| self.classify(url, e))?;
        Ok(response.status().as_u16())
    }

    /// Download `url` into `dest`, returning the number of bytes written
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, HttpError> {
        debug!("Downloading {} to {}", url, dest.display());

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let write_err = |e: std::io::Error| HttpError::RequestFailed(format!("{}: {e}", dest.display()));
        let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;

        // Written chunk by chunk; packages can be large
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| HttpError::RequestFailed(e.to_string()))?
        {
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_err)?;

        Ok(written)
    }
}

/// Build a URL for a host, port and path
pub fn endpoint_url(tls: bool, address: &str, port: u16, path: &str) -> String {
    let scheme = if tls { "https" } else { "http" };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    format!("{scheme}://{address}:{port}{path}")
}
