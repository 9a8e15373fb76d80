//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{AppSpec, ContainerSettings, InfrastructureKind, ReadinessPolicy, ServerInfo, SupportBundle};
use crate::content::SelectionFilter;
use crate::models::SelectionMode;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./contentctl_test.yml",
    "./contentctl_test.yaml",
    "./.contentctl/config.yaml",
    "~/.config/contentctl/config.yaml",
];

/// Full configuration file structure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Repository layout
    #[serde(default)]
    pub repo: RepoSection,

    /// Test run settings
    #[serde(default)]
    pub test: TestSection,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            repo: RepoSection::default(),
            test: TestSection::default(),
        }
    }
}

/// Where content and tests live
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoSection {
    pub path: String,
    pub content_root: String,
    pub test_root: String,
}

impl Default for RepoSection {
    fn default() -> Self {
        Self {
            path: ".".to_string(),
            content_root: "detections".to_string(),
            test_root: "tests".to_string(),
        }
    }
}

/// Test run settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SelectionMode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Explicit content list for `selected` mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<Vec<String>>,

    pub filter: SelectionFilter,
    pub infrastructure: InfrastructureKind,
    pub servers: Vec<ServerInfo>,
    pub base_ref: String,
    pub head_ref: String,
    pub container: ContainerSettings,
    pub bundles: Vec<SupportBundle>,
    pub apps: Vec<AppSpec>,
    pub readiness: ReadinessPolicy,

    /// Command run per test; the test path is appended
    pub test_command: Vec<String>,

    pub summary: String,
    pub manifest_dir: String,
}

impl Default for TestSection {
    fn default() -> Self {
        Self {
            mode: None,
            workers: None,
            selected: None,
            filter: SelectionFilter::default(),
            infrastructure: InfrastructureKind::Container,
            servers: Vec::new(),
            base_ref: "develop".to_string(),
            head_ref: "HEAD".to_string(),
            container: ContainerSettings::default(),
            bundles: SupportBundle::defaults(),
            apps: Vec::new(),
            readiness: ReadinessPolicy::default(),
            test_command: vec!["/opt/contentctl/bin/run_test".to_string()],
            summary: "summary.json".to_string(),
            manifest_dir: ".".to_string(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        for location in CONFIG_LOCATIONS {
            let path = expand_path(location);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        if let Some(path) = Self::find() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_json_file(path) {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json_file(path) {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        } else {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        if self.test.workers == Some(0) {
            anyhow::bail!("test.workers must be a positive integer");
        }

        if self.test.container.port_stride == 0 && self.test.workers.unwrap_or(1) > 1 {
            anyhow::bail!("test.container.port_stride must be positive when running several workers");
        }

        for app in &self.test.apps {
            if app.local_path.is_none() && app.http_path.is_none() {
                anyhow::bail!("App '{}' needs either local_path or http_path", app.name);
            }
        }

        Ok(())
    }

    /// Copy with every password blanked
    pub fn without_credentials(&self) -> Self {
        let mut stripped = self.clone();
        stripped.test.container = self.test.container.without_credentials();
        stripped.test.servers = self
            .test
            .servers
            .iter()
            .map(ServerInfo::without_credentials)
            .collect();
        stripped
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let mut config = Self::default();
        config.test.mode = Some(SelectionMode::Changes);
        config.test.workers = Some(2);
        config.test.apps = vec![
            AppSpec {
                name: "content_pack".to_string(),
                local_path: Some("dist/content_pack.tar.gz".to_string()),
                http_path: None,
            },
            AppSpec {
                name: "Splunk_SA_CIM".to_string(),
                local_path: None,
                http_path: Some(
                    "https://example.com/apps/splunk-common-information-model-cim_5.0.tgz"
                        .to_string(),
                ),
            },
        ];
        config
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is JSON based on extension
fn is_json_file(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}
