//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::CliOverrides;

/// Change-aware detection testing across parallel workers
#[derive(Parser, Debug)]
#[command(name = "contentctl")]
#[command(author = "hephaex@gmail.com")]
#[command(version)]
#[command(about = "Select changed detections and test them across parallel workers")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Select content and test it
    Test(TestArgs),

    /// Force-stop worker containers left by an earlier run
    Stop(StopArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for test command
#[derive(Parser, Debug, Default)]
pub struct TestArgs {
    /// Selection mode (all, changes, selected)
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Content or test paths to run in selected mode
    #[arg(short, long, num_args = 1..)]
    pub detections: Option<Vec<String>>,

    /// Number of worker containers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Server record: address,username,password,web_port,hec_port,api_port
    #[arg(long = "server-info")]
    pub server_info: Vec<String>,

    /// Infrastructure kind (container, server)
    #[arg(short, long)]
    pub infrastructure: Option<String>,

    /// Write one manifest per worker instead of running
    #[arg(long)]
    pub dry_run: bool,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Repository root
    #[arg(long)]
    pub repo: Option<PathBuf>,

    /// Base ref for changes mode
    #[arg(long)]
    pub base_ref: Option<String>,

    /// Head ref for changes mode
    #[arg(long)]
    pub head_ref: Option<String>,

    /// Summary destination (.json or .csv)
    #[arg(short, long)]
    pub summary: Option<PathBuf>,

    /// Directory for dry-run manifests
    #[arg(long)]
    pub manifest_dir: Option<PathBuf>,

    /// Terminal output format (table, json, json-pretty, brief)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl TestArgs {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            mode: self.mode.clone(),
            workers: self.workers,
            explicit: self.detections.clone(),
            servers: self.server_info.clone(),
            infrastructure: self.infrastructure.clone(),
            repo: self.repo.clone(),
            base_ref: self.base_ref.clone(),
            head_ref: self.head_ref.clone(),
            summary: self.summary.clone(),
            manifest_dir: self.manifest_dir.clone(),
            dry_run: self.dry_run,
        }
    }
}

/// Arguments for stop command
#[derive(Parser, Debug)]
pub struct StopArgs {
    /// Number of workers the earlier run used
    #[arg(short, long)]
    pub workers: usize,

    /// Configuration file holding the container name template
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "contentctl_test.yml")]
        output: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the configuration that would be used
    Show {
        /// Configuration file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output format (yaml, json)
        #[arg(long, default_value = "yaml")]
        format: String,
    },

    /// Describe environment variables and their current values
    Env,
}
