//! contentctl - change-aware detection testing
//!
//! Selects the detection content a change touched, splits it across a pool of
//! worker sessions and tests every shard concurrently.
//!
//! ## Features
//!
//! - Three selection modes: all content, content changed against a base ref,
//!   or an explicit list
//! - Content/test pairing checks before anything is started
//! - Round-robin sharding with dry-run manifests, one per worker
//! - Container workers through docker, or pre-existing servers
//! - Fail-fast cancellation across workers with guaranteed teardown
//! - JSON or CSV run summaries
//!
//! ## Usage
//!
//! ```bash
//! # Test everything changed since develop on 4 containers
//! contentctl test --mode changes --workers 4
//!
//! # Test two detections against existing servers
//! contentctl test -d detections/cloud/a.yml detections/cloud/b.yml \
//!     --infrastructure server --server-info 10.0.0.5,admin,pw,8000,8088,8089
//!
//! # Plan only: write one manifest per worker
//! contentctl test --workers 3 --dry-run
//!
//! # Clean up after an aborted run
//! contentctl stop --workers 4
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info};

mod cli;
mod config;
mod content;
mod deploy;
mod error;
mod executor;
mod http;
mod models;
mod output;
mod results;
mod shard;
mod utils;

use cli::Args;
use config::{ConfigFile, EnvConfig, RunConfig};
use error::OrchestratorError;
use executor::{hard_stop, session_name, DockerBackend, RunReport, TestRunner, HARD_STOP_TIMEOUT};
use output::{OutputFormat, ResultFormatter};
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();
    init_logger(LogLevel::resolve(args.verbose, env.log.as_deref()));

    match args.command {
        cli::Command::Test(test_args) => {
            let code = run_tests(test_args, env).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        cli::Command::Stop(stop_args) => {
            stop_workers(stop_args, &env).await?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args)?;
        }
    }

    Ok(())
}

/// Explicit path, then `CONTENTCTL_CONFIG`, then the standard locations
fn load_config(explicit: Option<&Path>, env: &EnvConfig) -> Result<ConfigFile> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));

    match path {
        Some(path) => ConfigFile::load(&path),
        None => ConfigFile::load_default(),
    }
}

async fn run_tests(args: cli::TestArgs, env: EnvConfig) -> Result<i32> {
    let format: OutputFormat = args.format.parse()?;
    let no_color = args.no_color;
    let file = load_config(args.config.as_deref(), &env)?;
    let config = RunConfig::resolve(file, &env, &args.overrides())?;

    info!(
        "Testing mode [{}] with {} {} worker(s)",
        config.mode, config.workers, config.infrastructure
    );

    let runner = TestRunner::new(config);
    let report = match runner.run().await {
        Ok(report) => report,
        Err(e) => {
            if e
                .downcast_ref::<OrchestratorError>()
                .is_some_and(OrchestratorError::aborts_before_allocation)
            {
                error!("Run aborted before any worker was started");
            }
            return Err(e);
        }
    };
    let mut formatter = ResultFormatter::new(format);
    if no_color {
        formatter = formatter.no_color();
    }

    match &report {
        RunReport::DryRun { plan, manifests } => {
            print!("{}", formatter.format_plan(&plan.shards));
            for path in manifests {
                println!("✓ Manifest written: {}", path.display());
            }
        }
        RunReport::Completed(summary) => {
            println!("{}", formatter.format_summary(summary));
        }
    }

    Ok(report.exit_code())
}

async fn stop_workers(args: cli::StopArgs, env: &EnvConfig) -> Result<()> {
    let file = load_config(args.config.as_deref(), env)?;
    let container = file.test.container.clone();
    let names: Vec<String> = (0..args.workers)
        .map(|ordinal| session_name(&container.name_template, ordinal))
        .collect();

    let client = http::ManagementClient::with_timeout(file.test.readiness.request_timeout_secs)?;
    let backend = DockerBackend::new(
        container,
        file.test.readiness.clone(),
        client,
        PathBuf::new(),
        PathBuf::new(),
        String::new(),
        Vec::new(),
    );

    let left = hard_stop(&backend, &names, HARD_STOP_TIMEOUT).await;
    for name in &names {
        if left.contains(name) {
            println!("✗ {name} could not be stopped");
        } else {
            println!("✓ {name} stopped");
        }
    }
    if !left.is_empty() {
        anyhow::bail!("{} worker(s) could not be stopped", left.len());
    }
    Ok(())
}

fn manage_config(args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            ConfigFile::example().save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { file, format } => {
            let env = EnvConfig::load();
            let config = load_config(file.as_deref(), &env)?.without_credentials();
            let output = if format == "json" {
                serde_json::to_string_pretty(&config).context("Failed to render config")?
            } else {
                serde_yaml::to_string(&config).context("Failed to render config")?
            };
            println!("{output}");
            if env.has_any() {
                env.print_summary();
            }
        }

        cli::ConfigAction::Env => {
            config::print_env_help();
            println!();
            EnvConfig::load().print_summary();
        }
    }

    Ok(())
}
