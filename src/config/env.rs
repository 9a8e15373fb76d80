//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use super::SERVER_INFO_ENV;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CONTENTCTL";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Selection mode from CONTENTCTL_MODE
    pub mode: Option<String>,
    /// Worker count from CONTENTCTL_WORKERS
    pub workers: Option<usize>,
    /// Base reference from CONTENTCTL_BASE_REF
    pub base_ref: Option<String>,
    /// Config file from CONTENTCTL_CONFIG
    pub config_file: Option<String>,
    /// Log level from CONTENTCTL_LOG
    pub log: Option<String>,
    /// Summary destination from CONTENTCTL_SUMMARY
    pub summary: Option<String>,
    /// Server records from CONTENTCTL_TEST_INFRASTRUCTURES
    pub infrastructures: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            mode: get_env("MODE"),
            workers: get_env_parse("WORKERS"),
            base_ref: get_env("BASE_REF"),
            config_file: get_env("CONFIG"),
            log: get_env("LOG"),
            summary: get_env("SUMMARY"),
            infrastructures: env::var(SERVER_INFO_ENV).ok(),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.mode.is_some()
            || self.workers.is_some()
            || self.base_ref.is_some()
            || self.config_file.is_some()
            || self.log.is_some()
            || self.summary.is_some()
            || self.infrastructures.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_MODE:      {:?}", ENV_PREFIX, self.mode);
        println!("  {}_WORKERS:   {:?}", ENV_PREFIX, self.workers);
        println!("  {}_BASE_REF:  {:?}", ENV_PREFIX, self.base_ref);
        println!("  {}_CONFIG:    {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_LOG:       {:?}", ENV_PREFIX, self.log);
        println!("  {}_SUMMARY:   {:?}", ENV_PREFIX, self.summary);
        println!(
            "  {}: {}",
            SERVER_INFO_ENV,
            if self.infrastructures.is_some() {
                "<set>"
            } else {
                "None"
            }
        );
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Builder for setting environment variables (useful for testing)
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn raw(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.push((key.to_string(), value.into()));
        self
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all CONTENTCTL environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_MODE        Selection mode (all, changes, selected)");
    println!("  {ENV_PREFIX}_WORKERS     Number of worker containers");
    println!("  {ENV_PREFIX}_BASE_REF    Base reference for changes mode");
    println!("  {ENV_PREFIX}_CONFIG      Path to configuration file");
    println!("  {ENV_PREFIX}_LOG         Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_SUMMARY     Path of the result summary (.json or .csv)");
    println!("  {SERVER_INFO_ENV}");
    println!("                         ';'-separated server records, each");
    println!("                         address,username,password,web_ui_port,hec_port,api_port");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_MODE=changes");
    println!("  export {ENV_PREFIX}_BASE_REF=develop");
    println!("  contentctl test --workers 2");
}
