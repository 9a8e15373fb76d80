//! Session provisioning helpers
//!
//! Stages content packages for worker sessions and waits for their
//! management endpoint to come up.

mod apps;
mod health;

pub use apps::{apps_env_value, AppStager};
pub use health::{ProbeOutcome, ReadinessProbe};
