//! Operator interrupts
//!
//! During setup an interrupt stops every session by name and exits the
//! process. During execution it only raises the failure signal so sessions
//! drain and the run still produces its summary.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::backend::WorkerBackend;
use super::signal::{FailureCause, FailureSignal, PhaseTracker, RunPhase};

/// Upper bound on the whole hard stop
pub const HARD_STOP_TIMEOUT: Duration = Duration::from_secs(60);

/// What the handler decided for one interrupt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptAction {
    /// Tear everything down and exit
    HardStop,
    /// Let sessions finish their in-flight test, then drain
    Drain,
}

pub fn action_for(phase: RunPhase) -> InterruptAction {
    match phase {
        RunPhase::Setup => InterruptAction::HardStop,
        RunPhase::Execution => InterruptAction::Drain,
    }
}

/// Best-effort stop of every named session, bounded by `timeout`
///
/// Returns the names that could not be confirmed stopped.
pub async fn hard_stop(backend: &dyn WorkerBackend, names: &[String], timeout: Duration) -> Vec<String> {
    info!("Stopping {} session(s)", names.len());

    let stops = join_all(names.iter().map(|name| async move {
        match backend.stop(name).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Failed to stop {}: {}", name, e);
                Some(name.clone())
            }
        }
    }));

    match tokio::time::timeout(timeout, stops).await {
        Ok(results) => results.into_iter().flatten().collect(),
        Err(_) => {
            error!("Timed out after {}s stopping sessions", timeout.as_secs());
            names.to_vec()
        }
    }
}

/// Spawn the interrupt listener for a run
///
/// The returned handle should be aborted once the run is over.
pub fn spawn_interrupt_handler(
    backend: Arc<dyn WorkerBackend>,
    names: Vec<String>,
    signal: FailureSignal,
    phase: PhaseTracker,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("Cannot listen for interrupts");
                return;
            }

            match action_for(phase.get()) {
                InterruptAction::HardStop => {
                    warn!("Interrupted during setup, stopping all sessions");
                    let left = hard_stop(backend.as_ref(), &names, HARD_STOP_TIMEOUT).await;
                    if !left.is_empty() {
                        error!("Sessions may still be running: {}", left.join(", "));
                    }
                    std::process::exit(1);
                }
                InterruptAction::Drain => {
                    if signal.is_set() {
                        info!("Already draining, waiting for in-flight tests");
                    } else {
                        warn!("Interrupted, finishing in-flight tests before stopping");
                        signal.trigger(FailureCause::Interrupted);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::FakeBackend;

    #[test]
    fn test_action_depends_on_phase() {
        assert_eq!(action_for(RunPhase::Setup), InterruptAction::HardStop);
        assert_eq!(action_for(RunPhase::Execution), InterruptAction::Drain);
    }

    #[tokio::test]
    async fn test_hard_stop_stops_every_name() {
        let backend = FakeBackend::new();
        let names = vec!["contentctl_worker_0".to_string(), "contentctl_worker_1".to_string()];

        let left = hard_stop(&backend, &names, Duration::from_secs(5)).await;

        assert!(left.is_empty());
        assert_eq!(backend.stopped(), names);
    }
}
