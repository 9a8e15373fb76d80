//! Session readiness
//!
//! Waits for a session's management endpoint with a bounded retry budget.

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::ReadinessPolicy;
use crate::executor::{FailureSignal, SessionSpec, WorkerBackend};

/// How a readiness wait ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready { attempts: u32, elapsed: Duration },
    Exhausted { attempts: u32 },
    Cancelled,
}

/// Bounded-retry readiness wait
#[derive(Clone, Debug)]
pub struct ReadinessProbe {
    attempts: u32,
    interval: Duration,
}

impl ReadinessProbe {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    pub fn from_policy(policy: &ReadinessPolicy) -> Self {
        Self::new(policy.attempts, Duration::from_secs(policy.interval_secs))
    }

    /// Poll `backend.is_ready` until it answers, the budget runs out, or the
    /// run is cancelled
    pub async fn wait_ready(
        &self,
        backend: &dyn WorkerBackend,
        spec: &SessionSpec,
        signal: &FailureSignal,
    ) -> ProbeOutcome {
        let start = Instant::now();
        info!("Waiting for {} to become ready at {}", spec.name, spec.endpoints);

        for attempt in 1..=self.attempts {
            if signal.is_set() {
                return ProbeOutcome::Cancelled;
            }

            if backend.is_ready(spec).await {
                let elapsed = start.elapsed();
                info!(
                    "{} ready after {} attempt(s) in {:.1}s",
                    spec.name,
                    attempt,
                    elapsed.as_secs_f64()
                );
                return ProbeOutcome::Ready {
                    attempts: attempt,
                    elapsed,
                };
            }

            debug!("{} not ready ({}/{})", spec.name, attempt, self.attempts);
            if attempt < self.attempts {
                tokio::select! {
                    _ = sleep(self.interval) => {}
                    _ = signal.cancelled() => return ProbeOutcome::Cancelled,
                }
            }
        }

        ProbeOutcome::Exhausted {
            attempts: self.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupportBundle;
    use crate::error::OrchestratorResult;
    use crate::executor::{Endpoints, FailureCause, TestVerdict};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ReadyAfter {
        calls: AtomicU32,
        ready_on: u32,
    }

    #[async_trait]
    impl WorkerBackend for ReadyAfter {
        fn kind(&self) -> &'static str {
            "probe-test"
        }
        async fn check_available(&self) -> OrchestratorResult<()> {
            Ok(())
        }
        async fn start(&self, _: &SessionSpec) -> OrchestratorResult<()> {
            Ok(())
        }
        async fn copy_bundle(&self, _: &SessionSpec, _: &SupportBundle) -> OrchestratorResult<()> {
            Ok(())
        }
        async fn is_ready(&self, _: &SessionSpec) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.ready_on
        }
        async fn run_test(&self, _: &SessionSpec, _: &str) -> OrchestratorResult<TestVerdict> {
            unreachable!()
        }
        async fn stop(&self, _: &str) -> OrchestratorResult<()> {
            Ok(())
        }
    }

    fn spec() -> SessionSpec {
        SessionSpec {
            ordinal: 0,
            name: "w0".into(),
            endpoints: Endpoints {
                address: "127.0.0.1".into(),
                web_port: 8000,
                hec_port: 8088,
                mgmt_port: 8089,
            },
            username: "admin".into(),
            password: String::new(),
        }
    }

    #[tokio::test]
    async fn test_ready_after_retries() {
        let backend = ReadyAfter {
            calls: AtomicU32::new(0),
            ready_on: 3,
        };
        let probe = ReadinessProbe::new(5, Duration::from_millis(1));
        let outcome = probe
            .wait_ready(&backend, &spec(), &FailureSignal::new())
            .await;
        assert!(matches!(outcome, ProbeOutcome::Ready { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_exhausted() {
        let backend = ReadyAfter {
            calls: AtomicU32::new(0),
            ready_on: 100,
        };
        let probe = ReadinessProbe::new(3, Duration::from_millis(1));
        let outcome = probe
            .wait_ready(&backend, &spec(), &FailureSignal::new())
            .await;
        assert_eq!(outcome, ProbeOutcome::Exhausted { attempts: 3 });
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting() {
        let backend = ReadyAfter {
            calls: AtomicU32::new(0),
            ready_on: 100,
        };
        let signal = FailureSignal::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            trigger.trigger(FailureCause::Interrupted);
        });

        let probe = ReadinessProbe::new(1000, Duration::from_secs(60));
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            probe.wait_ready(&backend, &spec(), &signal),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ProbeOutcome::Cancelled);
    }
}
