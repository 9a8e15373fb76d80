//! Worker session lifecycle
//!
//! One session per shard moves through
//! `Planned -> Provisioning -> Ready -> Running -> Draining -> Stopped`, or to
//! `Faulted` from any non-terminal state. Sessions that are cancelled before
//! they run go straight to `Draining`. A started session is always stopped,
//! on every exit path.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::backend::{SessionSpec, WorkerBackend};
use super::signal::{FailureCause, FailureSignal};
use crate::config::{ordered_bundles, SupportBundle};
use crate::content::PathConvention;
use crate::deploy::{ProbeOutcome, ReadinessProbe};
use crate::error::OrchestratorError;
use crate::models::RunOutcome;
use crate::shard::Shard;
use crate::utils::{duration_ms, Stopwatch};

/// Diagnostic of artifacts that were never executed
pub const NOT_RUN: &str = "not run";

/// Lifecycle state of a worker session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Planned,
    Provisioning,
    Ready,
    Running,
    Draining,
    Stopped,
    Faulted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Faulted)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Planned, Provisioning)
                | (Provisioning, Ready)
                | (Ready, Running)
                | (Running, Draining)
                | (Draining, Stopped)
                | (Planned | Provisioning | Ready, Draining)
                | (_, Faulted)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Planned => "planned",
            SessionState::Provisioning => "provisioning",
            SessionState::Ready => "ready",
            SessionState::Running => "running",
            SessionState::Draining => "draining",
            SessionState::Stopped => "stopped",
            SessionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Provisioning parameters shared by every session of a run
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub convention: PathConvention,
    pub bundles: Vec<SupportBundle>,
    pub bundle_attempts: u32,
    pub retry_delay: Duration,
    pub probe: ReadinessProbe,
}

impl SessionSettings {
    pub fn new(convention: PathConvention, bundles: &[SupportBundle], probe: ReadinessProbe) -> Self {
        Self {
            convention,
            bundles: ordered_bundles(bundles),
            bundle_attempts: 3,
            retry_delay: Duration::from_secs(2),
            probe,
        }
    }

    pub fn with_bundle_attempts(mut self, attempts: u32) -> Self {
        self.bundle_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Stops a started session if it is dropped without an explicit teardown
struct TeardownGuard {
    backend: Arc<dyn WorkerBackend>,
    name: String,
    armed: bool,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let backend = self.backend.clone();
            let name = self.name.clone();
            warn!("{} dropped while running, stopping it in the background", name);
            handle.spawn(async move {
                if let Err(e) = backend.stop(&name).await {
                    warn!("Background stop of {} failed: {}", name, e);
                }
            });
        }
    }
}

/// Final record of one session
#[derive(Clone, Debug, Serialize)]
pub struct SessionReport {
    pub ordinal: usize,
    pub name: String,
    pub final_state: SessionState,
    pub outcomes: Vec<RunOutcome>,
    pub fault: Option<String>,
    pub timings: String,
}

impl SessionReport {
    /// Report for a session whose task was lost; its artifacts count as errored
    pub fn lost(ordinal: usize, name: String, paths: &[String], reason: &str) -> Self {
        Self {
            ordinal,
            name,
            final_state: SessionState::Faulted,
            outcomes: paths
                .iter()
                .map(|p| RunOutcome::errored(p.clone(), ordinal, format!("session lost: {reason}")))
                .collect(),
            fault: Some(reason.to_string()),
            timings: String::new(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_success())
    }
}

/// One worker session and the shard it owns
pub struct WorkerSession {
    spec: SessionSpec,
    shard: Shard,
    state: SessionState,
    backend: Arc<dyn WorkerBackend>,
    signal: FailureSignal,
    settings: SessionSettings,
    outcomes: Vec<RunOutcome>,
    fault: Option<String>,
    stopwatch: Stopwatch,
    guard: TeardownGuard,
}

impl WorkerSession {
    pub fn new(
        spec: SessionSpec,
        shard: Shard,
        backend: Arc<dyn WorkerBackend>,
        signal: FailureSignal,
        settings: SessionSettings,
    ) -> Self {
        let guard = TeardownGuard {
            backend: backend.clone(),
            name: spec.name.clone(),
            armed: false,
        };
        Self {
            spec,
            shard,
            state: SessionState::Planned,
            backend,
            signal,
            settings,
            outcomes: Vec::new(),
            fault: None,
            stopwatch: Stopwatch::new(),
            guard,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.can_transition_to(next) {
            debug!("{}: {} -> {}", self.spec.name, self.state, next);
            self.state = next;
        } else {
            warn!(
                "{}: ignoring invalid transition {} -> {}",
                self.spec.name, self.state, next
            );
        }
    }

    fn fault(&mut self, err: OrchestratorError) {
        let message = err.to_string();
        error!("{} faulted: {}", self.spec.name, message);
        self.signal.trigger(FailureCause::SessionFault {
            session: self.spec.name.clone(),
            message: message.clone(),
        });
        self.fault = Some(message);
        self.transition(SessionState::Faulted);
    }

    /// Start the session, apply support bundles and wait for readiness
    pub async fn provision(&mut self) {
        if self.shard.is_empty() {
            info!("{} has no work assigned, not starting it", self.spec.name);
            self.transition(SessionState::Draining);
            return;
        }
        if self.signal.is_set() {
            self.transition(SessionState::Draining);
            return;
        }

        self.transition(SessionState::Provisioning);
        self.guard.armed = true;

        if let Err(e) = self.backend.start(&self.spec).await {
            self.fault(e);
            return;
        }

        let bundles = self.settings.bundles.clone();
        for bundle in &bundles {
            if self.signal.is_set() {
                self.transition(SessionState::Draining);
                return;
            }
            if let Err(e) = self.copy_with_retries(bundle).await {
                self.fault(e);
                return;
            }
        }

        let probe = self.settings.probe.clone();
        match probe
            .wait_ready(self.backend.as_ref(), &self.spec, &self.signal)
            .await
        {
            ProbeOutcome::Ready { .. } => self.transition(SessionState::Ready),
            ProbeOutcome::Cancelled => self.transition(SessionState::Draining),
            ProbeOutcome::Exhausted { attempts } => {
                let err = OrchestratorError::infrastructure(
                    &self.spec.name,
                    format!(
                        "management endpoint {}:{} not reachable after {} attempts",
                        self.spec.endpoints.address, self.spec.endpoints.mgmt_port, attempts
                    ),
                );
                self.fault(err);
            }
        }

        self.stopwatch.lap("provision");
    }

    async fn copy_with_retries(&self, bundle: &SupportBundle) -> Result<(), OrchestratorError> {
        let attempts = self.settings.bundle_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.backend.copy_bundle(&self.spec, bundle).await {
                Ok(()) => {
                    info!(
                        "{}: applied {:?} bundle to {}",
                        self.spec.name, bundle.kind, bundle.container_path
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "{}: {:?} bundle attempt {}/{} failed: {}",
                        self.spec.name, bundle.kind, attempt, attempts, e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry_delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            OrchestratorError::infrastructure(&self.spec.name, "bundle copy failed")
        }))
    }

    /// Run the shard in order, stopping at the first checkpoint after the
    /// failure signal is raised
    pub async fn run(&mut self) {
        if self.state == SessionState::Ready {
            self.transition(SessionState::Running);
            info!(
                "{} running {} artifact(s)",
                self.spec.name,
                self.shard.len()
            );

            let artifacts = self.shard.artifacts.clone();
            for artifact in &artifacts {
                if self.signal.is_set() {
                    info!("{} draining, {} artifact(s) not run", self.spec.name, artifacts.len() - self.outcomes.len());
                    break;
                }

                let test_path = match self.settings.convention.to_test_path(&artifact.path) {
                    Ok(path) => path,
                    Err(e) => {
                        self.outcomes
                            .push(RunOutcome::errored(&artifact.path, self.spec.ordinal, e.to_string()));
                        continue;
                    }
                };

                debug!("{} testing {} ({})", self.spec.name, artifact.display_name(), test_path);
                match self.backend.run_test(&self.spec, &test_path).await {
                    Ok(verdict) => {
                        let ms = duration_ms(verdict.duration);
                        let outcome = if verdict.passed {
                            RunOutcome::passed(&artifact.path, self.spec.ordinal, ms)
                        } else {
                            RunOutcome::failed(&artifact.path, self.spec.ordinal, ms, verdict.output)
                        };
                        info!("{}", outcome);
                        self.outcomes.push(outcome);
                    }
                    Err(e) => {
                        self.outcomes
                            .push(RunOutcome::errored(&artifact.path, self.spec.ordinal, e.to_string()));
                        self.fault(e);
                        break;
                    }
                }
            }

            if self.state == SessionState::Running {
                self.transition(SessionState::Draining);
            }
            self.stopwatch.lap("run");
        }

        self.skip_remaining();
    }

    fn skip_remaining(&mut self) {
        let done = self.outcomes.len();
        for artifact in self.shard.artifacts.iter().skip(done) {
            self.outcomes
                .push(RunOutcome::skipped(&artifact.path, self.spec.ordinal, NOT_RUN));
        }
    }

    /// Stop the session if it was started; stop errors are logged
    pub async fn teardown(&mut self) {
        if self.guard.armed {
            if let Err(e) = self.backend.stop(&self.spec.name).await {
                warn!("Failed to stop {}: {}", self.spec.name, e);
            }
            self.guard.armed = false;
        }

        if matches!(
            self.state,
            SessionState::Planned | SessionState::Provisioning | SessionState::Ready | SessionState::Running
        ) {
            self.transition(SessionState::Draining);
        }
        if self.state == SessionState::Draining {
            self.transition(SessionState::Stopped);
        }
        self.stopwatch.lap("teardown");
    }

    pub fn into_report(mut self) -> SessionReport {
        self.skip_remaining();
        info!("{} finished {} [{}]", self.spec.name, self.state, self.stopwatch.format());
        SessionReport {
            ordinal: self.spec.ordinal,
            name: self.spec.name.clone(),
            final_state: self.state,
            outcomes: std::mem::take(&mut self.outcomes),
            fault: self.fault.take(),
            timings: self.stopwatch.format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BundleKind, ContainerSettings};
    use crate::executor::testing::FakeBackend;
    use crate::models::{ContentArtifact, TestStatus};

    fn shard(paths: &[&str]) -> Shard {
        Shard {
            index: 0,
            artifacts: paths
                .iter()
                .map(|p| ContentArtifact::new(*p).with_type("TTP"))
                .collect(),
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings::new(
            PathConvention::default(),
            &SupportBundle::defaults(),
            ReadinessProbe::new(3, Duration::from_millis(1)),
        )
        .with_retry_delay(Duration::from_millis(1))
    }

    fn session(backend: Arc<FakeBackend>, shard: Shard, signal: FailureSignal) -> WorkerSession {
        let spec = SessionSpec::for_container(0, &ContainerSettings::default()).unwrap();
        WorkerSession::new(spec, shard, backend, signal, settings())
    }

    #[test]
    fn test_transitions() {
        use SessionState::*;
        assert!(Planned.can_transition_to(Provisioning));
        assert!(Running.can_transition_to(Draining));
        assert!(Ready.can_transition_to(Faulted));
        assert!(!Planned.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Faulted));
        assert!(!Faulted.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Ready));
    }

    #[tokio::test]
    async fn test_happy_path() {
        let backend = Arc::new(FakeBackend::new().failing_test("tests/endpoint/b.test.yml"));
        let mut s = session(
            backend.clone(),
            shard(&["detections/endpoint/a.yml", "detections/endpoint/b.yml"]),
            FailureSignal::new(),
        );

        s.provision().await;
        assert_eq!(s.state(), SessionState::Ready);
        s.run().await;
        assert_eq!(s.state(), SessionState::Draining);
        s.teardown().await;
        assert_eq!(s.state(), SessionState::Stopped);

        let report = s.into_report();
        assert_eq!(report.outcomes[0].status, TestStatus::Passed);
        assert_eq!(report.outcomes[1].status, TestStatus::Failed);
        assert!(report.fault.is_none());
        assert_eq!(backend.stopped(), vec!["contentctl_worker_0"]);
    }

    #[tokio::test]
    async fn test_bundles_applied_in_dependency_order() {
        let backend = Arc::new(FakeBackend::new());
        let mut reversed = SupportBundle::defaults();
        reversed.reverse();

        let spec = SessionSpec::for_container(0, &ContainerSettings::default()).unwrap();
        let settings = SessionSettings::new(
            PathConvention::default(),
            &reversed,
            ReadinessProbe::new(1, Duration::from_millis(1)),
        );
        let mut s = WorkerSession::new(
            spec,
            shard(&["detections/endpoint/a.yml"]),
            backend.clone(),
            FailureSignal::new(),
            settings,
        );
        s.provision().await;

        assert_eq!(
            backend.bundle_kinds(),
            vec![BundleKind::Indexes, BundleKind::DataModels, BundleKind::Authorizations]
        );
    }

    #[tokio::test]
    async fn test_bundle_retry_then_success() {
        let backend = Arc::new(FakeBackend::new().bundle_failures(2));
        let mut s = session(backend.clone(), shard(&["detections/endpoint/a.yml"]), FailureSignal::new());
        s.provision().await;
        assert_eq!(s.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_bundle_retries_exhausted_faults_and_signals() {
        let backend = Arc::new(FakeBackend::new().bundle_failures(10));
        let signal = FailureSignal::new();
        let mut s = session(backend.clone(), shard(&["detections/endpoint/a.yml"]), signal.clone());

        s.provision().await;
        assert_eq!(s.state(), SessionState::Faulted);
        assert!(signal.is_set());

        s.run().await;
        s.teardown().await;
        let report = s.into_report();
        assert_eq!(report.final_state, SessionState::Faulted);
        assert_eq!(report.outcomes[0].status, TestStatus::Skipped);
        assert_eq!(backend.stopped(), vec!["contentctl_worker_0"]);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_faults() {
        let backend = Arc::new(FakeBackend::new().never_ready());
        let mut s = session(backend, shard(&["detections/endpoint/a.yml"]), FailureSignal::new());
        s.provision().await;
        assert_eq!(s.state(), SessionState::Faulted);
    }

    #[tokio::test]
    async fn test_infrastructure_error_mid_run() {
        let backend = Arc::new(FakeBackend::new().fault_on_test("tests/endpoint/b.test.yml"));
        let signal = FailureSignal::new();
        let mut s = session(
            backend,
            shard(&[
                "detections/endpoint/a.yml",
                "detections/endpoint/b.yml",
                "detections/endpoint/c.yml",
            ]),
            signal.clone(),
        );

        s.provision().await;
        s.run().await;
        s.teardown().await;
        let report = s.into_report();

        let statuses: Vec<TestStatus> = report.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![TestStatus::Passed, TestStatus::Errored, TestStatus::Skipped]
        );
        assert_eq!(report.final_state, SessionState::Faulted);
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn test_signal_before_run_skips_everything() {
        let backend = Arc::new(FakeBackend::new());
        let signal = FailureSignal::new();
        let mut s = session(backend.clone(), shard(&["detections/endpoint/a.yml"]), signal.clone());

        s.provision().await;
        signal.trigger(FailureCause::Interrupted);
        s.run().await;
        s.teardown().await;

        let report = s.into_report();
        assert_eq!(report.final_state, SessionState::Stopped);
        assert_eq!(report.outcomes[0].status, TestStatus::Skipped);
        assert_eq!(report.outcomes[0].message.as_deref(), Some(NOT_RUN));
        assert!(backend.executed().is_empty());
    }

    #[tokio::test]
    async fn test_empty_shard_never_starts() {
        let backend = Arc::new(FakeBackend::new());
        let mut s = session(backend.clone(), shard(&[]), FailureSignal::new());
        s.provision().await;
        s.run().await;
        s.teardown().await;

        assert_eq!(s.state(), SessionState::Stopped);
        assert!(backend.started().is_empty());
        assert!(backend.stopped().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_session_is_stopped_in_background() {
        let backend = Arc::new(FakeBackend::new());
        {
            let mut s = session(backend.clone(), shard(&["detections/endpoint/a.yml"]), FailureSignal::new());
            s.provision().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.stopped(), vec!["contentctl_worker_0"]);
    }
}
