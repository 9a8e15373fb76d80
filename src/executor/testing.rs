//! In-memory backend for exercising sessions and the pool

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

use super::backend::{SessionSpec, TestVerdict, WorkerBackend};
use super::signal::FailureSignal;
use crate::config::{BundleKind, SupportBundle};
use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Default)]
pub struct FakeBackend {
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    bundles: Mutex<Vec<BundleKind>>,
    executed: Mutex<Vec<(usize, String)>>,
    bundle_failures: AtomicU32,
    failing: HashSet<String>,
    faulting: HashSet<String>,
    fault_sessions: HashSet<usize>,
    wait_for_signal: HashSet<usize>,
    first_test_barrier: Option<Arc<Barrier>>,
    signal: Option<FailureSignal>,
    never_ready: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tests at this path report a failed verdict
    pub fn failing_test(mut self, test_path: &str) -> Self {
        self.failing.insert(test_path.to_string());
        self
    }

    /// Tests at this path raise an infrastructure error
    pub fn fault_on_test(mut self, test_path: &str) -> Self {
        self.faulting.insert(test_path.to_string());
        self
    }

    /// Every test on this session raises an infrastructure error
    pub fn fault_on_session(mut self, ordinal: usize) -> Self {
        self.fault_sessions.insert(ordinal);
        self
    }

    /// The first test on this session blocks until `signal` is raised, then passes
    pub fn wait_for_signal(mut self, ordinal: usize, signal: &FailureSignal) -> Self {
        self.wait_for_signal.insert(ordinal);
        self.signal = Some(signal.clone());
        self
    }

    /// Every session's first test waits for all `sessions` to get there
    pub fn rendezvous(mut self, sessions: usize) -> Self {
        self.first_test_barrier = Some(Arc::new(Barrier::new(sessions)));
        self
    }

    pub fn bundle_failures(self, count: u32) -> Self {
        self.bundle_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        let mut stopped = self.stopped.lock().unwrap().clone();
        stopped.sort();
        stopped
    }

    pub fn bundle_kinds(&self) -> Vec<BundleKind> {
        self.bundles.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<(usize, String)> {
        self.executed.lock().unwrap().clone()
    }

    fn tests_run_on(&self, ordinal: usize) -> usize {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| *o == ordinal)
            .count()
    }
}

#[async_trait]
impl WorkerBackend for FakeBackend {
    fn kind(&self) -> &'static str {
        "fake"
    }

    async fn check_available(&self) -> OrchestratorResult<()> {
        Ok(())
    }

    async fn start(&self, spec: &SessionSpec) -> OrchestratorResult<()> {
        self.started.lock().unwrap().push(spec.name.clone());
        Ok(())
    }

    async fn copy_bundle(&self, spec: &SessionSpec, bundle: &SupportBundle) -> OrchestratorResult<()> {
        let remaining = self.bundle_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.bundle_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(OrchestratorError::infrastructure(&spec.name, "copy refused"));
        }
        self.bundles.lock().unwrap().push(bundle.kind);
        Ok(())
    }

    async fn is_ready(&self, _spec: &SessionSpec) -> bool {
        !self.never_ready
    }

    async fn run_test(&self, spec: &SessionSpec, test_path: &str) -> OrchestratorResult<TestVerdict> {
        let first = self.tests_run_on(spec.ordinal) == 0;
        self.executed
            .lock()
            .unwrap()
            .push((spec.ordinal, test_path.to_string()));

        if first {
            if let Some(barrier) = &self.first_test_barrier {
                barrier.wait().await;
            }
            if self.wait_for_signal.contains(&spec.ordinal) {
                if let Some(signal) = &self.signal {
                    signal.cancelled().await;
                }
            }
        }

        if self.fault_sessions.contains(&spec.ordinal) || self.faulting.contains(test_path) {
            return Err(OrchestratorError::infrastructure(&spec.name, "connection reset"));
        }

        Ok(TestVerdict {
            passed: !self.failing.contains(test_path),
            output: String::new(),
            duration: Duration::from_millis(5),
        })
    }

    async fn stop(&self, name: &str) -> OrchestratorResult<()> {
        self.stopped.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
