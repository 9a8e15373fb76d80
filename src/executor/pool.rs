//! Worker pool
//!
//! Runs one session per shard. All sessions are provisioned concurrently
//! during the setup phase, then all shards run concurrently during the
//! execution phase, then every session is torn down.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{error, info};

use super::backend::{SessionSpec, WorkerBackend};
use super::session::{SessionReport, SessionSettings, SessionState, WorkerSession};
use super::signal::{FailureCause, FailureSignal, PhaseTracker, RunPhase};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::shard::Shard;
use crate::utils::Timer;

/// Combined result of every session in a run
#[derive(Clone, Debug, Serialize)]
pub struct PoolReport {
    pub overall_success: bool,
    pub sessions: Vec<SessionReport>,
}

impl PoolReport {
    pub fn outcomes(&self) -> impl Iterator<Item = &crate::models::RunOutcome> {
        self.sessions.iter().flat_map(|s| s.outcomes.iter())
    }

    pub fn faulted(&self) -> impl Iterator<Item = &SessionReport> {
        self.sessions
            .iter()
            .filter(|s| s.final_state == SessionState::Faulted)
    }
}

/// Identity of a spawned session, kept so a lost task can still be reported
struct Slot {
    ordinal: usize,
    name: String,
    paths: Vec<String>,
}

pub struct WorkerPool {
    backend: Arc<dyn WorkerBackend>,
    signal: FailureSignal,
    phase: PhaseTracker,
    settings: SessionSettings,
}

impl WorkerPool {
    pub fn new(
        backend: Arc<dyn WorkerBackend>,
        signal: FailureSignal,
        phase: PhaseTracker,
        settings: SessionSettings,
    ) -> Self {
        Self {
            backend,
            signal,
            phase,
            settings,
        }
    }

    /// Run every shard on its session; `specs[i]` owns `shards[i]`
    pub async fn run_all(
        &self,
        specs: Vec<SessionSpec>,
        shards: Vec<Shard>,
    ) -> OrchestratorResult<PoolReport> {
        if specs.len() != shards.len() {
            return Err(OrchestratorError::config(format!(
                "{} session(s) for {} shard(s)",
                specs.len(),
                shards.len()
            )));
        }

        let timer = Timer::start();
        let mut slots = Vec::with_capacity(specs.len());
        let mut lost = Vec::new();

        // Setup
        self.phase.set(RunPhase::Setup);
        info!("Provisioning {} {} session(s)", specs.len(), self.backend.kind());

        let mut handles = Vec::with_capacity(specs.len());
        for (spec, shard) in specs.into_iter().zip(shards) {
            slots.push(Slot {
                ordinal: spec.ordinal,
                name: spec.name.clone(),
                paths: shard.paths(),
            });
            let mut session = WorkerSession::new(
                spec,
                shard,
                self.backend.clone(),
                self.signal.clone(),
                self.settings.clone(),
            );
            handles.push(tokio::spawn(async move {
                session.provision().await;
                session
            }));
        }
        let provisioned = self.collect(&slots, join_all(handles).await, &mut lost);

        // Execution
        self.phase.set(RunPhase::Execution);
        let ready = provisioned
            .iter()
            .filter(|(_, s)| s.state() == SessionState::Ready)
            .count();
        info!("{} of {} session(s) ready, running tests", ready, slots.len());

        let mut running_slots = Vec::with_capacity(provisioned.len());
        let mut handles = Vec::with_capacity(provisioned.len());
        for (index, mut session) in provisioned {
            running_slots.push(index);
            handles.push(tokio::spawn(async move {
                session.run().await;
                session
            }));
        }
        let finished: Vec<(usize, WorkerSession)> = self
            .collect_indexed(&slots, &running_slots, join_all(handles).await, &mut lost);

        // Teardown
        let mut sessions: Vec<WorkerSession> = finished.into_iter().map(|(_, s)| s).collect();
        join_all(sessions.iter_mut().map(|s| s.teardown())).await;

        let mut reports: Vec<SessionReport> = sessions
            .into_iter()
            .map(WorkerSession::into_report)
            .chain(lost)
            .collect();
        reports.sort_by_key(|r| r.ordinal);

        let overall_success = !self.signal.is_set()
            && reports
                .iter()
                .all(|r| r.final_state != SessionState::Faulted && r.all_passed());

        info!(
            "Pool finished in {}ms, overall {}",
            timer.elapsed_ms(),
            if overall_success { "PASS" } else { "FAIL" }
        );

        Ok(PoolReport {
            overall_success,
            sessions: reports,
        })
    }

    fn collect(
        &self,
        slots: &[Slot],
        results: Vec<Result<WorkerSession, JoinError>>,
        lost: &mut Vec<SessionReport>,
    ) -> Vec<(usize, WorkerSession)> {
        let indexes: Vec<usize> = (0..slots.len()).collect();
        self.collect_indexed(slots, &indexes, results, lost)
    }

    fn collect_indexed(
        &self,
        slots: &[Slot],
        indexes: &[usize],
        results: Vec<Result<WorkerSession, JoinError>>,
        lost: &mut Vec<SessionReport>,
    ) -> Vec<(usize, WorkerSession)> {
        let mut alive = Vec::with_capacity(results.len());
        for (&index, result) in indexes.iter().zip(results) {
            match result {
                Ok(session) => alive.push((index, session)),
                Err(e) => {
                    let slot = &slots[index];
                    error!("Session task {} was lost: {}", slot.name, e);
                    self.signal.trigger(FailureCause::SessionFault {
                        session: slot.name.clone(),
                        message: e.to_string(),
                    });
                    lost.push(SessionReport::lost(
                        slot.ordinal,
                        slot.name.clone(),
                        &slot.paths,
                        &e.to_string(),
                    ));
                }
            }
        }
        alive
    }
}
