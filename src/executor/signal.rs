//! Run-wide cancellation
//!
//! `FailureSignal` is set once, by the interrupt handler or by a faulted
//! session, and read by every session between artifacts. It cannot be reset;
//! each run creates its own.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::warn;

/// Why the signal was raised
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureCause {
    /// Operator interrupt during execution
    Interrupted,
    /// A session hit an unrecoverable fault
    SessionFault { session: String, message: String },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Interrupted => write!(f, "interrupted by operator"),
            FailureCause::SessionFault { session, message } => {
                write!(f, "fault on {session}: {message}")
            }
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    raised: AtomicBool,
    cause: Mutex<Option<FailureCause>>,
    notify: Notify,
}

/// Shared cancellation flag; clones observe the same state
#[derive(Clone, Debug, Default)]
pub struct FailureSignal {
    inner: Arc<Inner>,
}

impl FailureSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal; only the first cause is kept
    pub fn trigger(&self, cause: FailureCause) {
        if let Ok(mut slot) = self.inner.cause.lock() {
            if slot.is_none() {
                warn!("Stopping run: {}", cause);
                *slot = Some(cause);
            }
        }
        self.inner.raised.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    pub fn cause(&self) -> Option<FailureCause> {
        self.inner.cause.lock().ok().and_then(|c| c.clone())
    }

    /// Resolves once the signal is raised
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Which half of the run the pool is in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Setup,
    Execution,
}

/// Phase shared between the pool and the interrupt handler
#[derive(Clone, Debug)]
pub struct PhaseTracker {
    phase: Arc<AtomicU8>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            phase: Arc::new(AtomicU8::new(0)),
        }
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, phase: RunPhase) {
        let value = match phase {
            RunPhase::Setup => 0,
            RunPhase::Execution => 1,
        };
        self.phase.store(value, Ordering::SeqCst);
    }

    pub fn get(&self) -> RunPhase {
        match self.phase.load(Ordering::SeqCst) {
            0 => RunPhase::Setup,
            _ => RunPhase::Execution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_cause_wins() {
        let signal = FailureSignal::new();
        assert!(!signal.is_set());
        assert!(signal.cause().is_none());

        signal.trigger(FailureCause::SessionFault {
            session: "contentctl_worker_1".into(),
            message: "unreachable".into(),
        });
        signal.trigger(FailureCause::Interrupted);

        assert!(signal.is_set());
        assert!(matches!(
            signal.cause(),
            Some(FailureCause::SessionFault { .. })
        ));
    }

    #[test]
    fn test_clones_share_state() {
        let signal = FailureSignal::new();
        let other = signal.clone();
        other.trigger(FailureCause::Interrupted);
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let signal = FailureSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.trigger(FailureCause::Interrupted);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_when_already_set() {
        let signal = FailureSignal::new();
        signal.trigger(FailureCause::Interrupted);
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .unwrap();
    }

    #[test]
    fn test_phase_tracker() {
        let phase = PhaseTracker::new();
        assert_eq!(phase.get(), RunPhase::Setup);
        phase.clone().set(RunPhase::Execution);
        assert_eq!(phase.get(), RunPhase::Execution);
    }
}
