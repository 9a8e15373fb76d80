//! Test execution engine
//!
//! Worker backends, the per-session lifecycle, the pool that runs sessions
//! concurrently and the runner that ties selection to execution.

mod backend;
mod docker;
mod interrupt;
mod pool;
mod runner;
mod server;
mod session;
mod signal;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{session_name, Endpoints, SessionSpec, TestVerdict, WorkerBackend};
pub use docker::DockerBackend;
pub use interrupt::{hard_stop, HARD_STOP_TIMEOUT};
pub use pool::PoolReport;
pub use runner::{RunReport, TestRunner};
pub use session::{SessionReport, SessionState};
pub use signal::{FailureCause, FailureSignal};
