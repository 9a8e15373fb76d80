//! Error taxonomy for selection, planning and orchestration
//!
//! Selection and convention errors abort a run before any worker is started.
//! Infrastructure errors are scoped to one worker session and degrade the run
//! cooperatively. A test that runs and does not pass is an outcome, not an error.

use thiserror::Error;

/// Result type for orchestration operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors raised by the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Path does not match the expected root prefix or suffix for its side
    #[error("Convention violation for [{path}]: {reason}")]
    ConventionViolation { path: String, reason: String },

    /// Bad selection mode or a structurally required list was missing
    #[error("Selection error: {0}")]
    Selection(String),

    /// One or more content/test artifacts have no partner file
    #[error("Missing {missing} paired content/test file(s); see the pairing report above")]
    PairingViolation { missing: usize },

    /// A worker session could not be provisioned or driven
    #[error("Infrastructure error on {session}: {message}")]
    Infrastructure { session: String, message: String },

    /// Invalid or incomplete configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn convention(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConventionViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn selection(message: impl Into<String>) -> Self {
        Self::Selection(message.into())
    }

    pub fn infrastructure(session: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Infrastructure {
            session: session.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Errors that must stop the run before any session is started
    pub fn aborts_before_allocation(&self) -> bool {
        matches!(
            self,
            Self::ConventionViolation { .. }
                | Self::Selection(_)
                | Self::PairingViolation { .. }
                | Self::Config(_)
        )
    }
}
