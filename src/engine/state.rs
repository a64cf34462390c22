//! Engine lifecycle state.

use std::sync::Arc;

use crate::error::{EngineError, EngineStateError};

/// Run state of an [`Engine`](super::Engine).
#[derive(Clone, Debug, Default)]
pub enum EngineState {
    /// Constructed but not yet started.
    #[default]
    Idle,
    /// Accepting inbound performatives and application calls.
    Running,
    /// Stopped by the application.
    Shutdown,
    /// Stopped by a fatal error. Holds the original cause.
    Failed(Arc<EngineError>),
}

impl EngineState {
    /// Returns `true` while the engine accepts calls.
    #[must_use]
    pub const fn is_running(&self) -> bool { matches!(self, Self::Running) }

    /// Returns `true` once the engine reached either terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool { matches!(self, Self::Shutdown | Self::Failed(_)) }

    /// The error that failed the engine, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&EngineError> {
        match self {
            Self::Failed(cause) => Some(cause),
            _ => None,
        }
    }

    /// Map the state to the error a call should report, or `Ok` when running.
    pub(super) fn ensure_running(&self) -> Result<(), EngineError> {
        match self {
            Self::Running => Ok(()),
            Self::Idle => Err(EngineStateError::NotStarted.into()),
            Self::Shutdown => Err(EngineStateError::Shutdown.into()),
            Self::Failed(cause) => Err(EngineError::Failed(Arc::clone(cause))),
        }
    }
}
