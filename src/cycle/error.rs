//! Sequencer errors
//!
//! Only caller mistakes surface as errors. Stage handler failures are
//! recorded on the step instead.

use crate::cycle::stage::Stage;

/// Errors returned by [`crate::cycle::sequencer::CycleSequencer`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequencerError {
    /// No session is registered under this id
    #[error("Session {0} not found")]
    SessionNotFound(String),

    /// The handler set has no entry for the selected stage
    #[error("No handler registered for stage '{0}'")]
    HandlerNotFound(Stage),

    /// The session already completed or failed
    #[error("Session {0} has already ended")]
    SessionTerminal(String),
}
