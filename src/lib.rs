//! Agent Cycle - stage sequencer for agent invocations
//!
//! Drives an agent through the fixed Analyze, Plan, SelectTools, Execute,
//! Refine, Deliver loop, one stage per call, with retries, per-stage timeouts
//! and an iteration cap.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

pub mod cli;
pub mod cycle;
pub mod log;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use cli::StepDisplay;
pub use cycle::config::{AgentConfig, CycleConfig, CycleFile, StageCommand, StoreConfig};
pub use cycle::error::SequencerError;
pub use cycle::handler::{CommandHandler, FnHandler, StageHandler, StageHandlers};
pub use cycle::runner::{CycleRunner, RunSummary};
pub use cycle::sequencer::CycleSequencer;
pub use cycle::session::{Session, SessionStatus, Step, StepResult, StepStatus};
pub use cycle::stage::Stage;
pub use cycle::state::{replay, transition, CycleEvent, CycleState};
pub use log::{JsonlLogger, StepRecord};
