//! Logging and observability
//!
//! This module provides the step history log and the progress snapshot
//! written while a session runs.

pub mod jsonl;
pub mod progress;

pub use jsonl::{summarize_output, JsonlLogger, StepRecord};
pub use progress::{ProgressWriter, SessionProgress};
