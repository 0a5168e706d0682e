//! CLI output formatting
//!
//! Provides human-readable terminal display for session execution.

pub mod display;

pub use display::StepDisplay;
