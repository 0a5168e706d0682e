//! Cycle management
//!
//! This module handles stage ordering, configuration, session state,
//! stage handlers and the sequencer that ties them together.

pub mod config;
pub mod error;
pub mod handler;
pub mod runner;
pub mod sequencer;
pub mod session;
pub mod stage;
pub mod state;
