//! Stage selection state machine
//!
//! A session stores its position in the cycle as an explicit [`CycleState`].
//! Every finished step feeds one [`CycleEvent`] through [`transition`], a pure
//! function of the previous state, the event and the cycle policy. The state
//! can always be rebuilt from step history with [`replay`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cycle::config::CycleConfig;
use crate::cycle::session::{Step, StepStatus};
use crate::cycle::stage::Stage;

/// Where a session stands in the stage cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CycleState {
    /// The next stage to run, with no outstanding failures
    Ready {
        /// Stage to run next
        next: Stage,
    },
    /// A stage failed and will be attempted again
    Retrying {
        /// Stage to re-attempt
        stage: Stage,
        /// Failed attempts at this stage over the whole session
        failures: u32,
    },
    /// The iteration cap was reached
    Exhausted,
    /// The retry budget for a stage ran out
    Failed {
        /// Stage that could not be completed
        stage: Stage,
    },
}

impl CycleState {
    /// Starting state for a fresh session
    #[must_use]
    pub const fn initial(config: &CycleConfig) -> Self {
        if config.max_iterations == 0 {
            Self::Exhausted
        } else {
            Self::Ready {
                next: Stage::Analyze,
            }
        }
    }

    /// The stage that should run next, if any
    #[must_use]
    pub const fn next_stage(&self) -> Option<Stage> {
        match self {
            Self::Ready { next } => Some(*next),
            Self::Retrying { stage, .. } => Some(*stage),
            Self::Exhausted | Self::Failed { .. } => None,
        }
    }
}

/// Something that happened to the current step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    /// A stage handler returned successfully
    StageCompleted {
        /// Stage that completed
        stage: Stage,
        /// Completed iterations, including this step if it was a Deliver
        iterations: u32,
    },
    /// A stage handler returned an error or timed out
    StageFailed {
        /// Stage that failed
        stage: Stage,
        /// Failed attempts at this stage in the session, including this one
        failures: u32,
    },
}

/// Compute the state that follows `event`.
///
/// `Exhausted` and `Failed` are absorbing.
#[must_use]
pub fn transition(state: CycleState, event: CycleEvent, config: &CycleConfig) -> CycleState {
    if matches!(state, CycleState::Exhausted | CycleState::Failed { .. }) {
        return state;
    }

    match event {
        CycleEvent::StageCompleted { stage, iterations } => {
            if stage == Stage::Deliver && iterations >= config.max_iterations {
                CycleState::Exhausted
            } else {
                CycleState::Ready { next: stage.next() }
            }
        }
        CycleEvent::StageFailed { stage, failures } => {
            if config.auto_retry && failures <= config.retry_count {
                CycleState::Retrying { stage, failures }
            } else {
                CycleState::Failed { stage }
            }
        }
    }
}

/// Rebuild the cycle state by folding finished steps through [`transition`].
///
/// Steps still running are skipped.
#[must_use]
pub fn replay(steps: &[Step], config: &CycleConfig) -> CycleState {
    let mut iterations = 0;
    let mut failures: HashMap<Stage, u32> = HashMap::new();
    steps
        .iter()
        .fold(CycleState::initial(config), |state, step| match step.status {
            StepStatus::Completed => {
                if step.stage == Stage::Deliver {
                    iterations += 1;
                }
                transition(
                    state,
                    CycleEvent::StageCompleted {
                        stage: step.stage,
                        iterations,
                    },
                    config,
                )
            }
            StepStatus::Failed => {
                let count = failures.entry(step.stage).or_insert(0);
                *count += 1;
                transition(
                    state,
                    CycleEvent::StageFailed {
                        stage: step.stage,
                        failures: *count,
                    },
                    config,
                )
            }
            StepStatus::Pending | StepStatus::Running => state,
        })
}
