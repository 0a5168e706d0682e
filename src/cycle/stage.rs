//! Cycle stages
//!
//! The six stages of the agent loop and their fixed ordering. Deliver wraps
//! back around to Analyze so a session can run several iterations.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// One stage of the agent cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Analyze the context and incoming events
    Analyze,
    /// Plan the next actions
    Plan,
    /// Select the tools to use
    #[serde(rename = "tool_select")]
    SelectTools,
    /// Execute commands or actions
    Execute,
    /// Refine results and strategy
    Refine,
    /// Deliver structured results
    Deliver,
}

impl Stage {
    /// All stages in cycle order
    pub const ALL: [Self; 6] = [
        Self::Analyze,
        Self::Plan,
        Self::SelectTools,
        Self::Execute,
        Self::Refine,
        Self::Deliver,
    ];

    /// The stage that follows this one. Deliver wraps to Analyze.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Analyze => Self::Plan,
            Self::Plan => Self::SelectTools,
            Self::SelectTools => Self::Execute,
            Self::Execute => Self::Refine,
            Self::Refine => Self::Deliver,
            Self::Deliver => Self::Analyze,
        }
    }

    /// The stage that precedes this one. Analyze's predecessor is Deliver.
    #[must_use]
    pub const fn previous(self) -> Self {
        match self {
            Self::Analyze => Self::Deliver,
            Self::Plan => Self::Analyze,
            Self::SelectTools => Self::Plan,
            Self::Execute => Self::SelectTools,
            Self::Refine => Self::Execute,
            Self::Deliver => Self::Refine,
        }
    }

    /// Wire name, as used in config files and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Plan => "plan",
            Self::SelectTools => "tool_select",
            Self::Execute => "execute",
            Self::Refine => "refine",
            Self::Deliver => "deliver",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::ALL.iter().find(|stage| stage.as_str() == s) {
            Some(stage) => Ok(*stage),
            None => bail!("Unknown stage '{s}'"),
        }
    }
}
