//! Cycle configuration parser
//!
//! Parses `cycle.toml` into the agent description, the cycle policy, the
//! session store settings and one command per stage.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cycle::stage::Stage;

/// Read-only description of the agent being driven.
///
/// Only used to tag session metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentConfig {
    /// Agent identifier
    pub id: String,
    /// Human-readable agent name
    pub name: String,
    /// Agent kind (e.g. "assistant", "researcher")
    #[serde(rename = "type")]
    pub agent_type: String,
}

impl AgentConfig {
    /// Create an agent description
    #[must_use]
    pub fn new(id: &str, name: &str, agent_type: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            agent_type: agent_type.to_string(),
        }
    }
}

/// Cycle policy for a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleConfig {
    /// Number of completed Deliver stages after which the session completes (default: 5)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Per-stage handler timeout in milliseconds (default: 30000)
    #[serde(default = "default_timeout_per_stage_ms")]
    pub timeout_per_stage_ms: u64,
    /// Retry a failed stage instead of failing the session (default: false)
    #[serde(default)]
    pub auto_retry: bool,
    /// Retries allowed after the first failed attempt at a stage (default: 3)
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Stages expected to complete at least once; missing ones are reported
    #[serde(default = "default_required_stages")]
    pub required_stages: Vec<Stage>,
}

const fn default_max_iterations() -> u32 {
    5
}

const fn default_timeout_per_stage_ms() -> u64 {
    30_000
}

const fn default_retry_count() -> u32 {
    3
}

fn default_required_stages() -> Vec<Stage> {
    vec![Stage::Analyze, Stage::Execute, Stage::Deliver]
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_per_stage_ms: default_timeout_per_stage_ms(),
            auto_retry: false,
            retry_count: default_retry_count(),
            required_stages: default_required_stages(),
        }
    }
}

impl CycleConfig {
    /// Check numeric bounds and required-stage uniqueness
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            bail!("max_iterations must be at least 1");
        }
        if self.timeout_per_stage_ms == 0 {
            bail!("timeout_per_stage_ms must be at least 1");
        }

        let mut seen = HashSet::new();
        for stage in &self.required_stages {
            if !seen.insert(stage) {
                bail!("Duplicate required stage: '{stage}'");
            }
        }

        Ok(())
    }
}

/// Settings for the in-memory session store
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Evict finished sessions this many seconds after they end.
    /// None keeps them until disposed explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_ttl_secs: Option<u64>,
}

/// A shell command that implements one stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageCommand {
    /// Program to run
    pub command: String,
    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Top-level configuration parsed from cycle.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleFile {
    /// The agent being driven
    pub agent: AgentConfig,
    /// Cycle policy
    #[serde(default)]
    pub cycle: CycleConfig,
    /// Session store settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Stage commands keyed by stage wire name
    pub stages: BTreeMap<String, StageCommand>,
}

impl CycleFile {
    /// Parse a cycle.toml file from a path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cycle file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse cycle.toml content from a string
    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = toml::from_str(content).context("Failed to parse cycle file")?;
        file.validate()?;
        Ok(file)
    }

    /// Look up the command configured for a stage
    #[must_use]
    pub fn command_for(&self, stage: Stage) -> Option<&StageCommand> {
        self.stages.get(stage.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.agent.id.trim().is_empty() {
            bail!("Agent id cannot be empty");
        }
        if self.agent.name.trim().is_empty() {
            bail!("Agent name cannot be empty");
        }

        self.cycle.validate().context("in [cycle]")?;

        for name in self.stages.keys() {
            name.parse::<Stage>()
                .with_context(|| format!("in [stages.{name}]"))?;
        }

        for stage in Stage::ALL {
            let Some(cmd) = self.command_for(stage) else {
                bail!("Missing command for stage '{stage}'");
            };
            if cmd.command.trim().is_empty() {
                bail!("Command for stage '{stage}' cannot be empty");
            }
        }

        Ok(())
    }
}
