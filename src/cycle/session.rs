//! Sessions and steps
//!
//! A [`Session`] is one run of the stage cycle for an agent invocation. It owns
//! an append-only list of [`Step`]s, one per attempt at a stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::cycle::config::{AgentConfig, CycleConfig};
use crate::cycle::stage::Stage;
use crate::cycle::state::{transition, CycleEvent, CycleState};

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, no stage run yet
    Pending,
    /// At least one stage has run
    Running,
    /// Finished normally or ended by the caller
    Completed,
    /// A stage failed with no retries left
    Failed,
    /// Suspended by the caller
    Paused,
}

impl SessionStatus {
    /// Whether the session has ended
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Lifecycle status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not started
    Pending,
    /// Handler in flight
    Running,
    /// Handler returned a value
    Completed,
    /// Handler returned an error or timed out
    Failed,
}

/// Outcome attached to a finished step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Whether the handler succeeded
    pub success: bool,
    /// Handler output on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the result was recorded
    pub timestamp: DateTime<Utc>,
}

/// One attempt at running a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step identifier
    pub id: String,
    /// Stage this step ran
    pub stage: Stage,
    /// Owning session
    pub session_id: String,
    /// Agent being driven
    pub agent_id: String,
    /// Input handed to the stage handler
    pub input: Value,
    /// Outcome, once finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
    /// When the step started
    pub start_time: DateTime<Utc>,
    /// When the step finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Current status
    pub status: StepStatus,
}

impl Step {
    /// Wall-clock duration in milliseconds, once finished
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time
            .map(|end| u64::try_from((end - self.start_time).num_milliseconds()).unwrap_or(0))
    }

    /// Handler output, if the step completed with data
    #[must_use]
    pub fn output(&self) -> Option<&Value> {
        self.result.as_ref().and_then(|r| r.data.as_ref())
    }

    /// Error message, if the step failed
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.error.as_deref())
    }
}

/// Information captured when a session starts. Never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Agent name
    pub agent_name: String,
    /// Agent type
    pub agent_type: String,
    /// Input handed to the first Analyze step
    pub initial_input: Value,
}

/// One run of the stage cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier
    pub id: String,
    /// Agent being driven
    pub agent_id: String,
    /// Every attempt so far, in execution order
    pub steps: Vec<Step>,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Number of completed Deliver stages
    pub iteration_count: u32,
    /// When the session was created
    pub start_time: DateTime<Utc>,
    /// When the session ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Creation-time metadata
    pub metadata: SessionMetadata,
    /// Result supplied by the caller when ending the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<Value>,
    /// Cycle policy captured at creation
    pub config: CycleConfig,
    /// Position in the stage cycle
    pub state: CycleState,
}

impl Session {
    pub(crate) fn new(agent: &AgentConfig, config: CycleConfig, initial_input: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent.id.clone(),
            steps: Vec::new(),
            status: SessionStatus::Pending,
            iteration_count: 0,
            start_time: Utc::now(),
            end_time: None,
            metadata: SessionMetadata {
                agent_name: agent.name.clone(),
                agent_type: agent.agent_type.clone(),
                initial_input,
            },
            final_result: None,
            state: CycleState::initial(&config),
            config,
        }
    }

    /// Most recently appended step
    #[must_use]
    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Number of attempts made at a stage
    #[must_use]
    pub fn attempts_at(&self, stage: Stage) -> usize {
        self.steps.iter().filter(|s| s.stage == stage).count()
    }

    /// Number of failed attempts at a stage over the whole session
    #[must_use]
    pub fn failed_attempts_at(&self, stage: Stage) -> u32 {
        let failed = self
            .steps
            .iter()
            .filter(|s| s.stage == stage && s.status == StepStatus::Failed)
            .count();
        u32::try_from(failed).unwrap_or(u32::MAX)
    }

    /// Output of the most recent completed step of a stage
    #[must_use]
    pub fn latest_output(&self, stage: Stage) -> Option<&Value> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.stage == stage && s.status == StepStatus::Completed)
            .and_then(Step::output)
    }

    /// The 1-indexed iteration the step at `index` belongs to
    #[must_use]
    pub fn iteration_of(&self, index: usize) -> u32 {
        let delivered = self
            .steps
            .iter()
            .take(index)
            .filter(|s| s.stage == Stage::Deliver && s.status == StepStatus::Completed)
            .count();
        u32::try_from(delivered).unwrap_or(u32::MAX).saturating_add(1)
    }

    /// Required stages that have no completed step yet
    #[must_use]
    pub fn missing_required_stages(&self) -> Vec<Stage> {
        self.config
            .required_stages
            .iter()
            .copied()
            .filter(|stage| {
                !self
                    .steps
                    .iter()
                    .any(|s| s.stage == *stage && s.status == StepStatus::Completed)
            })
            .collect()
    }

    /// Input for the next attempt at `stage`.
    ///
    /// The very first step receives the initial input. Every other step
    /// receives the output of the latest completed predecessor stage. A
    /// missing or `null` value becomes `{}`.
    #[must_use]
    pub fn stage_input(&self, stage: Stage) -> Value {
        let source = if self.steps.is_empty() && stage == Stage::Analyze {
            Some(&self.metadata.initial_input)
        } else {
            self.latest_output(stage.previous())
        };

        match source {
            Some(data) if !data.is_null() => data.clone(),
            _ => Value::Object(Map::new()),
        }
    }

    pub(crate) fn begin_step(&mut self, stage: Stage, input: Value) {
        self.steps.push(Step {
            id: Uuid::new_v4().to_string(),
            stage,
            session_id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            input,
            result: None,
            start_time: Utc::now(),
            end_time: None,
            status: StepStatus::Running,
        });
        self.status = SessionStatus::Running;
    }

    /// Attach the handler outcome to the running step and advance the cycle.
    ///
    /// A session that was ended while the handler ran keeps its terminal status.
    pub(crate) fn record_outcome(&mut self, outcome: Result<Value, String>) -> Option<Step> {
        let now = Utc::now();
        let stage = self
            .last_step()
            .filter(|s| s.status == StepStatus::Running)?
            .stage;
        let failures = self.failed_attempts_at(stage).saturating_add(1);
        let step = self.steps.last_mut()?;

        let event = match outcome {
            Ok(data) => {
                step.result = Some(StepResult {
                    success: true,
                    data: Some(data),
                    error: None,
                    timestamp: now,
                });
                step.status = StepStatus::Completed;
                if stage == Stage::Deliver {
                    self.iteration_count += 1;
                }
                CycleEvent::StageCompleted {
                    stage,
                    iterations: self.iteration_count,
                }
            }
            Err(error) => {
                step.result = Some(StepResult {
                    success: false,
                    data: None,
                    error: Some(error),
                    timestamp: now,
                });
                step.status = StepStatus::Failed;
                CycleEvent::StageFailed { stage, failures }
            }
        };
        step.end_time = Some(now);
        let finished = step.clone();

        self.state = transition(self.state, event, &self.config);
        if matches!(self.state, CycleState::Failed { .. }) && !self.status.is_terminal() {
            self.finish(SessionStatus::Failed);
        }

        Some(finished)
    }

    pub(crate) fn finish(&mut self, status: SessionStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }
}
