//! Shared test utilities
//!
//! Common helpers used across test modules. Only compiled in test builds.

use serde_json::json;

use crate::cycle::config::AgentConfig;
use crate::cycle::handler::StageHandlers;
use crate::cycle::stage::Stage;

/// A complete cycle.toml where every stage echoes its input back.
pub const VALID_CYCLE_FILE: &str = r#"[agent]
id = "agent-1"
name = "researcher"
type = "assistant"

[cycle]
max_iterations = 2

[stages.analyze]
command = "sh"
args = ["-c", "cat"]

[stages.plan]
command = "sh"
args = ["-c", "cat"]

[stages.tool_select]
command = "sh"
args = ["-c", "cat"]

[stages.execute]
command = "sh"
args = ["-c", "cat"]

[stages.refine]
command = "sh"
args = ["-c", "cat"]

[stages.deliver]
command = "sh"
args = ["-c", "cat"]
"#;

/// The agent used throughout the tests
#[must_use]
pub fn test_agent() -> AgentConfig {
    AgentConfig::new("agent-1", "researcher", "assistant")
}

/// Handlers for every stage that answer `{"stage": "<name>"}`.
#[must_use]
pub fn echo_handlers() -> StageHandlers {
    Stage::ALL.iter().fold(StageHandlers::new(), |handlers, &stage| {
        handlers.with_fn(stage, move |_| async move { Ok(json!({"stage": stage})) })
    })
}
