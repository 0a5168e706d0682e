//! Stage handlers
//!
//! A handler turns a stage input into a stage output. Handlers are looked up
//! per stage from a [`StageHandlers`] registry. Two implementations ship with
//! the crate: [`FnHandler`] wraps an async closure and [`CommandHandler`]
//! runs a subprocess that speaks JSON over stdin/stdout.

use std::collections::HashMap;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;

use crate::cycle::config::{CycleFile, StageCommand};
use crate::cycle::stage::Stage;

/// Environment variable telling a stage command which stage it runs
pub const STAGE_ENV_VAR: &str = "AGENT_CYCLE_STAGE";

/// Runs one stage of the cycle
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Produce the stage output for `input`
    async fn handle(&self, stage: Stage, input: Value) -> Result<Value>;
}

/// Adapts an async closure into a [`StageHandler`]
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F> {
    /// Wrap a closure
    #[must_use]
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> StageHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn handle(&self, _stage: Stage, input: Value) -> Result<Value> {
        (self.func)(input).await
    }
}

/// Registry mapping each stage to its handler
#[derive(Clone, Default)]
pub struct StageHandlers {
    handlers: HashMap<Stage, Arc<dyn StageHandler>>,
}

impl StageHandlers {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with one [`CommandHandler`] per configured stage
    #[must_use]
    pub fn from_cycle_file(file: &CycleFile) -> Self {
        let mut handlers = Self::new();
        for stage in Stage::ALL {
            if let Some(cmd) = file.command_for(stage) {
                handlers.insert(stage, CommandHandler::new(cmd.clone()));
            }
        }
        handlers
    }

    /// Register a handler, replacing any previous one for the stage
    pub fn insert<H: StageHandler + 'static>(&mut self, stage: Stage, handler: H) {
        self.handlers.insert(stage, Arc::new(handler));
    }

    /// Builder-style [`insert`](Self::insert)
    #[must_use]
    pub fn with<H: StageHandler + 'static>(mut self, stage: Stage, handler: H) -> Self {
        self.insert(stage, handler);
        self
    }

    /// Register an async closure for a stage
    #[must_use]
    pub fn with_fn<F, Fut>(self, stage: Stage, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.with(stage, FnHandler::new(func))
    }

    /// Handler registered for a stage
    #[must_use]
    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(&stage).cloned()
    }

    /// Whether every stage has a handler
    #[must_use]
    pub fn covers_all(&self) -> bool {
        Stage::ALL.iter().all(|s| self.handlers.contains_key(s))
    }
}

/// Runs a stage as a subprocess.
///
/// The stage input is written to stdin as JSON. Stdout is parsed as JSON; if
/// it is not valid JSON the trimmed text becomes a JSON string, and empty
/// output becomes `null`. A non-zero exit status fails the stage.
pub struct CommandHandler {
    command: StageCommand,
}

impl CommandHandler {
    /// Create a handler for the given command
    #[must_use]
    pub const fn new(command: StageCommand) -> Self {
        Self { command }
    }

    fn build(&self, stage: Stage) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.command.command);
        cmd.args(&self.command.args)
            .envs(&self.command.env)
            .env(STAGE_ENV_VAR, stage.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl StageHandler for CommandHandler {
    async fn handle(&self, stage: Stage, input: Value) -> Result<Value> {
        let payload = serde_json::to_vec(&input).context("Failed to serialize stage input")?;
        let (stdout, stderr, exit_code) = run_command(self.build(stage), payload)
            .await
            .with_context(|| format!("Failed to run command for stage '{stage}'"))?;

        if exit_code != Some(0) {
            let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            let stderr = stderr.trim();
            if stderr.is_empty() {
                bail!("Stage '{stage}' command exited with {code}");
            }
            bail!("Stage '{stage}' command exited with {code}: {stderr}");
        }

        Ok(parse_output(&stdout))
    }
}

/// Interpret command stdout as a stage output value
fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

/// Run a command, feeding `stdin` and capturing stdout and stderr.
///
/// The three pipes are serviced concurrently so a chatty child cannot block
/// on a full pipe while we are still writing its input.
async fn run_command(
    mut cmd: TokioCommand,
    stdin: Vec<u8>,
) -> Result<(String, String, Option<i32>)> {
    let mut child = cmd.spawn().context("Failed to spawn stage process")?;

    let mut child_stdin = child.stdin.take().context("Failed to capture stdin")?;
    let mut child_stdout = child.stdout.take().context("Failed to capture stdout")?;
    let mut child_stderr = child.stderr.take().context("Failed to capture stderr")?;

    let stdin_handle = tokio::spawn(async move {
        match child_stdin.write_all(&stdin).await {
            // The child may exit without reading its input
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    });

    let stdout_handle = tokio::spawn(async move {
        let mut captured = String::new();
        child_stdout.read_to_string(&mut captured).await.map(|_| captured)
    });

    let stderr_handle = tokio::spawn(async move {
        let mut captured = String::new();
        child_stderr.read_to_string(&mut captured).await.map(|_| captured)
    });

    let status = child.wait().await.context("Failed waiting for process")?;
    stdin_handle
        .await
        .context("stdin writer panicked")?
        .context("Failed to write stage input")?;
    let stdout = stdout_handle
        .await
        .context("stdout reader panicked")?
        .context("Failed to read stdout")?;
    let stderr = stderr_handle
        .await
        .context("stderr reader panicked")?
        .context("Failed to read stderr")?;

    Ok((stdout, stderr, status.code()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sh(script: &str) -> CommandHandler {
        CommandHandler::new(StageCommand {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: BTreeMap::new(),
        })
    }

    #[test]
    fn test_parse_output_json() {
        assert_eq!(parse_output("{\"a\": 1}\n"), json!({"a": 1}));
    }

    #[test]
    fn test_parse_output_plain_text() {
        assert_eq!(parse_output("  hello world \n"), json!("hello world"));
    }

    #[test]
    fn test_parse_output_empty_is_null() {
        assert_eq!(parse_output("\n  "), Value::Null);
    }

    #[tokio::test]
    async fn test_fn_handler_passes_input() {
        let handler =
            FnHandler::new(|input: Value| async move { Ok::<_, anyhow::Error>(json!({"echo": input})) });
        let out = handler.handle(Stage::Plan, json!(7)).await.unwrap();
        assert_eq!(out, json!({"echo": 7}));
    }

    #[test]
    fn test_registry_covers_all() {
        let mut handlers = StageHandlers::new();
        assert!(!handlers.covers_all());

        for stage in Stage::ALL {
            handlers = handlers.with_fn(stage, |v| async move { Ok(v) });
        }
        assert!(handlers.covers_all());
        assert!(handlers.get(Stage::Refine).is_some());
    }

    #[test]
    fn test_registry_get_missing() {
        let handlers = StageHandlers::new().with_fn(Stage::Analyze, |v| async move { Ok(v) });
        assert!(handlers.get(Stage::Plan).is_none());
    }

    #[test]
    fn test_registry_from_cycle_file() {
        let file = CycleFile::parse(crate::testutil::VALID_CYCLE_FILE).unwrap();
        let handlers = StageHandlers::from_cycle_file(&file);
        assert!(handlers.covers_all());
    }

    #[tokio::test]
    async fn test_command_handler_round_trips_stdin() {
        let out = sh("cat")
            .handle(Stage::Analyze, json!({"task": "x"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"task": "x"}));
    }

    #[tokio::test]
    async fn test_command_handler_exposes_stage_name() {
        let out = sh("printf '%s' \"$AGENT_CYCLE_STAGE\"")
            .handle(Stage::SelectTools, json!({}))
            .await
            .unwrap();
        assert_eq!(out, json!("tool_select"));
    }

    #[tokio::test]
    async fn test_command_handler_ignores_unread_stdin() {
        let out = sh("echo done").handle(Stage::Plan, json!({})).await.unwrap();
        assert_eq!(out, json!("done"));
    }

    #[tokio::test]
    async fn test_command_handler_fails_on_nonzero_exit() {
        let err = sh("echo bad input >&2; exit 3")
            .handle(Stage::Execute, json!({}))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exited with 3"), "got: {msg}");
        assert!(msg.contains("bad input"), "got: {msg}");
    }

    #[tokio::test]
    async fn test_command_handler_spawn_failure() {
        let handler = CommandHandler::new(StageCommand {
            command: "/nonexistent/agent-cycle-stage".to_string(),
            args: vec![],
            env: BTreeMap::new(),
        });
        let err = handler.handle(Stage::Plan, json!({})).await.unwrap_err();
        assert!(format!("{err:?}").contains("Failed to spawn"));
    }

    #[tokio::test]
    async fn test_command_handler_passes_env() {
        let mut env = BTreeMap::new();
        env.insert("MODE".to_string(), "final".to_string());
        let handler = CommandHandler::new(StageCommand {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "printf '%s' \"$MODE\"".to_string()],
            env,
        });
        let out = handler.handle(Stage::Deliver, json!({})).await.unwrap();
        assert_eq!(out, json!("final"));
    }
}
