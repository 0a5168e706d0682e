//! Session runner
//!
//! Drives one session from start to finish: starts the cycle, calls the
//! sequencer until it has nothing left to run, and reports every finished step
//! to the terminal, the JSONL history and the progress file.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::cli::display::StepDisplay;
use crate::cycle::config::CycleFile;
use crate::cycle::handler::StageHandlers;
use crate::cycle::sequencer::CycleSequencer;
use crate::cycle::session::{Session, SessionStatus, StepStatus};
use crate::cycle::stage::Stage;
use crate::log::jsonl::{JsonlLogger, StepRecord};
use crate::log::progress::{ProgressWriter, SessionProgress};

/// Outcome of a finished run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Session that was run
    pub session_id: String,
    /// Final session status
    pub status: SessionStatus,
    /// Completed iterations
    pub iterations: u32,
    /// Steps recorded, including failed attempts
    pub total_steps: usize,
    /// Failed attempts
    pub failed_steps: usize,
    /// Required stages that never completed
    pub missing_required_stages: Vec<Stage>,
    /// Output of the last completed Deliver stage
    pub final_output: Option<Value>,
}

impl RunSummary {
    /// Summarize a finished session
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status,
            iterations: session.iteration_count,
            total_steps: session.steps.len(),
            failed_steps: session
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Failed)
                .count(),
            missing_required_stages: session.missing_required_stages(),
            final_output: session.latest_output(Stage::Deliver).cloned(),
        }
    }

    /// Whether the session completed normally
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// Runs sessions described by a cycle file
pub struct CycleRunner {
    file: CycleFile,
    handlers: StageHandlers,
    sequencer: CycleSequencer,
    logger: JsonlLogger,
    progress: ProgressWriter,
    display: StepDisplay,
}

impl CycleRunner {
    /// Create a runner whose stages run the commands in `file`
    pub fn new(file: CycleFile, log_dir: &Path) -> Result<Self> {
        let handlers = StageHandlers::from_cycle_file(&file);
        Self::with_handlers(file, handlers, log_dir)
    }

    /// Create a runner with caller-supplied stage handlers
    pub fn with_handlers(file: CycleFile, handlers: StageHandlers, log_dir: &Path) -> Result<Self> {
        let logger = JsonlLogger::new(log_dir).context("Failed to initialize JSONL logger")?;
        let progress =
            ProgressWriter::new(log_dir).context("Failed to initialize progress writer")?;
        let display = StepDisplay::new(&file.agent.name);
        let sequencer = CycleSequencer::with_store_config(file.store.clone());

        Ok(Self {
            file,
            handlers,
            sequencer,
            logger,
            progress,
            display,
        })
    }

    /// The sequencer holding this runner's sessions
    #[must_use]
    pub const fn sequencer(&self) -> &CycleSequencer {
        &self.sequencer
    }

    /// Run a new session to completion
    pub async fn run(&self, initial_input: Value) -> Result<RunSummary> {
        let session_id = self
            .sequencer
            .start_cycle(&self.file.agent, self.file.cycle.clone(), initial_input)
            .await;
        self.display
            .print_header(&session_id, self.file.cycle.max_iterations);
        self.write_progress(&session_id).await?;

        while let Some(step) = self
            .sequencer
            .execute_next_stage(&session_id, &self.handlers)
            .await
            .with_context(|| format!("Failed to advance session {session_id}"))?
        {
            let session = self.snapshot(&session_id).await?;
            let iteration = session.iteration_of(session.steps.len().saturating_sub(1));

            self.display.render_step(&step, iteration);
            self.logger
                .append(&StepRecord::from_step(&step, iteration))
                .context("Failed to write to JSONL log")?;
            self.progress
                .write(&SessionProgress::from_session(&session))
                .context("Failed to write progress file")?;
        }

        self.write_progress(&session_id).await?;
        let session = self.snapshot(&session_id).await?;

        let summary = RunSummary::from_session(&session);
        self.display.render_summary(&summary);
        Ok(summary)
    }

    async fn snapshot(&self, session_id: &str) -> Result<Session> {
        self.sequencer
            .get_session(session_id)
            .await
            .with_context(|| format!("Session {session_id} disappeared while running"))
    }

    async fn write_progress(&self, session_id: &str) -> Result<()> {
        let session = self.snapshot(session_id).await?;
        self.progress
            .write(&SessionProgress::from_session(&session))
            .context("Failed to write progress file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{echo_handlers, VALID_CYCLE_FILE};
    use serde_json::json;
    use tempfile::TempDir;

    fn test_file() -> CycleFile {
        CycleFile::parse(VALID_CYCLE_FILE).unwrap()
    }

    #[tokio::test]
    async fn test_run_completes_all_iterations() {
        let tmp = TempDir::new().unwrap();
        let runner =
            CycleRunner::with_handlers(test_file(), echo_handlers(), tmp.path()).unwrap();

        let summary = runner.run(json!({"task": "t"})).await.unwrap();

        assert!(summary.succeeded());
        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.total_steps, 12);
        assert_eq!(summary.failed_steps, 0);
        assert!(summary.missing_required_stages.is_empty());
        assert_eq!(summary.final_output, Some(json!({"stage": "deliver"})));
    }

    #[tokio::test]
    async fn test_run_logs_every_step_with_iteration() {
        let tmp = TempDir::new().unwrap();
        let runner =
            CycleRunner::with_handlers(test_file(), echo_handlers(), tmp.path()).unwrap();

        runner.run(json!({})).await.unwrap();

        let records = JsonlLogger::new(tmp.path()).unwrap().read_all().unwrap();
        assert_eq!(records.len(), 12);
        assert_eq!(records[0].stage, Stage::Analyze);
        assert_eq!(records[0].iteration, 1);
        assert_eq!(records[5].stage, Stage::Deliver);
        assert_eq!(records[5].iteration, 1);
        assert_eq!(records[6].stage, Stage::Analyze);
        assert_eq!(records[6].iteration, 2);
    }

    #[tokio::test]
    async fn test_run_leaves_final_progress() {
        let tmp = TempDir::new().unwrap();
        let runner =
            CycleRunner::with_handlers(test_file(), echo_handlers(), tmp.path()).unwrap();

        let summary = runner.run(json!({})).await.unwrap();

        let progress = ProgressWriter::new(tmp.path())
            .unwrap()
            .read()
            .unwrap()
            .unwrap();
        assert_eq!(progress.session_id, summary.session_id);
        assert_eq!(progress.status, SessionStatus::Completed);
        assert_eq!(progress.total_steps, 12);
    }

    #[tokio::test]
    async fn test_run_reports_failure() {
        let tmp = TempDir::new().unwrap();
        let handlers = echo_handlers()
            .with_fn(Stage::Refine, |_| async { Err(anyhow::anyhow!("draft rejected")) });
        let runner = CycleRunner::with_handlers(test_file(), handlers, tmp.path()).unwrap();

        let summary = runner.run(json!({})).await.unwrap();

        assert!(!summary.succeeded());
        assert_eq!(summary.status, SessionStatus::Failed);
        assert_eq!(summary.total_steps, 5);
        assert_eq!(summary.failed_steps, 1);
        assert_eq!(summary.missing_required_stages, vec![Stage::Deliver]);
        assert!(summary.final_output.is_none());
    }

    #[tokio::test]
    async fn test_run_propagates_missing_handler() {
        let tmp = TempDir::new().unwrap();
        let runner =
            CycleRunner::with_handlers(test_file(), StageHandlers::new(), tmp.path()).unwrap();

        let err = runner.run(json!({})).await.unwrap_err();
        assert!(format!("{err:?}").contains("No handler registered for stage 'analyze'"));
    }

    #[tokio::test]
    async fn test_run_with_command_handlers() {
        let tmp = TempDir::new().unwrap();
        let runner = CycleRunner::new(test_file(), tmp.path()).unwrap();

        let summary = runner.run(json!({"task": "echo me"})).await.unwrap();

        assert!(summary.succeeded());
        assert_eq!(summary.final_output, Some(json!({"task": "echo me"})));
    }

    #[tokio::test]
    async fn test_sessions_stay_inspectable_after_run() {
        let tmp = TempDir::new().unwrap();
        let runner =
            CycleRunner::with_handlers(test_file(), echo_handlers(), tmp.path()).unwrap();

        let summary = runner.run(json!({})).await.unwrap();
        let session = runner
            .sequencer()
            .get_session(&summary.session_id)
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }
}
