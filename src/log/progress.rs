//! Progress file writer for external observability
//!
//! Manages `<log_dir>/progress.json`, a single JSON file reflecting the current
//! state of a running session. External tools can poll this file to monitor
//! progress without parsing JSONL or terminal output.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cycle::session::{Session, SessionStatus};
use crate::cycle::stage::Stage;

/// Snapshot of a session, written to `progress.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
    /// Session being tracked
    pub session_id: String,
    /// Agent name
    pub agent_name: String,
    /// When the session started (ISO 8601)
    pub started_at: DateTime<Utc>,
    /// When this snapshot was taken
    pub updated_at: DateTime<Utc>,
    /// Session status
    pub status: SessionStatus,
    /// Stage of the most recent step (None before the first step)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,
    /// Current iteration number (1-indexed)
    pub current_iteration: u32,
    /// Iteration cap for this session
    pub max_iterations: u32,
    /// Attempts per stage name
    pub stage_attempts: BTreeMap<String, u32>,
    /// Total steps recorded
    pub total_steps: usize,
    /// Error from the most recent failed step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SessionProgress {
    /// Build a snapshot from the current session state
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        let mut stage_attempts = BTreeMap::new();
        for step in &session.steps {
            *stage_attempts
                .entry(step.stage.as_str().to_string())
                .or_insert(0) += 1;
        }

        let last_error = session
            .steps
            .iter()
            .rev()
            .find_map(|s| s.error())
            .map(str::to_string);

        Self {
            session_id: session.id.clone(),
            agent_name: session.metadata.agent_name.clone(),
            started_at: session.start_time,
            updated_at: Utc::now(),
            status: session.status,
            current_stage: session.last_step().map(|s| s.stage),
            current_iteration: session
                .iteration_count
                .saturating_add(1)
                .min(session.config.max_iterations),
            max_iterations: session.config.max_iterations,
            stage_attempts,
            total_steps: session.steps.len(),
            last_error,
        }
    }
}

/// Manages reading and writing `progress.json`
pub struct ProgressWriter {
    path: PathBuf,
}

impl ProgressWriter {
    /// Create a new `ProgressWriter` targeting `<log_dir>/progress.json`.
    pub fn new(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
        Ok(Self {
            path: log_dir.join("progress.json"),
        })
    }

    /// Atomically write progress to the file (write to temp, then rename).
    pub fn write(&self, progress: &SessionProgress) -> Result<()> {
        let json =
            serde_json::to_string_pretty(progress).context("Failed to serialize progress")?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json.as_bytes())
            .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename {} -> {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }

    /// Read the current progress from the file, or `None` if it doesn't exist.
    pub fn read(&self) -> Result<Option<SessionProgress>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let progress: SessionProgress =
            serde_json::from_str(&content).context("Failed to parse progress.json")?;
        Ok(Some(progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::config::CycleConfig;
    use crate::cycle::sequencer::CycleSequencer;
    use crate::testutil::{echo_handlers, test_agent};
    use serde_json::json;
    use tempfile::TempDir;

    async fn session_after(steps: usize, config: CycleConfig) -> Session {
        let sequencer = CycleSequencer::new();
        let id = sequencer.start_cycle(&test_agent(), config, json!({})).await;
        let handlers = echo_handlers()
            .with_fn(Stage::Plan, |_| async { Err(anyhow::anyhow!("plan rejected")) });
        for _ in 0..steps {
            sequencer.execute_next_stage(&id, &handlers).await.unwrap();
        }
        sequencer.get_session(&id).await.unwrap()
    }

    fn retrying() -> CycleConfig {
        CycleConfig {
            auto_retry: true,
            retry_count: 5,
            ..CycleConfig::default()
        }
    }

    #[tokio::test]
    async fn test_from_session_counts_attempts() {
        let session = session_after(3, retrying()).await;
        let progress = SessionProgress::from_session(&session);

        assert_eq!(progress.total_steps, 3);
        assert_eq!(progress.stage_attempts.get("analyze"), Some(&1));
        assert_eq!(progress.stage_attempts.get("plan"), Some(&2));
        assert_eq!(progress.current_stage, Some(Stage::Plan));
        assert_eq!(progress.last_error.as_deref(), Some("plan rejected"));
        assert_eq!(progress.status, SessionStatus::Running);
        assert_eq!(progress.current_iteration, 1);
        assert_eq!(progress.max_iterations, 5);
    }

    #[tokio::test]
    async fn test_from_fresh_session() {
        let session = session_after(0, CycleConfig::default()).await;
        let progress = SessionProgress::from_session(&session);

        assert_eq!(progress.status, SessionStatus::Pending);
        assert!(progress.current_stage.is_none());
        assert!(progress.stage_attempts.is_empty());
        assert!(progress.last_error.is_none());
    }

    #[tokio::test]
    async fn test_progress_serializes_to_expected_json() {
        let session = session_after(2, retrying()).await;
        let json = serde_json::to_value(SessionProgress::from_session(&session)).unwrap();

        assert_eq!(json["status"], "running");
        assert_eq!(json["current_stage"], "plan");
        assert_eq!(json["stage_attempts"]["analyze"], 1);
        assert_eq!(json["agent_name"], "researcher");
        assert!(json["started_at"].is_string());
    }

    #[tokio::test]
    async fn test_progress_writer_round_trip() {
        let tmp = TempDir::new().unwrap();
        let writer = ProgressWriter::new(tmp.path()).unwrap();
        let progress = SessionProgress::from_session(&session_after(1, retrying()).await);

        writer.write(&progress).unwrap();

        let read_back = writer.read().unwrap().unwrap();
        assert_eq!(read_back.session_id, progress.session_id);
        assert_eq!(read_back.stage_attempts, progress.stage_attempts);
        assert!(!tmp.path().join("progress.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_progress_writer_overwrites_on_update() {
        let tmp = TempDir::new().unwrap();
        let writer = ProgressWriter::new(tmp.path()).unwrap();

        let mut progress = SessionProgress::from_session(&session_after(1, retrying()).await);
        writer.write(&progress).unwrap();

        progress.total_steps = 9;
        progress.current_stage = Some(Stage::Refine);
        writer.write(&progress).unwrap();

        let read_back = writer.read().unwrap().unwrap();
        assert_eq!(read_back.total_steps, 9);
        assert_eq!(read_back.current_stage, Some(Stage::Refine));
    }

    #[test]
    fn test_progress_writer_read_returns_none_when_missing() {
        let tmp = TempDir::new().unwrap();
        let writer = ProgressWriter::new(tmp.path()).unwrap();

        assert!(writer.read().unwrap().is_none());
    }

    #[test]
    fn test_last_error_omitted_when_none() {
        let json = r#"{
            "session_id": "s",
            "agent_name": "researcher",
            "started_at": "2026-01-15T10:00:00Z",
            "updated_at": "2026-01-15T10:00:05Z",
            "status": "pending",
            "current_iteration": 1,
            "max_iterations": 5,
            "stage_attempts": {},
            "total_steps": 0
        }"#;
        let progress: SessionProgress = serde_json::from_str(json).unwrap();
        assert!(progress.last_error.is_none());
        assert!(progress.current_stage.is_none());

        let out = serde_json::to_string(&progress).unwrap();
        assert!(!out.contains("last_error"));
    }
}
