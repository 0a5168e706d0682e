//! JSONL (JSON Lines) logging for step history
//!
//! Provides append-only logging of finished steps to `<log_dir>/log.jsonl`

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use crate::cycle::session::{Step, StepStatus};
use crate::cycle::stage::Stage;

/// Longest output summary kept in a log line
const SUMMARY_MAX_CHARS: usize = 120;

/// Record of a single finished step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRecord {
    /// Session the step belongs to
    pub session_id: String,
    /// Agent being driven
    pub agent_id: String,
    /// The iteration number (1-indexed)
    pub iteration: u32,
    /// Stage that ran
    pub stage: Stage,
    /// Final step status
    pub status: StepStatus,
    /// ISO 8601 timestamp of when the step finished
    pub timestamp: DateTime<Utc>,
    /// Handler wall-clock time in milliseconds
    pub duration_ms: u64,
    /// Error message for failed steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// One-line summary of the handler output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl StepRecord {
    /// Build a record from a finished step
    #[must_use]
    pub fn from_step(step: &Step, iteration: u32) -> Self {
        Self {
            session_id: step.session_id.clone(),
            agent_id: step.agent_id.clone(),
            iteration,
            stage: step.stage,
            status: step.status,
            timestamp: step.end_time.unwrap_or_else(Utc::now),
            duration_ms: step.duration_ms().unwrap_or(0),
            error: step.error().map(str::to_string),
            summary: step.output().map(|v| summarize_output(v, SUMMARY_MAX_CHARS)),
        }
    }
}

/// Render a stage output as a single line of at most `max_chars` characters.
///
/// Strings are shown without quotes; everything else as compact JSON.
#[must_use]
pub fn summarize_output(value: &Value, max_chars: usize) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if line.chars().count() > max_chars {
        let keep = max_chars.saturating_sub(3);
        format!("{}...", line.chars().take(keep).collect::<String>())
    } else {
        line
    }
}

/// JSONL logger for step history
///
/// Provides append-only logging to `<log_dir>/log.jsonl`.
/// Each line is a JSON object representing a single finished step.
pub struct JsonlLogger {
    log_path: PathBuf,
}

impl JsonlLogger {
    /// Create a new JSONL logger
    ///
    /// # Arguments
    /// * `log_dir` - Directory where log.jsonl will be stored (typically `.cycle`)
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be created
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

        Ok(Self {
            log_path: log_dir.join("log.jsonl"),
        })
    }

    /// Append a step record to the log
    pub fn append(&self, record: &StepRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open log file: {}", self.log_path.display()))?;

        let json = serde_json::to_string(record).context("Failed to serialize step record")?;

        writeln!(file, "{json}").context("Failed to write to log file")?;

        Ok(())
    }

    /// Read all step records from the log, in chronological order
    ///
    /// # Errors
    /// Returns an error if:
    /// - The log file cannot be read
    /// - Any line cannot be parsed as valid JSON
    pub fn read_all(&self) -> Result<Vec<StepRecord>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)
            .with_context(|| format!("Failed to read log file: {}", self.log_path.display()))?;

        let mut records = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let record: StepRecord = serde_json::from_str(line)
                .with_context(|| format!("Failed to parse line {} as JSON", line_num + 1))?;

            records.push(record);
        }

        Ok(records)
    }

    /// Get the path to the log file
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}
