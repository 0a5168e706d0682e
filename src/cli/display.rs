//! Rich CLI display for session execution
//!
//! Renders steps and the final session summary as human-readable terminal
//! output. All output goes to stderr so stdout remains clean for piping.

use colored::Colorize;

use crate::cycle::runner::RunSummary;
use crate::cycle::session::{SessionStatus, Step, StepStatus};
use crate::cycle::stage::Stage;
use crate::log::jsonl::summarize_output;

/// Longest output summary shown per step
const STEP_SUMMARY_CHARS: usize = 100;

/// Display handler for session execution output
pub struct StepDisplay {
    agent_name: String,
}

impl StepDisplay {
    /// Create a new display handler for the given agent
    #[must_use]
    pub fn new(agent_name: &str) -> Self {
        Self {
            agent_name: agent_name.to_string(),
        }
    }

    /// Print the session header before the first step
    pub fn print_header(&self, session_id: &str, max_iterations: u32) {
        eprintln!(
            "\n{} {}",
            "===".bold().cyan(),
            format!("Agent: {}", self.agent_name).bold().cyan()
        );
        eprintln!(
            "  {} {session_id} | max {max_iterations} iteration(s)",
            "Session:".dimmed()
        );
        eprintln!("{}", "─".repeat(50).dimmed());
    }

    /// Render one finished step
    pub fn render_step(&self, step: &Step, iteration: u32) {
        let marker = match step.status {
            StepStatus::Completed => "✓".green().bold(),
            StepStatus::Failed => "✗".red().bold(),
            StepStatus::Pending | StepStatus::Running => "…".yellow(),
        };
        let duration = step
            .duration_ms()
            .map_or_else(String::new, |ms| format!(" ({})", format_duration(ms)));

        eprintln!(
            "  {marker} {} {}{}",
            format!("[{iteration}]").dimmed(),
            step.stage.as_str().bold(),
            duration.dimmed()
        );

        if let Some(error) = step.error() {
            eprintln!("      {}", error.red());
        } else if let Some(output) = step.output() {
            let summary = summarize_output(output, STEP_SUMMARY_CHARS);
            if !summary.is_empty() {
                eprintln!("      {}", summary.dimmed());
            }
        }
    }

    /// Render the post-session summary
    pub fn render_summary(&self, summary: &RunSummary) {
        eprintln!("{}", "─".repeat(50).dimmed());

        let status = match summary.status {
            SessionStatus::Completed => "COMPLETED".green().bold().to_string(),
            SessionStatus::Failed => "FAILED".red().bold().to_string(),
            other => format!("{other:?}").to_uppercase().yellow().bold().to_string(),
        };
        eprintln!("  {} {}", status, self.agent_name.bold());

        eprintln!(
            "  {} {} iteration(s) | {} step(s) | {} failed",
            "Stats:".dimmed(),
            summary.iterations,
            summary.total_steps,
            summary.failed_steps
        );

        if !summary.missing_required_stages.is_empty() {
            let names: Vec<&str> = summary
                .missing_required_stages
                .iter()
                .copied()
                .map(Stage::as_str)
                .collect();
            eprintln!(
                "  {} required stage(s) never completed: {}",
                "⚠".yellow().bold(),
                names.join(", ")
            );
        }

        eprintln!();
    }
}

/// Format milliseconds as `850ms`, `2.4s` or `3m 05s`
fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{}.{}s", ms / 1_000, (ms % 1_000) / 100)
    } else {
        let secs = ms / 1_000;
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}
