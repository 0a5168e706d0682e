//! Agent Cycle - stage sequencer for agent invocations
//!
//! CLI entry point: runs one session described by a cycle file.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;

use agent_cycle::cycle::config::CycleFile;
use agent_cycle::cycle::runner::CycleRunner;

/// Stage sequencer for agent invocations
///
/// Runs an agent through the Analyze, Plan, SelectTools, Execute, Refine and
/// Deliver stages, one shell command per stage, until the iteration cap is
/// reached or a stage fails for good.
#[derive(Parser, Debug)]
#[command(name = "agent-cycle", version, about)]
struct Cli {
    /// Path to the cycle.toml configuration file
    #[arg(long, default_value = "cycle.toml")]
    config: PathBuf,

    /// Initial input for the first Analyze stage, as JSON
    #[arg(long)]
    input: Option<String>,

    /// Directory for log files (.cycle by default)
    #[arg(long, default_value = ".cycle")]
    log_dir: PathBuf,
}

/// Parse the `--input` argument, defaulting to an empty object.
fn parse_input(raw: Option<&str>) -> Result<Value> {
    raw.map_or_else(
        || Ok(Value::Object(serde_json::Map::new())),
        |text| serde_json::from_str(text).context("--input must be valid JSON"),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file = CycleFile::from_path(&cli.config)
        .with_context(|| format!("Failed to load config from '{}'", cli.config.display()))?;
    let input = parse_input(cli.input.as_deref())?;

    let runner = CycleRunner::new(file, &cli.log_dir)?;
    let summary = runner.run(input).await?;

    if let Some(output) = &summary.final_output {
        println!(
            "{}",
            serde_json::to_string_pretty(output).context("Failed to render final output")?
        );
    }

    if summary.succeeded() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_input_defaults_to_empty_object() {
        assert_eq!(parse_input(None).unwrap(), json!({}));
    }

    #[test]
    fn test_parse_input_json() {
        assert_eq!(
            parse_input(Some(r#"{"task": "summarize"}"#)).unwrap(),
            json!({"task": "summarize"})
        );
    }

    #[test]
    fn test_parse_input_rejects_invalid_json() {
        let err = parse_input(Some("{not json")).unwrap_err();
        assert!(err.to_string().contains("--input must be valid JSON"));
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["agent-cycle"]);
        assert_eq!(cli.config, PathBuf::from("cycle.toml"));
        assert_eq!(cli.log_dir, PathBuf::from(".cycle"));
        assert!(cli.input.is_none());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "agent-cycle",
            "--config",
            "agents/researcher.toml",
            "--input",
            "{}",
            "--log-dir",
            "/tmp/logs",
        ]);
        assert_eq!(cli.config, PathBuf::from("agents/researcher.toml"));
        assert_eq!(cli.input.as_deref(), Some("{}"));
        assert_eq!(cli.log_dir, PathBuf::from("/tmp/logs"));
    }
}
