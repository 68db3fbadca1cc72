//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use focus_trace::engine::ReparentWeight;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// focus-trace - replay task lifecycle events through the trace engine
///
/// Reads a JSON script of task events (create, delete, move, status
/// changes, manual corrections), applies them to an in-memory trace forest
/// and writes a report of the resulting time totals.
///
/// Examples:
///   focus-trace --events events.json
///   focus-trace --events events.json --format json -o report.json
///   focus-trace --events events.json --audit-each-event --fail-on-violation
///   focus-trace --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Event script to replay (JSON)
    #[arg(short, long, value_name = "FILE", required_unless_present = "init_config")]
    pub events: Option<PathBuf>,

    /// Output file path for the report
    ///
    /// Defaults to the config file value, or trace_report.md
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .focustrace.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// What moves with a reparented node
    ///
    /// exclusive: only the node's own time; subtree: its whole total
    #[arg(long, value_name = "WEIGHT")]
    pub reparent_weight: Option<WeightArg>,

    /// Audit the forest after every event instead of only at the end
    #[arg(long)]
    pub audit_each_event: bool,

    /// Stop at the first event the engine rejects
    #[arg(long)]
    pub stop_on_error: bool,

    /// Exit with code 2 when the final audit finds violations
    #[arg(long)]
    pub fail_on_violation: bool,

    /// Parse the script and list its events without applying them
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .focustrace.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Reparent weight as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WeightArg {
    Exclusive,
    Subtree,
}

impl From<WeightArg> for ReparentWeight {
    fn from(arg: WeightArg) -> Self {
        match arg {
            WeightArg::Exclusive => ReparentWeight::Exclusive,
            WeightArg::Subtree => ReparentWeight::Subtree,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        match self.events {
            Some(ref path) if !path.is_file() => Err(format!(
                "Event script does not exist: {}",
                path.display()
            )),
            Some(_) => Ok(()),
            None => Err("An event script is required (--events)".to_string()),
        }
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            events: Some(PathBuf::from("Cargo.toml")),
            output: None,
            format: None,
            config: None,
            verbose: false,
            quiet: false,
            reparent_weight: None,
            audit_each_event: false,
            stop_on_error: false,
            fail_on_violation: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from([
            "focus-trace",
            "-e",
            "events.json",
            "-o",
            "out.md",
            "--fail-on-violation",
        ]);
        assert_eq!(args.events, Some(PathBuf::from("events.json")));
        assert_eq!(args.output, Some(PathBuf::from("out.md")));
        assert!(args.fail_on_violation);
        assert!(args.format.is_none());
    }

    #[test]
    fn test_init_config_needs_no_script() {
        let args = Args::try_parse_from(["focus-trace", "--init-config"]).unwrap();
        assert!(args.events.is_none());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_missing_script() {
        let mut args = make_args();
        args.events = Some(PathBuf::from("definitely/not/here.json"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_weight_conversion() {
        assert_eq!(
            ReparentWeight::from(WeightArg::Subtree),
            ReparentWeight::Subtree
        );
    }
}
