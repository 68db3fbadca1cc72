//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.focustrace.toml` files.

use crate::cli::{Args, OutputFormat};
use anyhow::{Context, Result};
use focus_trace::engine::{EngineOptions, ReparentWeight};
use focus_trace::report::RenderOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = ".focustrace.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "trace_report.md".to_string()
}

/// Engine and replay settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// What a reparent moves between ancestor chains.
    #[serde(default)]
    pub reparent_weight: ReparentWeight,

    /// Audit the forest after every replayed event, not just at the end.
    #[serde(default)]
    pub audit_each_event: bool,

    /// Abort the replay at the first rejected event.
    #[serde(default)]
    pub stop_on_error: bool,
}

impl EngineConfig {
    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            reparent_weight: self.reparent_weight,
        }
    }
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Output format.
    #[serde(default)]
    pub format: OutputFormat,

    /// Show estimates next to actual time.
    #[serde(default = "default_true")]
    pub include_estimates: bool,

    /// Show timers that are still running.
    #[serde(default = "default_true")]
    pub include_timers: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            include_estimates: true,
            include_timers: true,
        }
    }
}

impl ReportConfig {
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            include_estimates: self.include_estimates,
            include_timers: self.include_timers,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the working directory.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load configuration from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence, but only when given explicitly.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(format) = args.format {
            self.report.format = format;
        }
        if let Some(weight) = args.reparent_weight {
            self.engine.reparent_weight = weight.into();
        }

        // Flags only ever switch things on
        if args.audit_each_event {
            self.engine.audit_each_event = true;
        }
        if args.stop_on_error {
            self.engine.stop_on_error = true;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}
