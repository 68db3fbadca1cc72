//! focus-trace - replay task events through the trace engine
//!
//! A CLI that reads a JSON script of task lifecycle events, applies them to
//! an in-memory trace forest and writes a Markdown or JSON report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (bad config, unreadable script, replay stopped on error)
//!   2 - Final audit found violations and --fail-on-violation was set

mod cli;
mod config;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use focus_trace::analysis;
use focus_trace::events::{dispatch, EventScript, Outcome};
use focus_trace::models::{format_duration, ReportMetadata};
use focus_trace::report;
use focus_trace::{MemoryStore, TraceService};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args)?;

    info!("focus-trace v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_replay(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Replay failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .focustrace.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    Ok(())
}

/// Initialize logging. `RUST_LOG` wins over the verbosity flags when set.
fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(args.log_level()).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Replay the script and write the report. Returns the exit code.
async fn run_replay(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let script_path = args
        .events
        .clone()
        .context("An event script is required (--events)")?;
    let script = EventScript::load(&script_path)?;
    info!(
        "Loaded {} events from {}",
        script.events.len(),
        script_path.display()
    );

    if args.dry_run {
        return Ok(handle_dry_run(&script));
    }

    let service = TraceService::with_options(MemoryStore::new(), config.engine.options());

    println!("▶️  Replaying {} events...", script.events.len());

    let mut applied = 0;
    let mut failures = Vec::new();
    let mut stopped_early = false;

    for (index, event) in script.events.iter().enumerate() {
        let position = index + 1;

        let result = dispatch(&service, event).await;
        if config.general.verbose {
            let mark = match &result {
                Ok(Outcome::Applied) => "✓",
                Ok(Outcome::Skipped) => "·",
                Err(_) => "✗",
            };
            println!("   {} #{} {}", mark, position, event);
        }

        match result {
            Ok(Outcome::Applied) => applied += 1,
            Ok(Outcome::Skipped) => debug!("Event #{} ({}) skipped", position, event),
            Err(e) => {
                if e.is_invariant_violation() {
                    error!("Defect while replaying event #{}: {}", position, e);
                }
                failures.push(format!("#{} {}: {}", position, event, e));

                if config.engine.stop_on_error {
                    warn!("Stopping replay at event #{}", position);
                    stopped_early = true;
                    break;
                }
            }
        }

        if config.engine.audit_each_event {
            let audit = analysis::audit(&service.store().snapshot().await);
            for violation in &audit.violations {
                warn!("After event #{}: {}", position, violation.describe());
            }
        }
    }

    let traces = service.store().snapshot().await;

    let metadata = ReportMetadata {
        script: script_path.display().to_string(),
        generated_at: Utc::now(),
        events_applied: applied,
        events_failed: failures.len(),
        duration_seconds: start_time.elapsed().as_secs_f64(),
    };
    let report = report::build_report(metadata, &traces, failures);

    let output = match config.report.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => {
            report::generate_markdown_report(&report, config.report.render_options())
        }
    };

    let output_path = PathBuf::from(&config.general.output);
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    // Print summary
    println!("\n📊 Replay Summary:");
    println!("   Events applied: {}", report.metadata.events_applied);
    println!("   Events rejected: {}", report.metadata.events_failed);
    println!(
        "   Traces: {} in {} trees",
        report.audit.node_count, report.audit.root_count
    );
    println!(
        "   Total actual: {}",
        format_duration(report.audit.total_actual)
    );
    println!("   Violations: {}", report.audit.violations.len());
    println!("\n✅ Report saved to: {}", output_path.display());

    if stopped_early {
        eprintln!("\n⛔ Replay stopped at the first rejected event.");
        return Ok(1);
    }

    if args.fail_on_violation && !report.audit.is_clean() {
        eprintln!(
            "\n⛔ Audit found {} violations. Failing (exit code 2).",
            report.audit.violations.len()
        );
        return Ok(2);
    }

    Ok(0)
}

/// Handle --dry-run: list the script's events, apply nothing.
fn handle_dry_run(script: &EventScript) -> i32 {
    println!("\n🔍 Dry run: {} events (nothing applied)\n", script.events.len());

    for (index, event) in script.events.iter().enumerate() {
        println!("   {:>4}. {}", index + 1, event);
    }

    println!("\n✅ Dry run complete.");
    0
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}
