//! leakguard CLI: leakage hygiene and run governance.
//!
//! ## Usage
//!
//! ```bash
//! # Parse target horizons and show the overlap window
//! leakguard horizon fwd_ret_60m fwd_ret_5d
//!
//! # Safe features for a target
//! leakguard filter --exclusions CONFIG/excluded_features.yaml \
//!                  --target fwd_ret_60m --columns-file columns.txt
//!
//! # Scan for day-or-longer lookback features
//! leakguard ghosts --columns ret_1d,rsi_14,vol_2880m
//!
//! # Compare a run with the previous one and persist it
//! leakguard compare --output-dir out --stage target_ranking \
//!                   --item fwd_ret_60m --metrics metrics.json
//!
//! # Evaluate cohort policies and patch the resolved config
//! leakguard decide --output-dir out --stage target_ranking \
//!                  --item fwd_ret_60m --resolved resolved.json --write-config next.json
//! ```
//!
//! ## Exit Codes
//! - 0: Passed (no leakage findings, reproducible, no level-2 decision)
//! - 1: Check failed (ghost features, divergent run, level-2 decision)
//! - 2: Error (missing files, invalid arguments, etc.)

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use leakguard_core::{ExclusionConfig, LeakageFilter, find_ghost_features, parse_target_horizon};
use leakguard_gates::{
    ConfigPatcher, DecisionEngine, GovernanceConfig, Metrics, ReproducibilityTracker,
    RunHistoryStore,
};

/// leakguard: leakage hygiene and run governance for training pipelines.
#[derive(Parser)]
#[command(name = "leakguard")]
#[command(version)]
#[command(about = "Leakage hygiene and adaptive run governance")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: text (default) or json
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Governance config (TOML); defaults apply when absent
    #[arg(long, global = true)]
    governance: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse target names into horizons
    Horizon {
        /// Target column names
        #[arg(required = true)]
        targets: Vec<String>,
    },

    /// Filter a column list down to the safe features for a target
    Filter {
        /// Exclusion config (YAML, TOML or JSON)
        #[arg(long, short = 'e')]
        exclusions: PathBuf,

        /// Target column; omit for target-agnostic filtering
        #[arg(long, short = 't')]
        target: Option<String>,

        #[command(flatten)]
        columns: ColumnArgs,
    },

    /// Flag features whose names imply a lookback of a day or more
    Ghosts {
        #[command(flatten)]
        columns: ColumnArgs,
    },

    /// Compare a run with the previous run of the same item, then persist it
    Compare {
        /// Directory holding the run history
        #[arg(long, short = 'o')]
        output_dir: PathBuf,

        #[arg(long, short = 's')]
        stage: String,

        #[arg(long, short = 'i')]
        item: String,

        /// JSON object of run metrics
        #[arg(long, short = 'm')]
        metrics: PathBuf,
    },

    /// Evaluate decision policies over the cohort and patch the config
    Decide {
        /// Directory holding the run history
        #[arg(long, short = 'o')]
        output_dir: PathBuf,

        #[arg(long, short = 's')]
        stage: String,

        #[arg(long, short = 'i')]
        item: String,

        /// Resolved pipeline config (JSON or TOML); empty config when absent
        #[arg(long, short = 'r')]
        resolved: Option<PathBuf>,

        /// Write the patched config here (JSON)
        #[arg(long, short = 'w')]
        write_config: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct ColumnArgs {
    /// Comma-separated column names
    #[arg(long, short = 'c', value_delimiter = ',')]
    columns: Vec<String>,

    /// File with one column name per line
    #[arg(long)]
    columns_file: Option<PathBuf>,
}

impl ColumnArgs {
    fn resolve(&self) -> Result<Vec<String>> {
        let mut columns = self.columns.clone();
        if let Some(path) = &self.columns_file {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read columns file: {:?}", path))?;
            columns.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            );
        }
        if columns.is_empty() {
            bail!("No columns given (use --columns or --columns-file)");
        }
        Ok(columns)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::level_filters::LevelFilter::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::from(0),
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let governance = match &cli.governance {
        Some(path) => GovernanceConfig::load(path)
            .with_context(|| format!("Failed to load governance config: {:?}", path))?,
        None => GovernanceConfig::default(),
    };

    match cli.command {
        Commands::Horizon { targets } => run_horizon(&targets, &governance, cli.format),
        Commands::Filter {
            exclusions,
            target,
            columns,
        } => run_filter(
            &exclusions,
            target.as_deref(),
            &columns.resolve()?,
            &governance,
            cli.format,
        ),
        Commands::Ghosts { columns } => run_ghosts(&columns.resolve()?, cli.format),
        Commands::Compare {
            output_dir,
            stage,
            item,
            metrics,
        } => run_compare(&output_dir, &stage, &item, &metrics, &governance, cli.format),
        Commands::Decide {
            output_dir,
            stage,
            item,
            resolved,
            write_config,
        } => run_decide(
            &output_dir,
            &stage,
            &item,
            resolved.as_deref(),
            write_config.as_deref(),
            &governance,
            cli.format,
        ),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_horizon(
    targets: &[String],
    governance: &GovernanceConfig,
    format: OutputFormat,
) -> Result<bool> {
    let band = governance.overlap;
    let rows: Vec<serde_json::Value> = targets
        .iter()
        .map(|target| {
            let horizon = parse_target_horizon(target);
            let window = horizon.map(|h| band.minute_window(h.minutes));
            serde_json::json!({
                "target": target,
                "horizon": horizon,
                "overlap_window_minutes": window.map(|w| [w.min, w.max]),
            })
        })
        .collect();

    match format {
        OutputFormat::Text => {
            for target in targets {
                match parse_target_horizon(target) {
                    Some(h) => {
                        let w = band.minute_window(h.minutes);
                        println!(
                            "{:<32} {:>8} ({} min), overlap [{}, {}]m",
                            target, h, h.minutes, w.min, w.max
                        );
                    }
                    None => println!("{:<32} {:>8}", target, "unknown"),
                }
            }
        }
        OutputFormat::Json => print_json(&rows)?,
    }
    Ok(true)
}

fn run_filter(
    exclusions: &Path,
    target: Option<&str>,
    columns: &[String],
    governance: &GovernanceConfig,
    format: OutputFormat,
) -> Result<bool> {
    let config = ExclusionConfig::load(exclusions)
        .with_context(|| format!("Failed to load exclusion config: {:?}", exclusions))?;
    let filter = LeakageFilter::new(&config).with_band(governance.overlap);

    let Some(target) = target else {
        let safe = filter.filter_agnostic(columns);
        match format {
            OutputFormat::Text => {
                println!("Safe features: {}/{}", safe.len(), columns.len());
                for col in &safe {
                    println!("  {}", col);
                }
            }
            OutputFormat::Json => print_json(&safe)?,
        }
        return Ok(true);
    };

    let report = filter.filter_with_report(columns, target);
    match format {
        OutputFormat::Text => {
            let horizon = report
                .horizon
                .map(|h| h.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!("[filter] target {} (horizon {})", report.target, horizon);
            println!(
                "  Total: {}, Safe: {}, Excluded by name: {}, Excluded by pattern: {}",
                report.total_columns,
                report.safe_count(),
                report.excluded_by_name.len(),
                report.excluded_by_pattern.len()
            );
            if report.target_column_present {
                println!("  Target column dropped");
            }
            println!("\nSafe features:");
            for col in &report.safe_features {
                println!("  {}", col);
            }
        }
        OutputFormat::Json => print_json(&report)?,
    }
    Ok(true)
}

fn run_ghosts(columns: &[String], format: OutputFormat) -> Result<bool> {
    let ghosts = find_ghost_features(columns);
    match format {
        OutputFormat::Text => {
            if ghosts.is_empty() {
                println!("No day-or-longer lookback features found");
            } else {
                println!("Ghost features ({}):", ghosts.len());
                for g in &ghosts {
                    println!("  - {} ({} min): {}", g.name, g.lookback_minutes, g.reason);
                }
            }
        }
        OutputFormat::Json => print_json(&ghosts)?,
    }
    Ok(ghosts.is_empty())
}

fn run_compare(
    output_dir: &Path,
    stage: &str,
    item: &str,
    metrics_path: &Path,
    governance: &GovernanceConfig,
    format: OutputFormat,
) -> Result<bool> {
    let content = fs::read_to_string(metrics_path)
        .with_context(|| format!("Failed to read metrics: {:?}", metrics_path))?;
    let metrics: Metrics = serde_json::from_str(&content)
        .with_context(|| format!("Metrics must be a flat JSON object: {:?}", metrics_path))?;

    let store = RunHistoryStore::with_config(output_dir, &governance.history);
    let tracker = ReproducibilityTracker::new(store, governance.reproducibility);
    let report = tracker.compare(stage, item, &metrics, None);

    match format {
        OutputFormat::Text => {
            println!("[reproducibility] {}:{} {}", stage, item, report.status);
            if let (Some(prev), Some(diffs)) = (&report.previous, &report.diffs) {
                println!(
                    "  {}: {:.6} -> {:.6} (diff {:.6}, {:+.2}%)",
                    report.metric_name,
                    prev.mean_score,
                    report.current.mean_score,
                    diffs.mean_score,
                    diffs.mean_score_pct
                );
                println!(
                    "  Composite: {:.6} -> {:.6} (diff {:.6}, {:+.2}%)",
                    prev.composite_score,
                    report.current.composite_score,
                    diffs.composite_score,
                    diffs.composite_score_pct
                );
                println!(
                    "  Importance diff: {:.6}, Std diff: {:.6}",
                    diffs.mean_importance, diffs.std_score
                );
            }
            if !report.persisted {
                println!("  Warning: run was not persisted");
            }
        }
        OutputFormat::Json => print_json(&report)?,
    }
    Ok(!report.is_divergent())
}

fn load_resolved(path: Option<&Path>) -> Result<serde_json::Value> {
    let Some(path) = path else {
        return Ok(serde_json::Value::Object(Default::default()));
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read resolved config: {:?}", path))?;
    let value = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {:?}", path))?,
        _ => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON config: {:?}", path))?,
    };
    Ok(value)
}

fn run_decide(
    output_dir: &Path,
    stage: &str,
    item: &str,
    resolved: Option<&Path>,
    write_config: Option<&Path>,
    governance: &GovernanceConfig,
    format: OutputFormat,
) -> Result<bool> {
    let resolved = load_resolved(resolved)?;
    let store = RunHistoryStore::with_config(output_dir, &governance.history);
    let decision = DecisionEngine::new().evaluate_stored(&store, stage, item);
    let patcher = ConfigPatcher::new(governance.routing, governance.features);
    let outcome = patcher.apply(&resolved, &decision)?;

    if let Some(path) = write_config {
        let bytes = serde_json::to_vec_pretty(&outcome.config)?;
        fs::write(path, bytes).with_context(|| format!("Failed to write config: {:?}", path))?;
    }

    match format {
        OutputFormat::Text => {
            println!(
                "[decision] {} ({} runs) level {}",
                decision.cohort_key, decision.cohort_size, decision.decision_level
            );
            for r in &decision.policy_results {
                let state = if r.triggered { "TRIGGERED" } else { "ok" };
                match &r.error {
                    Some(err) => println!("  - {:<28} {} (error: {})", r.policy.name(), state, err),
                    None => println!("  - {:<28} {}", r.policy.name(), state),
                }
            }
            if outcome.patch.is_empty() {
                println!("\nNo config changes");
            } else {
                println!("\nPatch:");
                for (path, value) in &outcome.patch.0 {
                    println!("  {} = {}", path, value);
                }
            }
            println!("\nDigest: {}", decision.decision_digest);
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "decision": decision,
            "patch": outcome.patch,
        }))?,
    }
    Ok(decision.decision_level < 2)
}
