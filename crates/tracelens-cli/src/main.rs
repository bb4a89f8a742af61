//! tracelens - compare distributed traces
//!
//! Loads traces exported from Jaeger (or the dashboard) and compares a focal
//! trace with similar traces, with every other trace, and with backend
//! response-time statistics.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracelens_core::config::{ConfigLoader, TracelensConfig};
use tracelens_core::format::{format_delta, format_duration, from_now, round_to};
use tracelens_core::stats::build_stats_queries;
use tracelens_core::trace::parse_traces;
use tracelens_core::{Matrix, StatsLookup, Trace};
use tracelens_correlate::comparison::{ALL_ROW, FULL_DURATION_COLUMN, SIMILAR_ROW, SPANS_AVERAGE_COLUMN};
use tracelens_correlate::{
    build_comparison, compare_span_with_stats, reduce_metrics_stats, ComparisonConfig,
    SimilarityConfig,
};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "tracelens")]
#[command(version)]
#[command(about = "Compare distributed traces with similar traces and backend telemetry", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format (json, text)
    #[arg(short, long, default_value = "text", global = true)]
    format: String,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "TRACELENS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a trace with similar traces and with all others
    Compare {
        /// Traces file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Focal trace ID
        #[arg(short, long)]
        trace_id: String,

        /// Similarity threshold (overrides config)
        #[arg(long)]
        threshold: Option<f64>,

        /// Jaeger UI base URL for comparison links (overrides config)
        #[arg(long)]
        jaeger_url: Option<String>,
    },

    /// Score the similarity of a trace with every other trace
    Similar {
        /// Traces file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Focal trace ID
        #[arg(short, long)]
        trace_id: String,

        /// Similarity threshold (overrides config)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Reduce backend stats over the proxy spans of a trace
    Stats {
        /// Traces file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Focal trace ID
        #[arg(short, long)]
        trace_id: String,

        /// Stats file (JSON object: stats key -> stats)
        #[arg(short, long)]
        stats: PathBuf,

        /// Intervals (overrides config)
        #[arg(long)]
        interval: Option<Vec<String>>,

        /// Also compare each proxy span with its stats
        #[arg(long)]
        spans: bool,
    },

    /// List the stats queries needed for a trace
    Queries {
        /// Traces file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Focal trace ID
        #[arg(short, long)]
        trace_id: String,

        /// Intervals (overrides config)
        #[arg(long)]
        interval: Option<Vec<String>>,
    },

    /// Print the effective configuration
    Config {
        /// Also write it to this file
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config loading logs before the configured level is known
    let bootstrap = build_subscriber(verbosity_level(cli.verbose).unwrap_or(Level::WARN));
    let config = tracing::subscriber::with_default(bootstrap, || {
        load_config(cli.config.clone())
    })?;

    // Setup logging - CLI verbose flag takes precedence, then config, then default
    let log_level = verbosity_level(cli.verbose)
        .unwrap_or_else(|| config_level(&config.general.log_level));
    tracing::subscriber::set_global_default(build_subscriber(log_level))?;

    let json = match cli.format.as_str() {
        "json" => true,
        "text" => false,
        other => bail!("Unknown output format: {} (expected json or text)", other),
    };

    match cli.command {
        Commands::Compare {
            input,
            trace_id,
            threshold,
            jaeger_url,
        } => {
            let merged = merge_compare_config(&config, threshold, jaeger_url);
            compare_command(&input, &trace_id, &merged, json).await
        }
        Commands::Similar {
            input,
            trace_id,
            threshold,
        } => {
            let merged = merge_compare_config(&config, threshold, None);
            similar_command(&input, &trace_id, &merged.similarity, json).await
        }
        Commands::Stats {
            input,
            trace_id,
            stats,
            interval,
            spans,
        } => {
            let intervals = interval.unwrap_or_else(|| config.stats.intervals.clone());
            stats_command(&input, &trace_id, &stats, &intervals, spans, json).await
        }
        Commands::Queries {
            input,
            trace_id,
            interval,
        } => {
            let intervals = interval.unwrap_or_else(|| config.stats.intervals.clone());
            queries_command(&input, &trace_id, &intervals, &config.stats.quantiles, json).await
        }
        Commands::Config { write } => config_command(&config, write.as_deref(), json),
    }
}

fn verbosity_level(verbose: u8) -> Option<Level> {
    match verbose {
        0 => None,
        1 => Some(Level::INFO),
        2 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

fn config_level(log_level: &str) -> Level {
    match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    }
}

fn build_subscriber(level: Level) -> FmtSubscriber<
    tracing_subscriber::fmt::format::DefaultFields,
    tracing_subscriber::fmt::format::Format,
    tracing_subscriber::filter::LevelFilter,
    fn() -> std::io::Stderr,
> {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr as fn() -> std::io::Stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish()
}

/// Load configuration from file/env
///
/// A file named with `--config` or `TRACELENS_CONFIG` must load cleanly;
/// anything else falls back to defaults with a warning.
fn load_config(cli_path: Option<PathBuf>) -> anyhow::Result<TracelensConfig> {
    let explicit = cli_path.clone();
    match ConfigLoader::new().with_cli_path(cli_path).load() {
        Ok(config) => {
            info!("Configuration loaded successfully");
            Ok(config)
        }
        Err(e) => match explicit {
            Some(path) => Err(e).with_context(|| {
                format!("Failed to load configuration from {}", path.display())
            }),
            None => {
                warn!("Failed to load configuration: {}, using defaults", e);
                Ok(TracelensConfig::default())
            }
        },
    }
}

/// Merge CLI arguments with config file settings
/// CLI arguments take precedence when explicitly provided
fn merge_compare_config(
    config: &TracelensConfig,
    threshold: Option<f64>,
    jaeger_url: Option<String>,
) -> ComparisonConfig {
    let mut merged = ComparisonConfig::from(config);
    if let Some(threshold) = threshold.filter(|t| t.is_finite() && *t > 0.0) {
        merged.similarity.threshold = threshold;
    }
    if jaeger_url.is_some() {
        merged.jaeger_url = jaeger_url;
    }
    merged
}

async fn load_traces(input: &Path) -> anyhow::Result<Vec<Trace>> {
    let content = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let traces = parse_traces(&content)
        .with_context(|| format!("Failed to load traces from {}", input.display()))?;
    debug!("Loaded {} traces from {}", traces.len(), input.display());
    Ok(traces)
}

async fn load_stats(path: &Path) -> anyhow::Result<StatsLookup> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let stats: StatsLookup = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse stats from {}", path.display()))?;
    debug!("Loaded {} stats entries from {}", stats.len(), path.display());
    Ok(stats)
}

fn find_trace<'a>(traces: &'a [Trace], trace_id: &str) -> anyhow::Result<&'a Trace> {
    // accept the short ID shown in listings
    traces
        .iter()
        .find(|t| t.trace_id == trace_id)
        .or_else(|| traces.iter().find(|t| t.short_id() == trace_id))
        .with_context(|| format!("Trace {} not found", trace_id))
}

fn cell(matrix: &Matrix, row: usize, column: usize) -> String {
    format_delta(matrix.get(row, column))
}

fn print_matrix(matrix: &Matrix, value: impl Fn(Option<f64>) -> String) {
    print!("  {:<16}", "");
    for label in matrix.column_labels() {
        print!("{:>16}", label);
    }
    println!();
    for (r, label) in matrix.row_labels().iter().enumerate() {
        print!("  {:<16}", label);
        for c in 0..matrix.columns() {
            print!("{:>16}", value(matrix.get(r, c)));
        }
        println!();
    }
}

fn optional_duration(micros: Option<f64>) -> String {
    micros.map(format_duration).unwrap_or_else(|| "n/a".to_string())
}

async fn compare_command(
    input: &Path,
    trace_id: &str,
    config: &ComparisonConfig,
    json: bool,
) -> anyhow::Result<()> {
    let traces = load_traces(input).await?;
    let focal = find_trace(&traces, trace_id)?;
    let comparison = build_comparison(focal, &traces, config);

    if json {
        println!("{}", serde_json::to_string_pretty(&comparison)?);
        return Ok(());
    }

    println!();
    println!(
        "Trace {} ({})",
        comparison.short_id,
        focal.name().unwrap_or_else(|| "unnamed".to_string())
    );
    println!(
        "  Full duration:          {}",
        optional_duration(comparison.full_duration.map(|d| d as f64))
    );
    println!(
        "  Spans average duration: {}",
        optional_duration(comparison.average_span_duration)
    );
    println!();
    println!("Compared with traces on screen (ms):");
    println!(
        "  {:<16}{:>16}{:>16}",
        "", "Full duration", "Spans average"
    );
    for (row, label) in [(SIMILAR_ROW, "Similar"), (ALL_ROW, "All")] {
        println!(
            "  {:<16}{:>16}{:>16}",
            label,
            cell(&comparison.matrix, row, FULL_DURATION_COLUMN),
            cell(&comparison.matrix, row, SPANS_AVERAGE_COLUMN)
        );
    }
    for row in [SIMILAR_ROW, ALL_ROW] {
        if let Some(text) = comparison.describe_cell(row, FULL_DURATION_COLUMN) {
            println!("  {}", text);
        }
    }

    println!();
    println!("Similar traces ({}):", comparison.similar_count);
    if comparison.similar.is_empty() {
        println!("  No similar traces found");
    }
    let now = Utc::now();
    for similar in &comparison.similar {
        let age = similar
            .started_at
            .map(|ts| from_now(ts, now))
            .unwrap_or_else(|| "unknown age".to_string());
        println!(
            "  {:<8} {:<40} {}, {}",
            similar.short_id,
            similar.name.as_deref().unwrap_or("unnamed"),
            age,
            similar.comparison
        );
    }
    if let Some(url) = &comparison.comparison_url {
        println!();
        println!("Compare in Jaeger: {}", url);
    }
    println!();

    Ok(())
}

/// Similarity of one trace with the focal trace
#[derive(Debug, Clone, PartialEq, Serialize)]
struct SimilarityRow {
    trace_id: String,
    spans: usize,
    score: Option<f64>,
    similar: bool,
}

fn similarity_rows(focal: &Trace, traces: &[Trace], config: &SimilarityConfig) -> Vec<SimilarityRow> {
    traces
        .iter()
        .filter(|t| t.trace_id != focal.trace_id)
        .map(|t| {
            let score = config.score(t, focal);
            SimilarityRow {
                trace_id: t.trace_id.clone(),
                spans: t.span_count(),
                score,
                similar: score.is_some_and(|s| s < config.threshold),
            }
        })
        .collect()
}

async fn similar_command(
    input: &Path,
    trace_id: &str,
    config: &SimilarityConfig,
    json: bool,
) -> anyhow::Result<()> {
    let traces = load_traces(input).await?;
    let focal = find_trace(&traces, trace_id)?;

    let scores = similarity_rows(focal, &traces, config);

    if json {
        println!("{}", serde_json::to_string_pretty(&scores)?);
        return Ok(());
    }

    println!();
    println!(
        "Similarity with {} ({} spans, threshold {}):",
        focal.short_id(),
        focal.span_count(),
        config.threshold
    );
    for row in &scores {
        let score = row
            .score
            .map(|s| format!("{}", round_to(s, 3)))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "  {:<34} {:>6} spans  score {:>6}  {}",
            row.trace_id,
            row.spans,
            score,
            if row.similar { "similar" } else { "" }
        );
    }
    println!();

    Ok(())
}

async fn stats_command(
    input: &Path,
    trace_id: &str,
    stats_path: &Path,
    intervals: &[String],
    spans: bool,
    json: bool,
) -> anyhow::Result<()> {
    let traces = load_traces(input).await?;
    let focal = find_trace(&traces, trace_id)?;
    let lookup = load_stats(stats_path).await?;

    let reduced = reduce_metrics_stats(focal, intervals, &lookup);
    let span_matrices: Vec<(&str, Matrix)> = if spans {
        focal
            .spans
            .iter()
            .filter(|s| s.is_proxy())
            .filter_map(|s| {
                compare_span_with_stats(s, intervals, &lookup)
                    .map(|m| (s.operation_name.as_str(), m))
            })
            .collect()
    } else {
        Vec::new()
    };

    if json {
        let spans_json: Vec<serde_json::Value> = span_matrices
            .iter()
            .map(|(op, m)| serde_json::json!({ "operation": op, "matrix": m }))
            .collect();
        let out = serde_json::json!({
            "trace_id": focal.trace_id,
            "matrix": reduced.matrix,
            "is_complete": reduced.is_complete,
            "spans": spans_json,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("Response times for {} (ms):", focal.short_id());
    print_matrix(&reduced.matrix, |v| {
        v.map(|v| format!("{}", round_to(v, 2)))
            .unwrap_or_else(|| "n/a".to_string())
    });
    if !reduced.is_complete {
        println!("  (incomplete: some proxy spans have no stats)");
    }
    for (operation, matrix) in &span_matrices {
        println!();
        println!("Span {} vs stats (ms):", operation);
        print_matrix(matrix, format_delta);
    }
    println!();

    Ok(())
}

async fn queries_command(
    input: &Path,
    trace_id: &str,
    intervals: &[String],
    quantiles: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let traces = load_traces(input).await?;
    let focal = find_trace(&traces, trace_id)?;
    let queries = build_stats_queries(&focal.spans, intervals, quantiles);

    if json {
        println!("{}", serde_json::to_string_pretty(&queries)?);
        return Ok(());
    }

    println!();
    println!("Stats queries for {} ({}):", focal.short_id(), queries.len());
    for query in &queries {
        println!("  {}", query.key());
    }
    println!();

    Ok(())
}

fn config_command(
    config: &TracelensConfig,
    write: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    if let Some(path) = write {
        ConfigLoader::new()
            .save(config, path)
            .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
    }
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}
