//! CLI entry point for the ANS expense pipeline.
//!
//! Provides subcommands for extracting quarterly archives, consolidating the
//! filings against the operator registry, aggregating per-operator statistics
//! and querying one operator's deaccumulated history.

use ans_expenses::archive::{export_csv_to_zip, extract_file};
use ans_expenses::config::{CONSOLIDATED_CSV, EtlConfig};
use ans_expenses::etl::aggregate::{aggregate, clean_consolidated};
use ans_expenses::etl::consolidate::{read_consolidated, read_consolidated_archive};
use ans_expenses::etl::filter::FilterPolicy;
use ans_expenses::etl::history::operator_history;
use ans_expenses::etl::registry::{RegistryJoiner, load_registry};
use ans_expenses::etl::types::{AggregatedStat, QuarterlyExpense};
use ans_expenses::identifier::normalize_identifier;
use ans_expenses::output::{
    consolidated_csv_bytes, print_json, write_aggregated, write_consolidated,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "ans_expenses")]
#[command(about = "Consolidate and aggregate ANS health-plan operator expenses", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Safely extract a quarterly filings archive
    Extract {
        /// Path to the zip archive
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Destination directory (defaults to <data>/trimestres)
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },
    /// Consolidate quarterly filings against the operator registry
    Consolidate {
        /// Directory containing the quarterly filings
        #[arg(short, long)]
        source_dir: Option<PathBuf>,

        /// Registry of active operators
        #[arg(short, long)]
        registry: Option<PathBuf>,

        /// Directory to write consolidado_despesas.csv/.zip to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Which accounting rows count as claims expense (strict or loose)
        #[arg(short, long)]
        filter_policy: Option<FilterPolicy>,
    },
    /// Aggregate a consolidated table into per-operator statistics
    Aggregate {
        /// Consolidated table, .csv or .zip
        #[arg(short, long)]
        consolidated: Option<PathBuf>,

        /// Registry of active operators
        #[arg(short, long)]
        registry: Option<PathBuf>,

        /// Output CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Consolidate then aggregate in one pass
    Run {
        /// Which accounting rows count as claims expense (strict or loose)
        #[arg(short, long)]
        filter_policy: Option<FilterPolicy>,
    },
    /// Show one operator's quarterly series, newest first
    History {
        /// Operator CNPJ, formatted or not
        #[arg(long)]
        cnpj: String,

        /// Consolidated table, .csv or .zip
        #[arg(short, long)]
        consolidated: Option<PathBuf>,

        #[arg(short, long, default_value_t = 1)]
        page: usize,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Log the page as JSON instead of one line per quarter
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Validate and normalize a CNPJ
    CheckCnpj {
        #[arg(value_name = "VALUE")]
        value: String,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/ans_expenses.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("ans_expenses.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = EtlConfig::from_env()?;

    match cli.command {
        Commands::Extract { archive, dest } => {
            let dest = dest.unwrap_or_else(|| config.trimestres_dir());
            let written = extract_file(&archive, &dest)
                .with_context(|| format!("extracting {}", archive.display()))?;
            info!(files = written.len(), dest = %dest.display(), "Extraction finished");
        }
        Commands::Consolidate {
            source_dir,
            registry,
            output_dir,
            filter_policy,
        } => {
            let mut config = config;
            if let Some(dir) = output_dir {
                config = config.with_output_dir(dir);
            }
            if let Some(policy) = filter_policy {
                config = config.with_filter_policy(policy);
            }
            let source_dir = source_dir.unwrap_or_else(|| config.trimestres_dir());
            let registry = registry.unwrap_or_else(|| config.registry_path());

            consolidate(&config, &source_dir, &registry)?;
        }
        Commands::Aggregate {
            consolidated,
            registry,
            output,
        } => {
            let consolidated = consolidated.unwrap_or_else(|| config.consolidated_zip());
            let registry = registry.unwrap_or_else(|| config.registry_path());
            let output = output.unwrap_or_else(|| config.aggregated_csv());

            let rows = load_consolidated(&config, &consolidated)?;
            let stats = aggregate_rows(&config, rows, &registry)?;
            write_aggregated(&output, &stats)?;
        }
        Commands::Run { filter_policy } => {
            let config = match filter_policy {
                Some(policy) => config.with_filter_policy(policy),
                None => config,
            };
            let registry = config.registry_path();

            let rows = consolidate(&config, &config.trimestres_dir(), &registry)?;
            let stats = aggregate_rows(&config, rows, &registry)?;
            write_aggregated(&config.aggregated_csv(), &stats)?;
        }
        Commands::History {
            cnpj,
            consolidated,
            page,
            limit,
            json,
        } => {
            let Some(identifier) = normalize_identifier(&cnpj) else {
                bail!("invalid CNPJ: {cnpj}");
            };
            let consolidated = consolidated.unwrap_or_else(|| config.consolidated_zip());
            let rows = load_consolidated(&config, &consolidated)?;

            let Some(history) = operator_history(&rows, &identifier, page, limit) else {
                warn!(cnpj = %identifier, "No expenses found for operator");
                return Ok(());
            };

            if json {
                print_json(&history)?;
            } else {
                info!(
                    cnpj = %history.identifier,
                    legal_name = %history.legal_name,
                    total = history.total,
                    page = history.page,
                    total_pages = history.total_pages,
                    "Operator history"
                );
                for entry in &history.data {
                    info!(
                        year = entry.year,
                        quarter = entry.quarter,
                        ytd = entry.ytd,
                        isolated = entry.isolated,
                        "Quarter"
                    );
                }
            }
        }
        Commands::CheckCnpj { value } => match normalize_identifier(&value) {
            Some(identifier) => info!(cnpj = %identifier, "Valid CNPJ"),
            None => bail!("invalid CNPJ: {value}"),
        },
    }

    Ok(())
}

/// Runs the consolidation batch and writes the consolidated table as CSV and zip.
#[tracing::instrument(skip(config), fields(source_dir = %source_dir.display()))]
fn consolidate(
    config: &EtlConfig,
    source_dir: &Path,
    registry: &Path,
) -> Result<Vec<QuarterlyExpense>> {
    let batch = config.consolidator().run_batch(source_dir, registry)?;

    info!(
        processed = batch.processed,
        skipped = batch.skipped,
        unmatched = batch.unmatched,
        duplicate_keys = batch.duplicate_keys,
        "Batch finished"
    );
    if batch.rows.is_empty() {
        warn!("No expense rows consolidated");
    }

    write_consolidated(&config.consolidated_csv(), &batch.rows)?;
    export_csv_to_zip(
        &consolidated_csv_bytes(&batch.rows)?,
        &config.consolidated_zip(),
        CONSOLIDATED_CSV,
    )?;

    Ok(batch.rows)
}

/// Loads a consolidated table from a plain CSV or from the zip written by `consolidate`.
fn load_consolidated(config: &EtlConfig, path: &Path) -> Result<Vec<QuarterlyExpense>> {
    let is_zip = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));

    let rows = if is_zip {
        read_consolidated_archive(&config.reader(), path, CONSOLIDATED_CSV)
            .with_context(|| format!("reading {CONSOLIDATED_CSV} from {}", path.display()))?
    } else {
        read_consolidated(&config.reader(), path)?
    };
    Ok(rows)
}

/// Cleans consolidated rows, enriches them from the registry and aggregates.
#[tracing::instrument(skip(config, rows), fields(rows = rows.len()))]
fn aggregate_rows(
    config: &EtlConfig,
    rows: Vec<QuarterlyExpense>,
    registry: &Path,
) -> Result<Vec<AggregatedStat>> {
    let registry = load_registry(&config.reader(), &config.registry_normalizer(), registry)?;

    let cleaned = clean_consolidated(rows);
    let joined = RegistryJoiner::new(&registry).join_by_identifier(cleaned.rows);
    let stats = aggregate(&joined.rows);

    info!(operators = stats.len(), "Aggregation finished");
    Ok(stats)
}
