//! CLI entry point for the errand insights tool.
//!
//! Provides subcommands for building the SQLite store from raw CSV exports,
//! deriving the ML-ready dataset, and generating the statistical report.

use anyhow::Result;
use clap::{Parser, Subcommand};
use errand_insights::analyzers::{self, contacts};
use errand_insights::report::{MarkdownReport, ReportSink};
use errand_insights::{store, transform};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Column pairs analyzed for dependencies in the report.
const DEPENDENCIES: &[(&str, &str)] = &[
    ("errand_category", "errand_type"),
    ("errand_type", "errand_action"),
];

/// Columns excluded from the per-column report.
const EXCLUDED_COLUMNS: &[&str] = &["errand_id", "order_id", "created", "is_test_errand"];

#[derive(Parser)]
#[command(name = "errand_insights")]
#[command(about = "Analyze customer-service errands tied to travel orders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the SQLite database from raw CSV exports
    BuildDb {
        /// Path to the errands CSV file
        #[arg(long, default_value = "data/errands.csv")]
        errands_file: PathBuf,

        /// Path to the orders CSV file
        #[arg(long, default_value = "data/orders.csv")]
        orders_file: PathBuf,

        /// SQLite database file to create
        #[arg(short, long, default_value = "data/errands.db")]
        database: PathBuf,

        /// Process only the first 100 rows of each file
        #[arg(long, default_value_t = false)]
        subset: bool,
    },
    /// Derive the ML-ready dataset from the database
    BuildMlData {
        /// SQLite database file to read
        #[arg(short, long, default_value = "data/errands.db")]
        database: PathBuf,

        /// Directory the transformed CSVs are written to
        #[arg(short, long, default_value = "data")]
        out_dir: PathBuf,

        /// Maximum errand rows to load
        #[arg(long)]
        limit_errands: Option<usize>,

        /// Maximum order rows to load
        #[arg(long)]
        limit_orders: Option<usize>,
    },
    /// Generate the statistical markdown report
    Report {
        /// SQLite database file to read
        #[arg(short, long, default_value = "data/errands.db")]
        database: PathBuf,

        /// Markdown file to write the report to (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Column of the orders table to stratify contact statistics by
        #[arg(long, default_value = "is_changed")]
        stratify_by: String,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/errand_insights.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("errand_insights.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::BuildDb {
            errands_file,
            orders_file,
            database,
            subset,
        } => {
            store::build_database(&errands_file, &orders_file, &database, subset)?;
        }
        Commands::BuildMlData {
            database,
            out_dir,
            limit_errands,
            limit_orders,
        } => {
            let limits = match (limit_errands, limit_orders) {
                (Some(e), Some(o)) => Some((e, o)),
                _ => None,
            };
            transform::build_ml_dataset(&database, &out_dir, limits)?;
        }
        Commands::Report {
            database,
            output,
            stratify_by,
        } => {
            generate_report(&database, output.as_deref(), &stratify_by)?;
        }
    }

    Ok(())
}

/// Runs the full analysis against the stored tables and renders it as one
/// markdown report.
#[tracing::instrument(skip(output), fields(database = %database.display(), stratify_by))]
fn generate_report(database: &Path, output: Option<&Path>, stratify_by: &str) -> Result<()> {
    let (errands, orders) = store::load_tables(database, None)?;

    let mut sink: Box<dyn ReportSink> = match output {
        Some(path) => Box::new(MarkdownReport::to_file(path)?),
        None => Box::new(MarkdownReport::stdout()),
    };

    sink.render_markdown("## Errand Report")?;
    analyzers::analyze_table(&errands, EXCLUDED_COLUMNS, DEPENDENCIES, sink.as_mut())?;

    sink.render_markdown("## Order Contact Statistics")?;
    contacts::analyze_contacts(&orders, stratify_by, sink.as_mut())?;

    info!("Report generated");
    Ok(())
}
