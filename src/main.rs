use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::sync::Mutex;
use tracing::{info, Level};
use tracing_subscriber::{self, EnvFilter};

use globe_stats::cli::commands::{
    CompareCommand, CountriesCommand, ExploreCommand, LoadCommand, QueryCommand, SearchCommand, SeriesCommand,
};

#[derive(Parser)]
#[command(name = "globe-stats")]
#[command(about = "Per-country COVID-19 statistics with precomputed globe colours")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the datasets and report dates, columns, ranges and cached colours
    Load(LoadCommand),
    /// Show one country's values and colour for a selection
    Query(QueryCommand),
    /// List countries reporting on the selected date, highest value first
    Countries(CountriesCommand),
    /// Fuzzy search countries by name or key
    Search(SearchCommand),
    /// Plot one country's series for the selected column
    Series(SeriesCommand),
    /// Compare several countries on the current selection
    Compare(CompareCommand),
    /// Browse the loaded data in an interactive terminal view
    Explore(ExploreCommand),
}

/// Log file used while the explorer owns the terminal
const EXPLORER_LOG_FILE: &str = "globe-stats.log";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Cap Polars threads; the CSVs are small and parsed concurrently
    let max_polars_threads = std::cmp::min(4, num_cpus::get());
    std::env::set_var("POLARS_MAX_THREADS", max_polars_threads.to_string());

    let base_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let http_filter = "hyper=error,hyper_util=error,reqwest=error,rustls=error,h2=error,tower=error";
    let filter = EnvFilter::new(format!(
        "globe_stats={},{}",
        if cli.verbose { "debug" } else { "info" },
        http_filter
    ));

    if matches!(cli.command, Commands::Explore(_)) {
        let log_file = File::create(EXPLORER_LOG_FILE)?;
        tracing_subscriber::fmt()
            .with_max_level(base_level)
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(log_file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(base_level)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    info!("Starting globe-stats v{}", env!("CARGO_PKG_VERSION"));
    info!("🧵 Limited Polars to {} threads", max_polars_threads);

    match cli.command {
        Commands::Load(cmd) => cmd.execute().await,
        Commands::Query(cmd) => cmd.execute().await,
        Commands::Countries(cmd) => cmd.execute().await,
        Commands::Search(cmd) => cmd.execute().await,
        Commands::Series(cmd) => cmd.execute().await,
        Commands::Compare(cmd) => cmd.execute().await,
        Commands::Explore(cmd) => cmd.execute().await,
    }
}
