//! Job Aggregator CLI application
//!
//! Command-line interface for searching job listings across several upstream
//! sources through the shared cache, batch queue and scheduler.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use job_aggregator::cli::{
    handle_batch, handle_config, handle_queue, handle_schedule, handle_search, handle_stats,
    handle_warm, Cli, Commands,
};
use job_aggregator::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Credentials may live in a .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    init_logging(&cli);

    info!("Job Aggregator v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = cli.global.config.clone();
    match cli.command {
        Commands::Search(args) => {
            info!("Executing search command");
            handle_search(args, config_path).await
        }
        Commands::Queue(args) => {
            info!("Executing queue command");
            handle_queue(args, config_path).await
        }
        Commands::Batch(args) => {
            info!("Executing batch command");
            handle_batch(args, config_path).await
        }
        Commands::Warm => {
            info!("Executing warm command");
            handle_warm(config_path).await
        }
        Commands::Stats { reset } => handle_stats(reset, config_path).await,
        Commands::Schedule => {
            info!("Executing schedule command");
            handle_schedule(config_path).await
        }
        Commands::Config(args) => handle_config(args, config_path).await,
    }
}

/// Initialize logging based on CLI verbosity settings
fn init_logging(cli: &Cli) {
    let log_level = cli.log_level();

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("job_aggregator={}", log_level).parse() {
        filter = filter.add_directive(directive);
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
