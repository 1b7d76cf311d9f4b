//! Command-line argument parsing for the job aggregator
//!
//! This module defines the CLI structure using clap derive macros: searching,
//! batch queue management, cache warming, stats and the long-running scheduler.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::{JobType, Priority, SearchFilters};

/// Job Aggregator - search job listings across many sources at once
#[derive(Parser, Debug)]
#[command(
    name = "job_aggregator",
    version,
    about = "Search job listings across multiple upstream sources",
    long_about = "Aggregates job listings from several public job APIs behind a shared cache.
Identical concurrent searches are coalesced into one upstream fetch, per-source rate limits are
enforced across processes, and quota-constrained sources are served through a batch queue."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search all sources (or one) for matching listings
    Search(SearchArgs),

    /// Queue a query for a quota-constrained source
    Queue(QueueArgs),

    /// Run one batch cycle over the queue
    Batch(BatchArgs),

    /// Refresh the configured popular queries
    Warm,

    /// Show shared engine counters
    Stats {
        /// Zero every counter after printing
        #[arg(long)]
        reset: bool,
    },

    /// Run the batch, warming and cleanup loops until interrupted
    Schedule,

    /// Manage the configuration file
    Config(ConfigArgs),
}

/// Arguments for the search command
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Search keywords
    #[arg(required = true, value_name = "KEYWORD")]
    pub keywords: Vec<String>,

    /// Location text; empty means anywhere
    #[arg(short, long, default_value = "")]
    pub location: String,

    /// Restrict the search to one source
    #[arg(short, long)]
    pub source: Option<String>,

    /// Only remote listings
    #[arg(long)]
    pub remote_only: bool,

    /// Only listings of this job type (full-time, part-time, contract, ...)
    #[arg(long)]
    pub job_type: Option<String>,

    /// Only listings whose maximum salary reaches this value
    #[arg(long)]
    pub min_salary: Option<i64>,

    /// Maximum listings to return
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,

    /// Print the full response as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the queue command
#[derive(Args, Debug, Clone)]
pub struct QueueArgs {
    /// Search keywords
    #[arg(required = true, value_name = "KEYWORD")]
    pub keywords: Vec<String>,

    /// Quota-constrained source to queue for
    #[arg(short, long)]
    pub source: String,

    /// Location text
    #[arg(short, long, default_value = "")]
    pub location: String,

    /// Priority: low, normal or high
    #[arg(short, long, default_value = "normal")]
    pub priority: String,
}

/// Arguments for the batch command
#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Upper bound on requests executed this cycle
    #[arg(short, long)]
    pub max_requests: Option<usize>,

    /// Only list pending requests
    #[arg(long)]
    pub list: bool,

    /// Drop every pending request
    #[arg(long, conflicts_with = "list")]
    pub clear: bool,
}

/// Arguments for configuration management
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write the default configuration file
    Init {
        /// Where to write it (defaults to the user config directory)
        #[arg(value_name = "FILE")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

impl SearchArgs {
    /// Reject argument combinations that cannot produce results
    pub fn validate(&self) -> Result<(), String> {
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err("At least one non-empty keyword is required".to_string());
        }
        if self.limit == 0 {
            return Err("Limit must be greater than 0".to_string());
        }
        if let Some(label) = &self.job_type {
            if JobType::parse_lenient(label) == JobType::Unknown {
                return Err(format!("Unknown job type '{}'", label));
            }
        }
        Ok(())
    }

    /// Post-filters selected on the command line
    pub fn filters(&self) -> SearchFilters {
        let mut filters = SearchFilters::default();
        if let Some(source) = &self.source {
            filters = filters.with_source(source.clone());
        }
        if self.remote_only {
            filters = filters.remote_only();
        }
        if let Some(label) = &self.job_type {
            filters = filters.with_job_type(JobType::parse_lenient(label));
        }
        if let Some(min_salary) = self.min_salary {
            filters = filters.with_min_salary(min_salary);
        }
        filters
    }
}

impl QueueArgs {
    pub fn priority(&self) -> Result<Priority, String> {
        self.priority.parse()
    }
}
