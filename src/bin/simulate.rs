//! Load Simulation Binary
//!
//! Drives several engine instances over one shared in-memory store with a
//! burst of concurrent, overlapping searches against simulated sources, then
//! reports how many upstream calls the cache and coalescer avoided.
//!
//! Run with: `cargo run --bin simulate -- --callers 500 --queries 10`

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use job_aggregator::app::{
    CacheConfig, EngineConfig, InMemoryStore, JobSearchEngine, SearchFilters, SimulatedFailure,
    SimulatedSource, SourceAdapter, SourceRegistry, StoreHandle,
};

/// Configuration for the simulation
#[derive(Parser, Debug, Clone)]
#[command(name = "simulate", about = "Load simulation for request coalescing")]
struct SimulationConfig {
    /// Engine instances sharing the store (stand-ins for worker processes)
    #[arg(long, default_value = "4")]
    instances: usize,

    /// Simulated upstream sources
    #[arg(long, default_value = "5")]
    sources: usize,

    /// Concurrent searches per wave
    #[arg(long, default_value = "200")]
    callers: usize,

    /// Distinct queries the callers draw from
    #[arg(long, default_value = "8")]
    queries: usize,

    /// Waves of searches; later waves should be served from cache
    #[arg(long, default_value = "3")]
    waves: usize,

    /// Upstream latency in milliseconds
    #[arg(long, default_value = "150")]
    latency_ms: u64,

    /// Make the last source fail with HTTP 503
    #[arg(long)]
    failing_source: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

const KEYWORDS: &[&str] = &[
    "rust", "python", "golang", "kotlin", "devops", "frontend", "data", "security", "sre", "ml",
    "android", "ios",
];

const LOCATIONS: &[&str] = &["", "remote", "berlin", "london", "india"];

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = SimulationConfig::parse();
    init_logging(config.verbose);

    let store: StoreHandle = Arc::new(InMemoryStore::new());
    let sources: Vec<Arc<SimulatedSource>> = (0..config.sources)
        .map(|i| {
            Arc::new(
                SimulatedSource::new(format!("sim-{}", i))
                    .with_latency(Duration::from_millis(config.latency_ms))
                    .with_rate_limit(100_000),
            )
        })
        .collect();
    if config.failing_source {
        if let Some(last) = sources.last() {
            last.set_failure(Some(SimulatedFailure::Status(503)));
        }
    }

    let mut engines = Vec::with_capacity(config.instances);
    for instance in 0..config.instances.max(1) {
        let mut registry = SourceRegistry::new();
        for source in &sources {
            registry.register(Arc::clone(source) as Arc<dyn SourceAdapter>)?;
        }
        let engine_config = EngineConfig {
            cache: CacheConfig::default()
                .with_instance_id(format!("sim-instance-{}", instance))
                .with_poll_interval(Duration::from_millis(20)),
            ..Default::default()
        };
        engines.push(Arc::new(JobSearchEngine::new(
            Arc::clone(&store),
            registry,
            engine_config,
        )?));
    }

    let queries: Vec<(String, String)> = (0..config.queries.max(1))
        .map(|i| {
            (
                KEYWORDS[i % KEYWORDS.len()].to_string(),
                LOCATIONS[(i / KEYWORDS.len()) % LOCATIONS.len()].to_string(),
            )
        })
        .collect();

    println!(
        "Simulating {} waves of {} callers over {} queries, {} instances, {} sources",
        config.waves,
        config.callers,
        queries.len(),
        engines.len(),
        sources.len()
    );

    let started = Instant::now();
    let mut searches = 0usize;
    for wave in 1..=config.waves {
        let wave_started = Instant::now();
        let calls_before: usize = sources.iter().map(|s| s.call_count()).sum();

        let tasks = (0..config.callers).map(|_| {
            let engine = Arc::clone(&engines[fastrand::usize(..engines.len())]);
            let (keyword, location) = queries[fastrand::usize(..queries.len())].clone();
            tokio::spawn(async move {
                // Spread arrivals over a few milliseconds
                tokio::time::sleep(Duration::from_millis(fastrand::u64(0..20))).await;
                engine
                    .search(&[keyword], &location, &SearchFilters::default(), 20)
                    .await
            })
        });

        let mut hits = 0usize;
        let mut coalesced = 0usize;
        let mut empty = 0usize;
        for outcome in join_all(tasks).await {
            match outcome {
                Ok(response) => {
                    hits += usize::from(response.meta.cache_hit);
                    coalesced += usize::from(response.meta.coalesced);
                    empty += usize::from(response.jobs.is_empty());
                }
                Err(e) => warn!("Search task failed: {}", e),
            }
        }
        searches += config.callers;

        let calls_after: usize = sources.iter().map(|s| s.call_count()).sum();
        println!(
            "Wave {}: {} searches in {:?}, {} upstream calls, {} cache hits, {} coalesced, {} empty",
            wave,
            config.callers,
            wave_started.elapsed(),
            calls_after - calls_before,
            hits,
            coalesced,
            empty
        );
    }

    let upstream_calls: usize = sources.iter().map(|s| s.call_count()).sum();
    let naive_calls = searches * sources.len();
    let ratio = if upstream_calls == 0 {
        f64::INFINITY
    } else {
        naive_calls as f64 / upstream_calls as f64
    };

    println!();
    println!("Elapsed:            {:?}", started.elapsed());
    println!("Searches:           {}", searches);
    println!("Upstream calls:     {} (naive: {})", upstream_calls, naive_calls);
    println!("Coalescing ratio:   {:.1}x", ratio);
    for source in &sources {
        println!(
            "  {:<8} calls={:<4} peak concurrency={}",
            source.name(),
            source.call_count(),
            source.peak_concurrency()
        );
    }

    let stats = engines[0]
        .stats()
        .await
        .context("reading shared counters")?;
    println!();
    println!("{}", stats);
    info!("Simulation finished");
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("job_aggregator={}", level).parse() {
        filter = filter.add_directive(directive);
    }
    fmt().with_env_filter(filter).with_target(false).init();
}
