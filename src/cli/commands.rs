//! Command handlers for the job aggregator CLI
//!
//! Each handler loads the configuration, builds the engine over the
//! configured store and runs one operation against it.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::{JobSearchEngine, Scheduler, SearchResponse, SourceRegistry};
use crate::cli::{BatchArgs, ConfigAction, ConfigArgs, QueueArgs, SearchArgs};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Build the engine described by `config`
pub async fn build_engine(config: &AppConfig) -> Result<JobSearchEngine> {
    let store = config.connect_store().await?;
    let registry = SourceRegistry::from_settings(&config.sources, &config.to_client_config())?;
    if registry.is_empty() {
        warn!("No sources are enabled; every search will come back empty");
    }
    JobSearchEngine::new(store, registry, config.to_engine_config())
}

/// Handle the search command
pub async fn handle_search(args: SearchArgs, config_path: Option<PathBuf>) -> Result<()> {
    args.validate().map_err(AppError::generic)?;

    let config = AppConfig::load(config_path).await?;
    let engine = build_engine(&config).await?;
    let response = engine
        .search(&args.keywords, &args.location, &args.filters(), args.limit)
        .await;

    if args.json {
        let json = serde_json::to_string_pretty(&response)
            .map_err(|e| AppError::generic(format!("Failed to encode response: {}", e)))?;
        println!("{}", json);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &SearchResponse) {
    let meta = &response.meta;

    if meta.queued {
        println!("⏳ This source is quota-limited; your search was queued for the next batch.");
        println!("   Run the same search again after the batch has run.");
        return;
    }

    if response.jobs.is_empty() {
        println!("No listings found.");
    }

    for (index, job) in response.jobs.iter().enumerate() {
        let location = if job.remote && job.location.is_empty() {
            "Remote".to_string()
        } else {
            job.location.clone()
        };
        println!(
            "{:>3}. {} at {} [{}] ({}, {})",
            index + 1,
            job.title,
            job.company,
            job.source,
            location,
            job.posted_date.format("%Y-%m-%d")
        );
        if !job.redirect_url.is_empty() {
            println!("     {}", job.redirect_url);
        }
    }

    println!();
    if meta.cache_hit {
        println!("📦 Served from cache in {}ms", meta.latency_ms);
    } else {
        println!(
            "🔎 {} of {} sources answered in {}ms ({} duplicates removed{})",
            meta.sources_succeeded,
            meta.sources_queried,
            meta.latency_ms,
            meta.deduped_count,
            if meta.coalesced { ", shared fetch" } else { "" }
        );
    }
    if !meta.failed_sources.is_empty() {
        println!("⚠️  Failed sources: {}", meta.failed_sources.join(", "));
    }
}

/// Handle the queue command
pub async fn handle_queue(args: QueueArgs, config_path: Option<PathBuf>) -> Result<()> {
    let priority = args.priority().map_err(AppError::generic)?;
    let config = AppConfig::load(config_path).await?;
    let engine = build_engine(&config).await?;

    let source = args.source.trim().to_lowercase();
    if engine.registry().get(&source).is_none() {
        return Err(AppError::generic(format!(
            "Source '{}' is not registered (available: {})",
            source,
            engine.registry().names().join(", ")
        )));
    }
    if !engine.registry().is_quota_constrained(&source) {
        warn!("{} is not quota-constrained; searches reach it directly", source);
    }

    let fingerprint = engine
        .batch()
        .queue_request(&args.keywords, &args.location, &source, priority.value())
        .await?;
    let pending = engine.batch().queue_len().await?;

    println!("✅ Queued {} for {} ({} pending)", fingerprint, source, pending);
    Ok(())
}

/// Handle the batch command
pub async fn handle_batch(args: BatchArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = AppConfig::load(config_path).await?;
    if let Some(max_requests) = args.max_requests {
        config.batch.max_requests = max_requests;
    }
    let engine = build_engine(&config).await?;

    if args.clear {
        let removed = engine.batch().clear().await?;
        println!("🗑️  Removed {} queued requests", removed);
        return Ok(());
    }

    if args.list {
        let pending = engine.batch().pending().await?;
        if pending.is_empty() {
            println!("The batch queue is empty.");
        }
        for entry in pending {
            println!(
                "{} {:<10} p{:<4} x{} [{}] {}",
                entry.fingerprint,
                entry.source,
                entry.priority,
                entry.dedup_count,
                entry.keywords.join(" "),
                entry.location
            );
        }
        return Ok(());
    }

    info!("Running one batch cycle");
    let summary = engine.execute_batch().await?;
    println!("{}", summary);
    Ok(())
}

/// Handle the warm command
pub async fn handle_warm(config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path).await?;
    if config.popular_queries.is_empty() {
        println!("No popular queries configured; add [[popular_queries]] to the config file.");
        return Ok(());
    }

    let engine = build_engine(&config).await?;
    let summary = engine.warm_popular().await;
    println!(
        "🔥 Warmed {}/{} queries ({} listings cached) in {}ms",
        summary.refreshed, summary.attempted, summary.jobs_cached, summary.duration_ms
    );
    Ok(())
}

/// Handle the stats command
pub async fn handle_stats(reset: bool, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path).await?;
    let engine = build_engine(&config).await?;

    let stats = engine.stats().await?;
    println!("{}", stats);

    if reset {
        engine.cache().stats().reset().await?;
        println!("Counters reset.");
    }
    Ok(())
}

/// Handle the schedule command; runs until Ctrl-C
pub async fn handle_schedule(config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path).await?;
    let engine = Arc::new(build_engine(&config).await?);

    let scheduler = Scheduler::start(Arc::clone(&engine), config.to_scheduler_config());
    println!(
        "⏱️  Scheduler running with {} background tasks. Press Ctrl-C to stop.",
        scheduler.task_count()
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::generic(format!("Failed to listen for Ctrl-C: {}", e)))?;

    info!("Shutdown requested");
    scheduler.shutdown().await;
    Ok(())
}

/// Handle configuration management
pub async fn handle_config(args: ConfigArgs, config_path: Option<PathBuf>) -> Result<()> {
    match args.action {
        ConfigAction::Init { path, force } => {
            let path = match path {
                Some(path) => path,
                None => AppConfig::get_default_config_path()?,
            };
            if path.exists() && !force {
                println!("Configuration already exists at {}", path.display());
                println!("Use --force to overwrite it.");
                return Ok(());
            }
            AppConfig::write_default_config(&path).await?;
            println!("📁 Wrote default configuration to {}", path.display());
        }
        ConfigAction::Show => {
            let config = AppConfig::load(config_path).await?;
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| AppError::generic(format!("Failed to render config: {}", e)))?;
            debug!("Rendered {} bytes of configuration", rendered.len());
            println!("{}", rendered);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn simulated_config(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("config.toml");
        let content = r#"
[[sources]]
name = "simulated"
"#;
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_build_engine_from_config() {
        let dir = TempDir::new().unwrap();
        let path = simulated_config(&dir).await;

        let config = AppConfig::load(Some(path)).await.unwrap();
        let engine = build_engine(&config).await.unwrap();
        assert_eq!(engine.registry().names(), vec!["simulated"]);
    }

    #[tokio::test]
    async fn test_search_command_runs() {
        let dir = TempDir::new().unwrap();
        let path = simulated_config(&dir).await;

        let args = SearchArgs {
            keywords: vec!["rust".to_string()],
            location: String::new(),
            source: None,
            remote_only: false,
            job_type: None,
            min_salary: None,
            limit: 5,
            json: true,
        };
        assert!(handle_search(args, Some(path)).await.is_ok());
    }

    #[tokio::test]
    async fn test_queue_rejects_unknown_source() {
        let dir = TempDir::new().unwrap();
        let path = simulated_config(&dir).await;

        let args = QueueArgs {
            keywords: vec!["rust".to_string()],
            source: "nowhere".to_string(),
            location: String::new(),
            priority: "normal".to_string(),
        };
        assert!(handle_queue(args, Some(path)).await.is_err());
    }

    #[tokio::test]
    async fn test_config_init_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("generated.toml");

        let args = ConfigArgs {
            action: ConfigAction::Init {
                path: Some(path.clone()),
                force: false,
            },
        };
        handle_config(args, None).await.unwrap();
        assert!(path.exists());
    }
}
