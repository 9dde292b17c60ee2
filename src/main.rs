//! Thumbnail Engine - command-line front end for the thumbnail cache.
//!
//! This binary opens the disk tier, builds the service from configuration and
//! runs one subcommand.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thumbnail_engine::{
    config::{Cli, Command, GenerateConfig, PruneConfig, StatsConfig},
    PressureLevel, PressureThresholds, ThumbnailOrigin, ThumbnailService,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    // Validate configuration
    if let Err(e) = cli.cache.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let cache_dir = cli.cache.resolved_cache_dir();
    let service = match ThumbnailService::open(&cache_dir, cli.cache.service_config()).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to open cache at {}: {}", cache_dir.display(), e);
            return ExitCode::FAILURE;
        }
    };
    debug!(cache_dir = %cache_dir.display(), "Opened thumbnail cache");

    match cli.command {
        Command::Generate(config) => {
            run_generate(&service, config, cli.cache.pressure_thresholds()).await
        }
        Command::Prune(config) => run_prune(&service, config).await,
        Command::Clear => run_clear(&service).await,
        Command::Stats(config) => run_stats(&service, config).await,
    }
}

/// Initialize the tracing/logging subsystem.
///
/// Logs go to stderr so `--json` output on stdout stays machine-readable.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "thumbnail_engine=debug"
    } else {
        "thumbnail_engine=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Generate Command
// =============================================================================

/// One line of `generate` output.
#[derive(Debug, Serialize)]
struct GenerateReport {
    file: String,
    key: Option<String>,
    origin: Option<ThumbnailOrigin>,
    width: Option<u32>,
    height: Option<u32>,
    error: Option<String>,
}

impl GenerateReport {
    fn failed(file: &Path, error: impl ToString) -> Self {
        Self {
            file: file.display().to_string(),
            key: None,
            origin: None,
            width: None,
            height: None,
            error: Some(error.to_string()),
        }
    }
}

async fn run_generate(
    service: &ThumbnailService,
    config: GenerateConfig,
    thresholds: PressureThresholds,
) -> ExitCode {
    let size = config.size;
    let mut reports: Vec<Option<GenerateReport>> = Vec::new();
    let mut sources: Vec<(usize, PathBuf, String, Bytes)> = Vec::new();

    for path in config.files.iter().cloned() {
        let index = reports.len();
        reports.push(None);

        let Some(source_id) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned)
        else {
            reports[index] = Some(GenerateReport::failed(&path, "path has no file name"));
            continue;
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => sources.push((index, path, source_id, Bytes::from(bytes))),
            Err(e) => reports[index] = Some(GenerateReport::failed(&path, e)),
        }
    }

    if config.preload {
        let batch = sources
            .iter()
            .map(|(_, _, id, bytes)| (id.clone(), bytes.clone()))
            .collect();
        match service.preload_thumbnails(batch, size).await {
            Ok(loaded) => info!("Preloaded {} of {} thumbnail(s)", loaded, sources.len()),
            Err(e) => warn!("Preload task failed: {}", e),
        }
    }

    let mut tasks = JoinSet::new();
    for (index, path, source_id, bytes) in sources {
        let service = service.clone();
        tasks.spawn(async move {
            let result = service.try_get_thumbnail(&source_id, bytes, size).await;
            (index, path, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (index, path, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!("Generation task failed: {}", e);
                continue;
            }
        };

        reports[index] = Some(match result {
            Ok(response) => GenerateReport {
                file: path.display().to_string(),
                key: Some(response.key.to_string()),
                origin: Some(response.origin),
                width: Some(response.thumbnail.width()),
                height: Some(response.thumbnail.height()),
                error: None,
            },
            Err(e) => GenerateReport::failed(&path, e),
        });
    }

    let reports: Vec<GenerateReport> = reports.into_iter().flatten().collect();
    let failures = reports.iter().filter(|r| r.error.is_some()).count();

    if config.json {
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        for report in &reports {
            match (&report.error, report.origin) {
                (Some(e), _) => println!("✗ {}: {}", report.file, e),
                (None, Some(origin)) => println!(
                    "✓ {}: {}x{} ({})",
                    report.file,
                    report.width.unwrap_or_default(),
                    report.height.unwrap_or_default(),
                    origin
                ),
                (None, None) => {}
            }
        }
    }

    relieve_pressure(service, &config, &thresholds).await;
    service.shutdown();

    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Apply the requested pressure level, or the one memory tier usage implies.
async fn relieve_pressure(
    service: &ThumbnailService,
    config: &GenerateConfig,
    thresholds: &PressureThresholds,
) {
    let stats = service.cache_stats().await;
    let level = config.pressure_after_run(thresholds, stats.memory_cost);
    if level != PressureLevel::Normal {
        info!(
            "Applying {} pressure ({} of {} bytes resident)",
            level, stats.memory_cost, stats.memory_cost_limit
        );
        service.handle_pressure(level).await;
    }
}

// =============================================================================
// Maintenance Commands
// =============================================================================

async fn run_prune(service: &ThumbnailService, config: PruneConfig) -> ExitCode {
    let result = match config.older_than_secs {
        Some(secs) => {
            service
                .disk()
                .prune_older_than(Duration::from_secs(secs))
                .await
        }
        None => service.prune_disk().await,
    };

    match result {
        Ok(removed) => {
            println!("Pruned {} thumbnail(s)", removed);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Prune failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_clear(service: &ThumbnailService) -> ExitCode {
    let before = service.cache_stats().await.disk_count;
    service.force_clear_all_caches().await;
    let after = service.cache_stats().await.disk_count;

    println!("Removed {} thumbnail(s)", before.saturating_sub(after));
    if after > 0 {
        warn!("{} thumbnail(s) could not be removed", after);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run_stats(service: &ThumbnailService, config: StatsConfig) -> ExitCode {
    let stats = service.cache_stats().await;

    if config.json {
        match serde_json::to_string_pretty(&stats) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize statistics: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    println!("Thumbnail Cache");
    println!("═══════════════");
    println!("  Directory:   {}", service.disk().dir().display());
    println!("  Disk:        {} thumbnail(s)", stats.disk_count);
    println!(
        "  Retention:   {}s",
        service.disk().retention().as_secs()
    );
    println!(
        "  Memory:      {} thumbnail(s), {} / {} bytes",
        stats.memory_count, stats.memory_cost, stats.memory_cost_limit
    );
    println!("  Permits:     {} available", stats.permits_available);
    if let Some(oldest_ms) = stats.oldest_in_flight_ms {
        println!(
            "  In flight:   {} (oldest {}ms)",
            stats.in_flight, oldest_ms
        );
    }

    ExitCode::SUCCESS
}
