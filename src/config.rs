//! Configuration for the `thumbnail-engine` binary.
//!
//! Options come from command-line arguments or `THUMB_`-prefixed environment
//! variables, with defaults for everything:
//!
//! - `THUMB_CACHE_DIR` - Disk tier directory (default: platform cache dir)
//! - `THUMB_MEMORY_ENTRIES` - Max thumbnails in memory (default: 200)
//! - `THUMB_MEMORY_BYTES` - Memory tier byte budget (default: 64MB)
//! - `THUMB_MAX_CONCURRENT` - Concurrent generations (default: 2)
//! - `THUMB_TIMEOUT_SECS` - Per-generation timeout (default: 30)
//! - `THUMB_PRELOAD_DELAY_MS` - Pause between preload items (default: 100)
//! - `THUMB_RETENTION_SECS` - Disk retention window (default: 7 days)
//! - `THUMB_JPEG_QUALITY` - Disk tier JPEG quality (default: 80)
//! - `THUMB_PRESSURE_MODERATE_PERCENT` / `THUMB_PRESSURE_CRITICAL_PERCENT` -
//!   Share of the memory budget that counts as moderate / critical pressure
//!   (default: 80 / 95)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::cache::{
    default_cache_dir, ThumbnailSize, DEFAULT_DISK_RETENTION, DEFAULT_MEMORY_COST_LIMIT,
    DEFAULT_MEMORY_COUNT_LIMIT,
};
use crate::concurrency::DEFAULT_GENERATION_CONCURRENCY;
use crate::thumbnail::{
    is_valid_quality, PressureLevel, PressureThresholds, ThumbnailServiceConfig,
    DEFAULT_CRITICAL_PRESSURE_PERCENT, DEFAULT_GENERATION_TIMEOUT, DEFAULT_JPEG_QUALITY,
    DEFAULT_MODERATE_PRESSURE_PERCENT, DEFAULT_PRELOAD_DELAY,
};

/// Longest accepted generation timeout: 10 minutes
const MAX_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Thumbnail Engine - bounded-concurrency, two-tier thumbnail cache.
#[derive(Parser, Debug, Clone)]
#[command(name = "thumbnail-engine")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub cache: CacheConfig,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Get or generate thumbnails for image files.
    Generate(GenerateConfig),

    /// Delete disk entries older than the retention window.
    Prune(PruneConfig),

    /// Delete every disk tier entry.
    Clear,

    /// Show disk tier occupancy.
    Stats(StatsConfig),
}

/// Cache settings shared by all subcommands.
#[derive(Args, Debug, Clone)]
pub struct CacheConfig {
    /// Directory for the disk tier.
    ///
    /// Defaults to the platform cache directory.
    #[arg(long, global = true, env = "THUMB_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of thumbnails kept in memory.
    #[arg(long, default_value_t = DEFAULT_MEMORY_COUNT_LIMIT, env = "THUMB_MEMORY_ENTRIES")]
    pub memory_entries: usize,

    /// Byte budget for decoded thumbnails in memory.
    #[arg(long, default_value_t = DEFAULT_MEMORY_COST_LIMIT, env = "THUMB_MEMORY_BYTES")]
    pub memory_bytes: usize,

    /// Generations allowed to run at once.
    #[arg(long, default_value_t = DEFAULT_GENERATION_CONCURRENCY, env = "THUMB_MAX_CONCURRENT")]
    pub max_concurrent: usize,

    /// Time allowed for one generation, in seconds.
    #[arg(long, default_value_t = DEFAULT_GENERATION_TIMEOUT.as_secs(), env = "THUMB_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    /// Pause between preload items, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_PRELOAD_DELAY.as_millis() as u64, env = "THUMB_PRELOAD_DELAY_MS")]
    pub preload_delay_ms: u64,

    /// Age after which disk entries are pruned, in seconds.
    #[arg(long, default_value_t = DEFAULT_DISK_RETENTION.as_secs(), env = "THUMB_RETENTION_SECS")]
    pub retention_secs: u64,

    /// JPEG quality for the disk tier (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "THUMB_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Share of the memory budget (percent) that counts as moderate pressure.
    #[arg(long, default_value_t = DEFAULT_MODERATE_PRESSURE_PERCENT, env = "THUMB_PRESSURE_MODERATE_PERCENT")]
    pub pressure_moderate_percent: u8,

    /// Share of the memory budget (percent) that counts as critical pressure.
    #[arg(long, default_value_t = DEFAULT_CRITICAL_PRESSURE_PERCENT, env = "THUMB_PRESSURE_CRITICAL_PERCENT")]
    pub pressure_critical_percent: u8,
}

/// Arguments for `generate`.
#[derive(Args, Debug, Clone)]
pub struct GenerateConfig {
    /// Source image files. The file name is used as the source id.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Thumbnail bounding box, as WIDTHxHEIGHT.
    #[arg(short, long, default_value = "200x200")]
    pub size: ThumbnailSize,

    /// Warm the cache sequentially (throttled) instead of all at once.
    #[arg(long, default_value_t = false)]
    pub preload: bool,

    /// Pressure level to apply once all files are processed
    /// (normal, moderate or critical).
    ///
    /// Without it, memory tier usage is classified against the configured
    /// thresholds and at most a graduated clear is applied.
    #[arg(long)]
    pub pressure: Option<PressureLevel>,

    /// Print results as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Arguments for `prune`.
#[derive(Args, Debug, Clone)]
pub struct PruneConfig {
    /// Override the retention window, in seconds.
    #[arg(long)]
    pub older_than_secs: Option<u64>,
}

/// Arguments for `stats`.
#[derive(Args, Debug, Clone)]
pub struct StatsConfig {
    /// Print statistics as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl CacheConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_entries == 0 {
            return Err("memory_entries must be greater than 0".to_string());
        }
        if self.memory_bytes == 0 {
            return Err("memory_bytes must be greater than 0".to_string());
        }
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".to_string());
        }
        if self.timeout_secs == 0 || self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(format!(
                "timeout_secs must be between 1 and {}",
                MAX_TIMEOUT_SECS
            ));
        }
        if self.retention_secs == 0 {
            return Err("retention_secs must be greater than 0".to_string());
        }
        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        for (name, percent) in [
            ("pressure_moderate_percent", self.pressure_moderate_percent),
            ("pressure_critical_percent", self.pressure_critical_percent),
        ] {
            if percent == 0 || percent > 100 {
                return Err(format!("{} must be between 1 and 100", name));
            }
        }
        self.pressure_thresholds().validate()?;

        Ok(())
    }

    /// The disk tier directory, falling back to the platform default.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// Library configuration for [`crate::ThumbnailService`].
    pub fn service_config(&self) -> ThumbnailServiceConfig {
        ThumbnailServiceConfig::default()
            .with_memory_limits(self.memory_entries, self.memory_bytes)
            .with_max_concurrent_generations(self.max_concurrent)
            .with_generation_timeout(Duration::from_secs(self.timeout_secs))
            .with_preload_delay(Duration::from_millis(self.preload_delay_ms))
            .with_disk_retention(Duration::from_secs(self.retention_secs))
            .with_jpeg_quality(self.jpeg_quality)
    }

    /// Pressure thresholds as byte counts within the memory budget.
    pub fn pressure_thresholds(&self) -> PressureThresholds {
        PressureThresholds::for_budget(
            self.memory_bytes,
            self.pressure_moderate_percent,
            self.pressure_critical_percent,
        )
    }
}

impl GenerateConfig {
    /// Pressure level to apply after a run that left `memory_cost` bytes
    /// resident.
    ///
    /// An explicit `--pressure` wins. A level derived from usage is capped at
    /// [`PressureLevel::Moderate`], so a run never wipes the disk entries it
    /// just wrote.
    pub fn pressure_after_run(
        &self,
        thresholds: &PressureThresholds,
        memory_cost: usize,
    ) -> PressureLevel {
        match self.pressure {
            Some(level) => level,
            None => thresholds
                .classify(memory_cost as u64)
                .min(PressureLevel::Moderate),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
