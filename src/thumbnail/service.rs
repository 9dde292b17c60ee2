//! Thumbnail service: the get-or-generate cache facade.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        ThumbnailService                           │
//! │  get_thumbnail():                                                 │
//! │   1. memory tier ──hit──▶ return                                  │
//! │   2. in-flight registry ──running──▶ await shared outcome         │
//! │   3. disk tier ──hit──▶ decode, promote to memory, return         │
//! │   4. register leader, spawn job:                                  │
//! │        permit ▶ generate (timeout) ▶ memory + disk ▶ publish      │
//! │        ┌────────────┐  ┌──────────────────┐  ┌─────────────────┐  │
//! │        │ Limiter    │  │ ThumbnailGenerator│  │ MemoryTier      │  │
//! │        │ (permits)  │  │ (decode/resize/  │  │ DiskTier        │  │
//! │        └────────────┘  │  encode)         │  └─────────────────┘  │
//! │                        └──────────────────┘                       │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Generation runs in a detached task registered in the in-flight registry,
//! so a caller giving up on its request does not cancel work other callers
//! joined. Cache-wide clears abort those tasks. Locks are only held for
//! bookkeeping; decode, resize and encode happen outside them.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::bitmap::Thumbnail;
use super::generator::{
    decode_image, CancellationFlag, ImageThumbnailGenerator, ThumbnailGenerator,
    DEFAULT_JPEG_QUALITY,
};
use super::pressure::PressureLevel;
use crate::cache::{
    CacheKey, DiskTier, MemoryTier, ThumbnailSize, DEFAULT_DISK_RETENTION,
    DEFAULT_MEMORY_COST_LIMIT, DEFAULT_MEMORY_COUNT_LIMIT,
};
use crate::concurrency::{
    GenerationLimiter, InFlightLeader, InFlightRegistry, Outcome, Registration,
    DEFAULT_GENERATION_CONCURRENCY,
};
use crate::error::{DiskError, ThumbnailError};

/// Default time allowed for one generation: 30s
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between preload items.
pub const DEFAULT_PRELOAD_DELAY: Duration = Duration::from_millis(100);

// =============================================================================
// Configuration
// =============================================================================

/// Tunables for [`ThumbnailService`].
#[derive(Debug, Clone)]
pub struct ThumbnailServiceConfig {
    /// Maximum number of thumbnails in the memory tier
    pub memory_count_limit: usize,
    /// Byte budget for the memory tier
    pub memory_cost_limit: usize,
    /// Generations allowed to run at once, process-wide
    pub max_concurrent_generations: usize,
    /// Time allowed for one generation once it holds a permit
    pub generation_timeout: Duration,
    /// Pause between items during preload
    pub preload_delay: Duration,
    /// Age after which disk entries are pruned
    pub disk_retention: Duration,
    /// JPEG quality for the disk tier (1-100)
    pub jpeg_quality: u8,
}

impl Default for ThumbnailServiceConfig {
    fn default() -> Self {
        Self {
            memory_count_limit: DEFAULT_MEMORY_COUNT_LIMIT,
            memory_cost_limit: DEFAULT_MEMORY_COST_LIMIT,
            max_concurrent_generations: DEFAULT_GENERATION_CONCURRENCY,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            preload_delay: DEFAULT_PRELOAD_DELAY,
            disk_retention: DEFAULT_DISK_RETENTION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl ThumbnailServiceConfig {
    pub fn with_memory_limits(mut self, count_limit: usize, cost_limit: usize) -> Self {
        self.memory_count_limit = count_limit;
        self.memory_cost_limit = cost_limit;
        self
    }

    pub fn with_max_concurrent_generations(mut self, permits: usize) -> Self {
        self.max_concurrent_generations = permits;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_preload_delay(mut self, delay: Duration) -> Self {
        self.preload_delay = delay;
        self
    }

    pub fn with_disk_retention(mut self, retention: Duration) -> Self {
        self.disk_retention = retention;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }
}

// =============================================================================
// Responses and Statistics
// =============================================================================

/// Where a thumbnail came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbnailOrigin {
    /// Memory tier hit
    Memory,
    /// Disk tier hit, now promoted to memory
    Disk,
    /// Joined a generation another caller started
    InFlight,
    /// This call started the generation
    Generated,
}

impl fmt::Display for ThumbnailOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThumbnailOrigin::Memory => "memory",
            ThumbnailOrigin::Disk => "disk",
            ThumbnailOrigin::InFlight => "in_flight",
            ThumbnailOrigin::Generated => "generated",
        };
        f.write_str(name)
    }
}

/// A thumbnail together with the path that produced it.
#[derive(Debug, Clone)]
pub struct ThumbnailResponse {
    pub key: CacheKey,
    pub thumbnail: Thumbnail,
    pub origin: ThumbnailOrigin,
}

/// Occupancy snapshot, for observability only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_count: usize,
    pub memory_cost: usize,
    pub memory_cost_limit: usize,
    pub disk_count: usize,
    pub in_flight: usize,
    /// Age of the longest-running generation, if any
    pub oldest_in_flight_ms: Option<u64>,
    pub permits_available: usize,
}

impl CacheStats {
    /// `(memory_count, disk_count)`.
    pub fn counts(&self) -> (usize, usize) {
        (self.memory_count, self.disk_count)
    }
}

// =============================================================================
// Thumbnail Service
// =============================================================================

/// Bounded-concurrency, two-tier thumbnail cache.
///
/// Construct once and share (it is cheap to clone; clones share all state).
///
/// # Example
///
/// ```ignore
/// use thumbnail_engine::{ThumbnailService, ThumbnailServiceConfig, ThumbnailSize};
///
/// let service = ThumbnailService::open("/var/cache/thumbs", ThumbnailServiceConfig::default()).await?;
/// let thumb = service
///     .get_thumbnail("5f0c2d6e", source_bytes, ThumbnailSize::square(200))
///     .await;
/// ```
#[derive(Clone)]
pub struct ThumbnailService {
    memory: Arc<MemoryTier>,
    disk: Arc<DiskTier>,
    in_flight: Arc<InFlightRegistry>,
    limiter: GenerationLimiter,
    generator: Arc<dyn ThumbnailGenerator>,
    config: Arc<ThumbnailServiceConfig>,
    /// Bumped by every clear so jobs started before it do not repopulate
    epoch: Arc<AtomicU64>,
}

impl ThumbnailService {
    /// Open the disk tier at `dir` and build a service with the image generator.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub async fn open(
        dir: impl Into<PathBuf>,
        config: ThumbnailServiceConfig,
    ) -> Result<Self, DiskError> {
        let disk = DiskTier::open_with_retention(dir, config.disk_retention).await?;
        Ok(Self::new(disk, config))
    }

    /// Build a service over an existing disk tier with the image generator.
    pub fn new(disk: DiskTier, config: ThumbnailServiceConfig) -> Self {
        let generator = Arc::new(ImageThumbnailGenerator::with_quality(config.jpeg_quality));
        Self::with_generator(disk, config, generator)
    }

    /// Build a service with a custom generator.
    pub fn with_generator(
        disk: DiskTier,
        config: ThumbnailServiceConfig,
        generator: Arc<dyn ThumbnailGenerator>,
    ) -> Self {
        Self {
            memory: Arc::new(MemoryTier::with_limits(
                config.memory_count_limit,
                config.memory_cost_limit,
            )),
            disk: Arc::new(disk),
            in_flight: Arc::new(InFlightRegistry::new()),
            limiter: GenerationLimiter::new(config.max_concurrent_generations),
            generator,
            config: Arc::new(config),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Memory-only lookup. Never reads disk or starts a generation.
    pub fn get_cached_thumbnail(
        &self,
        source_id: impl fmt::Display,
        size: ThumbnailSize,
    ) -> Option<Thumbnail> {
        self.memory.get(&CacheKey::new(source_id, size))
    }

    /// Get a thumbnail, generating it if no tier has it.
    ///
    /// Failures (bad source bytes, timeout, cancellation) are logged and
    /// resolve to `None`; calling again retries from scratch.
    pub async fn get_thumbnail(
        &self,
        source_id: impl fmt::Display,
        source: Bytes,
        size: ThumbnailSize,
    ) -> Option<Thumbnail> {
        let source_id = source_id.to_string();
        match self.try_get_thumbnail(&source_id, source, size).await {
            Ok(response) => Some(response.thumbnail),
            Err(ThumbnailError::Cancelled) => {
                debug!(source_id = %source_id, %size, "Thumbnail request cancelled");
                None
            }
            Err(e) => {
                warn!(source_id = %source_id, %size, error = %e, "No thumbnail available");
                None
            }
        }
    }

    /// Get a thumbnail and report which path produced it.
    ///
    /// # Errors
    ///
    /// Returns the error that resolved this request (and every request that
    /// joined the same generation).
    pub async fn try_get_thumbnail(
        &self,
        source_id: impl fmt::Display,
        source: Bytes,
        size: ThumbnailSize,
    ) -> Result<ThumbnailResponse, ThumbnailError> {
        size.validate()?;
        let key = CacheKey::new(source_id, size);
        let respond = |key: &CacheKey, thumbnail: Thumbnail, origin| ThumbnailResponse {
            key: key.clone(),
            thumbnail,
            origin,
        };

        if let Some(thumbnail) = self.memory.get(&key) {
            return Ok(respond(&key, thumbnail, ThumbnailOrigin::Memory));
        }

        if let Some(waiter) = self.in_flight.join(&key) {
            let thumbnail = waiter.wait().await?;
            return Ok(respond(&key, thumbnail, ThumbnailOrigin::InFlight));
        }

        if let Some(thumbnail) = self.load_from_disk(&key).await {
            return Ok(respond(&key, thumbnail, ThumbnailOrigin::Disk));
        }

        match self.in_flight.join_or_register(&key) {
            Registration::Joined(waiter) => {
                let thumbnail = waiter.wait().await?;
                Ok(respond(&key, thumbnail, ThumbnailOrigin::InFlight))
            }
            Registration::Leader(leader) => {
                // A generation may have finished between the disk miss and
                // registering; it populates memory before deregistering.
                if let Some(thumbnail) = self.memory.get(&key) {
                    leader.complete(Ok(thumbnail.clone()));
                    return Ok(respond(&key, thumbnail, ThumbnailOrigin::Memory));
                }

                let waiter = leader.waiter();
                self.spawn_generation(leader, source, size);
                let thumbnail = waiter.wait().await?;
                Ok(respond(&key, thumbnail, ThumbnailOrigin::Generated))
            }
        }
    }

    /// Warm the cache for several sources in the background.
    ///
    /// Items are processed one at a time with the configured delay between
    /// them, so preloading holds at most one permit and interactive requests
    /// keep getting served. Sources already in memory are skipped. The
    /// handle resolves to the number of thumbnails that ended up available.
    pub fn preload_thumbnails(
        &self,
        sources: Vec<(String, Bytes)>,
        size: ThumbnailSize,
    ) -> JoinHandle<usize> {
        let service = self.clone();
        let delay = self.config.preload_delay;

        tokio::spawn(async move {
            let total = sources.len();
            let mut loaded = 0usize;

            for (index, (source_id, bytes)) in sources.into_iter().enumerate() {
                let key = CacheKey::new(&source_id, size);
                if service.memory.contains(&key) {
                    loaded += 1;
                    continue;
                }

                if service.get_thumbnail(&source_id, bytes, size).await.is_some() {
                    loaded += 1;
                }

                if index + 1 < total && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            debug!(loaded, total, %size, "Preload finished");
            loaded
        })
    }

    /// Graduated clear: cancel in-flight generations and empty the memory tier.
    ///
    /// The disk tier is left alone.
    pub fn clear_cache(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let cancelled = self.in_flight.cancel_all();
        let dropped = self.memory.len();
        self.memory.clear();
        info!(cancelled, dropped, "Cleared thumbnail memory cache");
    }

    /// Forced clear: everything [`clear_cache`] does, plus wiping the disk tier.
    ///
    /// [`clear_cache`]: ThumbnailService::clear_cache
    pub async fn force_clear_all_caches(&self) {
        self.clear_cache();
        if let Err(e) = self.disk.clear().await {
            warn!(error = %e, "Failed to clear thumbnail disk cache");
        }
    }

    /// Cancel the generation running for one (source, size) pair.
    ///
    /// Callers joined on it resolve to [`ThumbnailError::Cancelled`]; the next
    /// request for the key starts over. Returns whether anything was running.
    pub fn cancel_generation(&self, source_id: impl fmt::Display, size: ThumbnailSize) -> bool {
        let key = CacheKey::new(source_id, size);
        let cancelled = self.in_flight.cancel(&key);
        if cancelled {
            info!(key = %key, "Cancelled thumbnail generation");
        }
        cancelled
    }

    /// Stop generating: cancel in-flight work and refuse new generations.
    ///
    /// Thumbnails already in memory or on disk are still served; misses
    /// resolve to [`ThumbnailError::Cancelled`].
    pub fn shutdown(&self) {
        self.limiter.close();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let cancelled = self.in_flight.cancel_all();
        info!(cancelled, "Thumbnail service shut down");
    }

    /// Whether [`shutdown`] has run.
    ///
    /// [`shutdown`]: ThumbnailService::shutdown
    pub fn is_shut_down(&self) -> bool {
        self.limiter.is_closed()
    }

    /// React to a memory or thermal pressure notification.
    pub async fn handle_pressure(&self, level: PressureLevel) {
        match level {
            PressureLevel::Normal => {
                trace!("Pressure normal, keeping caches");
            }
            PressureLevel::Moderate => {
                info!(%level, "Memory pressure, clearing memory tier");
                self.clear_cache();
            }
            PressureLevel::Critical => {
                warn!(%level, "Critical pressure, clearing all thumbnail caches");
                self.force_clear_all_caches().await;
            }
        }
    }

    /// Delete disk entries older than the configured retention window.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be listed.
    pub async fn prune_disk(&self) -> Result<usize, DiskError> {
        self.disk.prune_older_than(self.config.disk_retention).await
    }

    /// Current occupancy of both tiers.
    pub async fn cache_stats(&self) -> CacheStats {
        let disk_count = match self.disk.len().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to count disk tier entries");
                0
            }
        };

        CacheStats {
            memory_count: self.memory.len(),
            memory_cost: self.memory.cost(),
            memory_cost_limit: self.memory.cost_limit(),
            disk_count,
            in_flight: self.in_flight.len(),
            oldest_in_flight_ms: self
                .in_flight
                .oldest_age()
                .map(|age| age.as_millis() as u64),
            permits_available: self.limiter.available(),
        }
    }

    pub fn config(&self) -> &ThumbnailServiceConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    pub fn disk(&self) -> &DiskTier {
        &self.disk
    }

    pub fn limiter(&self) -> &GenerationLimiter {
        &self.limiter
    }

    /// Number of generations currently registered.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    async fn load_from_disk(&self, key: &CacheKey) -> Option<Thumbnail> {
        let bytes = self.disk.read(key).await?;

        match tokio::task::spawn_blocking(move || decode_image(&bytes)).await {
            Ok(Ok(image)) => {
                let thumbnail = Thumbnail::new(image);
                self.memory.put(key.clone(), thumbnail.clone());
                debug!(key = %key, "Promoted thumbnail from disk tier");
                Some(thumbnail)
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Corrupt disk tier entry, discarding");
                self.disk.remove(key).await;
                None
            }
            Err(e) => {
                error!(key = %key, error = %e, "Disk decode task failed");
                None
            }
        }
    }

    fn spawn_generation(&self, leader: InFlightLeader, source: Bytes, size: ThumbnailSize) {
        let job = GenerationJob {
            memory: self.memory.clone(),
            disk: self.disk.clone(),
            limiter: self.limiter.clone(),
            generator: self.generator.clone(),
            timeout: self.config.generation_timeout,
            epoch: self.epoch.clone(),
            started_epoch: self.epoch.load(Ordering::SeqCst),
        };

        let ticket = leader.ticket();
        let task = tokio::spawn(job.run(leader, source, size));
        self.in_flight.attach(&ticket, task.abort_handle());
    }
}

impl fmt::Debug for ThumbnailService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailService")
            .field("disk", &self.disk)
            .field("limiter", &self.limiter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Generation Job
// =============================================================================

/// Everything a detached generation task needs.
struct GenerationJob {
    memory: Arc<MemoryTier>,
    disk: Arc<DiskTier>,
    limiter: GenerationLimiter,
    generator: Arc<dyn ThumbnailGenerator>,
    timeout: Duration,
    epoch: Arc<AtomicU64>,
    started_epoch: u64,
}

impl GenerationJob {
    async fn run(self, leader: InFlightLeader, source: Bytes, size: ThumbnailSize) {
        let key = leader.key().clone();
        let outcome = self.generate(&key, source, size).await;
        leader.complete(outcome);
    }

    async fn generate(&self, key: &CacheKey, source: Bytes, size: ThumbnailSize) -> Outcome {
        // Held until this function returns, on every path
        let _permit = self.limiter.acquire().await?;

        let cancel = CancellationFlag::new();
        let _cancel_guard = cancel.cancel_on_drop();
        let started = Instant::now();

        let work = self.generator.generate(source, size, cancel.clone());
        let rendered = match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(key = %key, timeout = ?self.timeout, "Thumbnail generation timed out");
                return Err(ThumbnailError::Timeout {
                    key: key.to_string(),
                    after: self.timeout,
                });
            }
        };

        if !self.store_in_memory(key, &rendered.thumbnail) {
            debug!(key = %key, "Cache cleared during generation, not storing");
            return Err(ThumbnailError::Cancelled);
        }

        if let Err(e) = self.disk.write(key, &rendered.encoded).await {
            warn!(key = %key, error = %e, "Failed to write thumbnail to disk tier");
        }

        debug!(
            key = %key,
            width = rendered.thumbnail.width(),
            height = rendered.thumbnail.height(),
            elapsed = ?started.elapsed(),
            "Generated thumbnail"
        );
        Ok(rendered.thumbnail)
    }

    fn is_current(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) == self.started_epoch
    }

    /// Put the result in the memory tier unless a clear ran since the job
    /// started.
    ///
    /// The epoch is checked again after the put: a clear that lands between
    /// the first check and the put must not leave this entry behind.
    fn store_in_memory(&self, key: &CacheKey, thumbnail: &Thumbnail) -> bool {
        if !self.is_current() {
            return false;
        }
        self.memory.put(key.clone(), thumbnail.clone());
        if !self.is_current() {
            self.memory.remove_if_same(key, thumbnail);
            return false;
        }
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
