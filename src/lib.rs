//! # Thumbnail Engine
//!
//! A bounded-concurrency, two-tier thumbnail cache.
//!
//! Given an opaque source identifier, the source image bytes and a target
//! size, the engine returns a downscaled thumbnail. Results are cached in a
//! cost-bounded in-memory LRU and in a directory of encoded files, concurrent
//! requests for the same key share a single generation, and the number of
//! generations running at once is capped process-wide.
//!
//! ## Features
//!
//! - **Two-tier caching**: memory tier bounded by entry count and byte cost,
//!   disk tier with age-based pruning
//! - **Request coalescing**: at most one generation per key at any time
//! - **Bounded concurrency**: FIFO permit queue (2 generations by default)
//! - **Timeouts**: every generation gets a fixed time allowance
//! - **Pressure handling**: graduated and forced cache clears
//!
//! ## Architecture
//!
//! - [`cache`] - Cache keys, memory tier and disk tier
//! - [`concurrency`] - Generation limiter and in-flight registry
//! - [`thumbnail`] - Generation pipeline and the [`ThumbnailService`] facade
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use thumbnail_engine::{ThumbnailService, ThumbnailServiceConfig, ThumbnailSize};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = ThumbnailService::open("/tmp/thumbs", ThumbnailServiceConfig::default())
//!         .await
//!         .expect("cache directory");
//!
//!     let source = Bytes::from(std::fs::read("photo.jpg").expect("source image"));
//!     if let Some(thumb) = service
//!         .get_thumbnail("photo-42", source, ThumbnailSize::square(200))
//!         .await
//!     {
//!         println!("{}x{}", thumb.width(), thumb.height());
//!     }
//! }
//! ```

pub mod cache;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod thumbnail;

// Re-export commonly used types
pub use cache::{
    default_cache_dir, CacheKey, DiskTier, MemoryTier, ThumbnailSize, DEFAULT_DISK_RETENTION,
    DEFAULT_MEMORY_COST_LIMIT, DEFAULT_MEMORY_COUNT_LIMIT, THUMBNAIL_EXTENSION,
};
pub use concurrency::{
    GenerationLimiter, InFlightRegistry, LimiterPermit, Registration,
    DEFAULT_GENERATION_CONCURRENCY,
};
pub use config::{CacheConfig, Cli, Command, GenerateConfig, PruneConfig, StatsConfig};
pub use error::{DiskError, ThumbnailError};
pub use thumbnail::{
    fit_within, CacheStats, CancellationFlag, ImageThumbnailGenerator, PressureLevel,
    PressureThresholds, RenderedThumbnail, Thumbnail, ThumbnailGenerator, ThumbnailOrigin,
    ThumbnailResponse, ThumbnailService, ThumbnailServiceConfig, DEFAULT_GENERATION_TIMEOUT,
    DEFAULT_JPEG_QUALITY,
};
