//! Thumbnail generation and the cache facade.
//!
//! # Components
//!
//! - [`ThumbnailService`]: get-or-generate entry point, cache-wide clears,
//!   preload and statistics
//! - [`ThumbnailGenerator`]: decode → resize → encode pipeline seam, with
//!   [`ImageThumbnailGenerator`] as the default implementation
//! - [`Thumbnail`]: decoded bitmap handle returned to callers
//! - [`PressureLevel`]: severity of memory/thermal pressure notifications

mod bitmap;
mod generator;
mod pressure;
mod service;

pub use bitmap::{fit_within, Thumbnail};
pub use generator::{
    clamp_quality, decode_image, encode_jpeg, is_valid_quality, CancelOnDrop, CancellationFlag,
    ImageThumbnailGenerator, RenderedThumbnail, ThumbnailGenerator, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use pressure::{
    PressureLevel, PressureThresholds, DEFAULT_CRITICAL_PRESSURE_PERCENT,
    DEFAULT_MODERATE_PRESSURE_PERCENT,
};
pub use service::{
    CacheStats, ThumbnailOrigin, ThumbnailResponse, ThumbnailService, ThumbnailServiceConfig,
    DEFAULT_GENERATION_TIMEOUT, DEFAULT_PRELOAD_DELAY,
};
