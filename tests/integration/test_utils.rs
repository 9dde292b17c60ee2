//! Test utilities for integration tests.
//!
//! This module provides an instrumented generator and helpers for building
//! source images and services over temporary cache directories.

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use thumbnail_engine::thumbnail::{
    CancellationFlag, ImageThumbnailGenerator, RenderedThumbnail, ThumbnailGenerator,
};
use thumbnail_engine::{
    DiskTier, ThumbnailError, ThumbnailService, ThumbnailServiceConfig, ThumbnailSize,
};

// =============================================================================
// Tracking Generator
// =============================================================================

/// A generator that wraps the real pipeline and records how it is driven.
///
/// An optional delay runs before the pipeline so tests can hold generations
/// open, trip timeouts and observe how many run at once.
pub struct TrackingGenerator {
    inner: ImageThumbnailGenerator,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
    running: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

impl TrackingGenerator {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: ImageThumbnailGenerator::new(),
            delay_ms: AtomicU64::new(delay.as_millis() as u64),
            calls: AtomicUsize::new(0),
            running: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of times the pipeline was entered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Generations currently inside the pipeline.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of generations observed running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the running count even when the generation future is dropped.
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ThumbnailGenerator for TrackingGenerator {
    async fn generate(
        &self,
        source: Bytes,
        size: ThumbnailSize,
        cancel: CancellationFlag,
    ) -> Result<RenderedThumbnail, ThumbnailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(Arc::clone(&self.running));

        let delay = Duration::from_millis(self.delay_ms.load(Ordering::SeqCst));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.inner.generate(source, size, cancel).await
    }
}

// =============================================================================
// Service Helpers
// =============================================================================

/// Build a service over `dir` driven by `generator`.
pub async fn service_with(
    dir: &TempDir,
    config: ThumbnailServiceConfig,
    generator: &Arc<TrackingGenerator>,
) -> ThumbnailService {
    let disk = DiskTier::open_with_retention(dir.path(), config.disk_retention)
        .await
        .unwrap();
    ThumbnailService::with_generator(disk, config, generator.clone())
}

/// Service with default configuration and an undelayed tracking generator.
pub async fn default_service(dir: &TempDir) -> (ThumbnailService, Arc<TrackingGenerator>) {
    let generator = TrackingGenerator::new();
    let service = service_with(dir, ThumbnailServiceConfig::default(), &generator).await;
    (service, generator)
}

// =============================================================================
// Source Images
// =============================================================================

/// Create a PNG with a gradient pattern.
pub fn create_test_png(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    Bytes::from(buf)
}

/// Bytes no decoder accepts.
pub fn garbage_source() -> Bytes {
    Bytes::from_static(b"this is not an image at all")
}

/// Check if data starts with a JPEG SOI marker.
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}
