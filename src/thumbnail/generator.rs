//! Thumbnail generation pipeline.
//!
//! Source bytes go through three stages:
//!
//! 1. **Decode** the source image (format is sniffed from the bytes)
//! 2. **Resize** to fit the requested box, preserving aspect ratio
//! 3. **Encode** to JPEG for the disk tier
//!
//! The work is CPU bound, so [`ImageThumbnailGenerator`] runs it on tokio's
//! blocking pool and checks a [`CancellationFlag`] between stages. The
//! generator sits behind the [`ThumbnailGenerator`] trait so the cache facade
//! can be driven by other renderers.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};

use super::bitmap::{fit_within, Thumbnail};
use crate::cache::ThumbnailSize;
use crate::error::ThumbnailError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Resampling filter used when downscaling.
const RESIZE_FILTER: FilterType = FilterType::Triangle;

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation signal shared with a running generation.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once the flag is set.
    pub fn check(&self) -> Result<(), ThumbnailError> {
        if self.is_cancelled() {
            Err(ThumbnailError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Guard that sets the flag when dropped.
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

/// Sets its [`CancellationFlag`] on drop.
pub struct CancelOnDrop(CancellationFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

// =============================================================================
// Generator Trait
// =============================================================================

/// Output of one generation.
#[derive(Debug, Clone)]
pub struct RenderedThumbnail {
    /// Decoded bitmap for the memory tier and the caller
    pub thumbnail: Thumbnail,
    /// Encoded bytes for the disk tier
    pub encoded: Bytes,
}

/// Turns source image bytes into a thumbnail.
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    /// Render `source` to fit within `size`.
    ///
    /// Implementations should stop early with [`ThumbnailError::Cancelled`]
    /// once `cancel` is set.
    async fn generate(
        &self,
        source: Bytes,
        size: ThumbnailSize,
        cancel: CancellationFlag,
    ) -> Result<RenderedThumbnail, ThumbnailError>;
}

// =============================================================================
// Image Generator
// =============================================================================

/// Default generator built on the `image` crate.
///
/// # Example
///
/// ```ignore
/// use thumbnail_engine::thumbnail::{ImageThumbnailGenerator, ThumbnailGenerator, CancellationFlag};
/// use thumbnail_engine::ThumbnailSize;
///
/// let generator = ImageThumbnailGenerator::new();
/// let rendered = generator
///     .generate(source_bytes, ThumbnailSize::square(200), CancellationFlag::new())
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct ImageThumbnailGenerator {
    quality: u8,
}

impl ImageThumbnailGenerator {
    /// Create a generator with the default JPEG quality.
    pub fn new() -> Self {
        Self::with_quality(DEFAULT_JPEG_QUALITY)
    }

    /// Create a generator encoding at `quality` (clamped to 1-100).
    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Run the full pipeline on the current thread.
    pub fn render(
        &self,
        source: &[u8],
        size: ThumbnailSize,
        cancel: &CancellationFlag,
    ) -> Result<RenderedThumbnail, ThumbnailError> {
        size.validate()?;

        let decoded = decode_image(source)?;
        cancel.check()?;

        let resized = self.resize(decoded, size);
        cancel.check()?;

        let encoded = encode_jpeg(&resized, self.quality)?;
        cancel.check()?;

        Ok(RenderedThumbnail {
            thumbnail: Thumbnail::new(resized),
            encoded,
        })
    }

    fn resize(&self, image: DynamicImage, size: ThumbnailSize) -> DynamicImage {
        let (w, h) = fit_within(image.width(), image.height(), size.width, size.height);
        let resized = if (w, h) == (image.width(), image.height()) {
            image
        } else {
            image.resize_exact(w, h, RESIZE_FILTER)
        };
        // JPEG has no alpha; keep memory and disk copies in the same space
        DynamicImage::ImageRgb8(resized.into_rgb8())
    }
}

impl Default for ImageThumbnailGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThumbnailGenerator for ImageThumbnailGenerator {
    async fn generate(
        &self,
        source: Bytes,
        size: ThumbnailSize,
        cancel: CancellationFlag,
    ) -> Result<RenderedThumbnail, ThumbnailError> {
        let generator = self.clone();
        tokio::task::spawn_blocking(move || generator.render(&source, size, &cancel))
            .await
            .map_err(|e| ThumbnailError::TaskFailed(e.to_string()))?
    }
}

// =============================================================================
// Codec Helpers
// =============================================================================

/// Decode image bytes, sniffing the format.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ThumbnailError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ThumbnailError::Decode {
            message: e.to_string(),
        })?;

    reader.decode().map_err(|e| ThumbnailError::Decode {
        message: e.to_string(),
    })
}

/// Encode an image as JPEG at `quality`.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Bytes, ThumbnailError> {
    let rgb = image.to_rgb8();
    let mut output = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut output, clamp_quality(quality));

    encoder
        .encode_image(&rgb)
        .map_err(|e| ThumbnailError::Encode {
            message: e.to_string(),
        })?;

    Ok(Bytes::from(output))
}

/// Validate JPEG quality parameter.
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to the valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
