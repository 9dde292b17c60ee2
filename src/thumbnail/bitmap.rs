//! Decoded thumbnail value handed to callers.

use std::sync::Arc;

use image::DynamicImage;

/// A decoded thumbnail bitmap.
///
/// The pixels are behind an `Arc`, so cloning is cheap and a caller's copy
/// stays valid after the memory tier evicts or clears its own.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    image: Arc<DynamicImage>,
}

impl Thumbnail {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    /// Resident cost in bytes, used by the memory tier's budget.
    pub fn cost(&self) -> usize {
        self.image.as_bytes().len()
    }

    /// Whether two handles share the same pixel buffer.
    pub fn ptr_eq(a: &Thumbnail, b: &Thumbnail) -> bool {
        Arc::ptr_eq(&a.image, &b.image)
    }
}

impl From<DynamicImage> for Thumbnail {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// Dimensions that fit `(width, height)` inside `(max_width, max_height)`.
///
/// Aspect ratio is preserved, sources already inside the box are left alone
/// (no upscaling) and neither side drops below one pixel.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );

    let w = ((width as f64 * scale).round() as u32).clamp(1, max_width.max(1));
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_height.max(1));
    (w, h)
}
