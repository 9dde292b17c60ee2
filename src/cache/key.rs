//! Cache key derivation.
//!
//! A cache key is the canonical string `"{source_id}_{width}x{height}"`. The
//! same string indexes the memory tier, the disk tier and the in-flight
//! registry, so a thumbnail generated once is found by all three.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::ThumbnailError;

/// Longest key that is used verbatim as a file name.
const MAX_VERBATIM_FILE_STEM: usize = 128;

// =============================================================================
// Thumbnail Size
// =============================================================================

/// Requested thumbnail bounding box in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThumbnailSize {
    pub width: u32,
    pub height: u32,
}

impl ThumbnailSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Square bounding box.
    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    /// Returns an error if either dimension is zero.
    pub fn validate(&self) -> Result<(), ThumbnailError> {
        if self.width == 0 || self.height == 0 {
            return Err(ThumbnailError::InvalidSize(self.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for ThumbnailSize {
    type Err = ThumbnailError;

    /// Parses `"WxH"`, e.g. `"200x200"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| ThumbnailError::InvalidSize(s.to_string()))?;

        let width = w
            .parse::<u32>()
            .map_err(|_| ThumbnailError::InvalidSize(s.to_string()))?;
        let height = h
            .parse::<u32>()
            .map_err(|_| ThumbnailError::InvalidSize(s.to_string()))?;

        let size = Self::new(width, height);
        size.validate()?;
        Ok(size)
    }
}

// =============================================================================
// Cache Key
// =============================================================================

/// Canonical key for a (source, size) pair.
///
/// Cheap to clone; the rendered string is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Derive the key for `source_id` rendered at `size`.
    pub fn new(source_id: impl fmt::Display, size: ThumbnailSize) -> Self {
        Self(Arc::from(format!("{}_{}", source_id, size)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File stem used by the disk tier.
    ///
    /// Keys made only of `[A-Za-z0-9._-]` (and not starting with `.`) are used
    /// as-is so cache presence is visible in a directory listing. Anything
    /// else is replaced by the SHA-256 hex digest of the key.
    pub fn file_stem(&self) -> String {
        if is_filename_safe(&self.0) {
            self.0.to_string()
        } else {
            hex::encode(Sha256::digest(self.0.as_bytes()))
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_filename_safe(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_VERBATIM_FILE_STEM
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

// =============================================================================
// Tests
// =============================================================================
