use std::time::Duration;

use thiserror::Error;

/// Errors from the filesystem-backed disk tier
#[derive(Debug, Clone, Error)]
pub enum DiskError {
    /// The cache directory could not be created or listed
    #[error("Cache directory error at {path}: {message}")]
    Directory { path: String, message: String },

    /// Reading, writing or removing a cache file failed
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors that can resolve a thumbnail request to "no thumbnail available".
///
/// All variants are local and non-fatal. They are `Clone` so the outcome of a
/// single generation can be handed to every caller that joined it.
#[derive(Debug, Clone, Error)]
pub enum ThumbnailError {
    /// Requested dimensions are unusable (zero width or height, bad syntax)
    #[error("Invalid thumbnail size: {0}")]
    InvalidSize(String),

    /// Source bytes are not a decodable image
    #[error("Failed to decode source image: {message}")]
    Decode { message: String },

    /// Rendered thumbnail could not be encoded
    #[error("Failed to encode thumbnail: {message}")]
    Encode { message: String },

    /// The generation pipeline exceeded its time allowance
    #[error("Thumbnail generation for {key} timed out after {after:?}")]
    Timeout { key: String, after: Duration },

    /// The generation was cancelled by a cache-wide clear, an explicit
    /// cancel, or service shutdown
    #[error("Thumbnail generation cancelled")]
    Cancelled,

    /// The blocking worker running the pipeline panicked or was dropped
    #[error("Generation task failed: {0}")]
    TaskFailed(String),
}

impl ThumbnailError {
    /// Whether this error came from the time allowance running out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ThumbnailError::Timeout { .. })
    }
}
