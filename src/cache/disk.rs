//! Filesystem-backed disk tier for encoded thumbnails.
//!
//! The cache directory is flat: one `<file_stem>.jpg` per cache key. There is
//! no index file; the directory listing is the index. Entry age is the file's
//! modification time, which is what age-based pruning compares against.
//!
//! Writes land in a uniquely named `.partial` sibling first and are renamed
//! into place, so a concurrent reader sees either the previous state or a
//! complete file, and concurrent writers of one key never share a temp file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info, trace, warn};

use super::key::CacheKey;
use crate::error::DiskError;

/// Extension of committed cache entries.
pub const THUMBNAIL_EXTENSION: &str = "jpg";

/// Extension of writes that have not been renamed into place yet.
const PARTIAL_EXTENSION: &str = "partial";

/// Distinguishes temp files of writes racing on the same key.
static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Default retention window for age-based pruning: 7 days
pub const DEFAULT_DISK_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Durable cache of encoded thumbnail bytes.
pub struct DiskTier {
    dir: PathBuf,
    retention: Duration,
}

impl DiskTier {
    /// Open (creating if needed) a disk tier rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, DiskError> {
        Self::open_with_retention(dir, DEFAULT_DISK_RETENTION).await
    }

    /// Open a disk tier with a custom retention window for [`prune_expired`].
    ///
    /// [`prune_expired`]: DiskTier::prune_expired
    pub async fn open_with_retention(
        dir: impl Into<PathBuf>,
        retention: Duration,
    ) -> Result<Self, DiskError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| DiskError::Directory {
                path: dir.display().to_string(),
                message: e.to_string(),
            })?;

        debug!(dir = %dir.display(), ?retention, "Opened disk tier");
        Ok(Self { dir, retention })
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Path of the committed file for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}.{}", key.file_stem(), THUMBNAIL_EXTENSION))
    }

    /// A fresh temp path for a write of `key`, unique within this process and
    /// across processes sharing the directory.
    fn partial_path_for(&self, key: &CacheKey) -> PathBuf {
        let n = PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}.{}-{}.{}",
            key.file_stem(),
            std::process::id(),
            n,
            PARTIAL_EXTENSION
        ))
    }

    /// Read the encoded bytes for `key`.
    ///
    /// A missing file is a plain miss. Other read failures are logged and also
    /// reported as a miss.
    pub async fn read(&self, key: &CacheKey) -> Option<Bytes> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk tier hit");
                Some(Bytes::from(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(key = %key, "Disk tier miss");
                None
            }
            Err(e) => {
                warn!(key = %key, path = %path.display(), error = %e, "Failed to read disk tier entry");
                None
            }
        }
    }

    /// Check presence without reading the file.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }

    /// Persist the encoded bytes for `key`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or renamed into place.
    /// Callers on the generation path log and ignore it.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), DiskError> {
        let path = self.path_for(key);
        let partial = self.partial_path_for(key);

        if let Err(e) = fs::write(&partial, bytes).await {
            let _ = fs::remove_file(&partial).await;
            return Err(DiskError::Io(format!(
                "Failed to write {}: {}",
                partial.display(),
                e
            )));
        }

        if let Err(e) = fs::rename(&partial, &path).await {
            let _ = fs::remove_file(&partial).await;
            return Err(DiskError::Io(format!(
                "Failed to move {} into place: {}",
                path.display(),
                e
            )));
        }

        debug!(key = %key, path = %path.display(), size = bytes.len(), "Stored thumbnail in disk tier");
        Ok(())
    }

    /// Delete the entry for `key`. Returns whether a file was removed.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Removed disk tier entry");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to remove disk tier entry");
                false
            }
        }
    }

    /// Delete entries last written longer than `max_age` ago.
    ///
    /// Files that vanish or cannot be removed mid-sweep are skipped. Returns
    /// the number of files removed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory itself cannot be listed.
    pub async fn prune_older_than(&self, max_age: Duration) -> Result<usize, DiskError> {
        let now = SystemTime::now();
        let mut removed = 0usize;

        let mut entries = self.read_dir().await?;
        while let Some(entry) = self.next_listed(&mut entries, "prune").await {
            let path = entry.path();
            if !is_cache_file(&path) {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    trace!(path = %path.display(), error = %e, "Skipping entry without metadata");
                    continue;
                }
            };

            // Timestamps in the future count as fresh
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), ?age, "Pruned expired thumbnail");
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to prune thumbnail");
                }
            }
        }

        if removed > 0 {
            info!(removed, ?max_age, "Pruned disk tier");
        }
        Ok(removed)
    }

    /// Prune using the configured retention window.
    pub async fn prune_expired(&self) -> Result<usize, DiskError> {
        self.prune_older_than(self.retention).await
    }

    /// Delete every cached file. Returns the number of files removed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory cannot be listed.
    pub async fn clear(&self) -> Result<usize, DiskError> {
        let mut removed = 0usize;

        let mut entries = self.read_dir().await?;
        while let Some(entry) = self.next_listed(&mut entries, "clear").await {
            let path = entry.path();
            if !is_cache_file(&path) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove cache file");
                }
            }
        }

        info!(removed, dir = %self.dir.display(), "Cleared disk tier");
        Ok(removed)
    }

    /// Number of committed entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed to the end.
    pub async fn len(&self) -> Result<usize, DiskError> {
        let mut count = 0usize;
        let mut entries = self.read_dir().await?;
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    if has_extension(&entry.path(), THUMBNAIL_EXTENSION) {
                        count += 1;
                    }
                }
                Ok(None) => return Ok(count),
                Err(e) => return Err(self.directory_error(e)),
            }
        }
    }

    pub async fn is_empty(&self) -> Result<bool, DiskError> {
        Ok(self.len().await? == 0)
    }

    async fn read_dir(&self) -> Result<fs::ReadDir, DiskError> {
        fs::read_dir(&self.dir)
            .await
            .map_err(|e| self.directory_error(e))
    }

    /// Next entry of a sweep. A listing error ends the sweep early with a
    /// warning; entries already handled stay handled.
    async fn next_listed(&self, entries: &mut fs::ReadDir, sweep: &str) -> Option<fs::DirEntry> {
        match entries.next_entry().await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    dir = %self.dir.display(),
                    sweep,
                    error = %e,
                    "Directory listing failed, stopping sweep"
                );
                None
            }
        }
    }

    fn directory_error(&self, e: std::io::Error) -> DiskError {
        DiskError::Directory {
            path: self.dir.display().to_string(),
            message: e.to_string(),
        }
    }
}

impl std::fmt::Debug for DiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskTier")
            .field("dir", &self.dir)
            .field("retention", &self.retention)
            .finish()
    }
}

/// Default cache directory (platform cache dir, or the temp dir).
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "thumbnail-engine", "thumbnail-engine").map_or_else(
        || std::env::temp_dir().join("thumbnail-engine").join("thumbnails"),
        |dirs| dirs.cache_dir().join("thumbnails"),
    )
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

fn is_cache_file(path: &Path) -> bool {
    has_extension(path, THUMBNAIL_EXTENSION) || has_extension(path, PARTIAL_EXTENSION)
}

// =============================================================================
// Tests
// =============================================================================
