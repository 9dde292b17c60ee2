//! Process-wide bound on simultaneous thumbnail generations.
//!
//! Generation is CPU and I/O heavy and competes with foreground work; the
//! default capacity is two. Waiters are served in FIFO order (tokio's
//! semaphore is fair).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::ThumbnailError;

/// Default number of generations allowed to run at once.
pub const DEFAULT_GENERATION_CONCURRENCY: usize = 2;

/// Counting semaphore gating generation work.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct GenerationLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_use: Arc<AtomicUsize>,
}

/// A held permit. Dropping it returns the permit to the pool.
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl GenerationLimiter {
    /// Create a limiter with `capacity` permits (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_use: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a permit.
    ///
    /// # Errors
    ///
    /// Returns [`ThumbnailError::Cancelled`] if the limiter was closed.
    pub async fn acquire(&self) -> Result<LimiterPermit, ThumbnailError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ThumbnailError::Cancelled)?;

        let held = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(held, capacity = self.capacity, "Acquired generation permit");

        Ok(LimiterPermit {
            _permit: permit,
            in_use: self.in_use.clone(),
        })
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<LimiterPermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        self.in_use.fetch_add(1, Ordering::SeqCst);
        Some(LimiterPermit {
            _permit: permit,
            in_use: self.in_use.clone(),
        })
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse all current and future waiters.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

impl Default for GenerationLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_GENERATION_CONCURRENCY)
    }
}

impl std::fmt::Debug for GenerationLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationLimiter")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}
