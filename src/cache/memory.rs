//! In-process memory tier for decoded thumbnails.
//!
//! An LRU map bounded two ways:
//! - entry count (the LRU capacity)
//! - total byte cost of the resident bitmaps
//!
//! Inserting past either bound evicts least-recently-used entries until the
//! new entry fits. Lookups hand out cheap `Thumbnail` clones, never references
//! into the map, so eviction cannot invalidate a result already returned.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::key::CacheKey;
use crate::thumbnail::Thumbnail;

/// Default maximum number of resident thumbnails.
pub const DEFAULT_MEMORY_COUNT_LIMIT: usize = 200;

/// Default byte budget for resident thumbnails: 64MB
pub const DEFAULT_MEMORY_COST_LIMIT: usize = 64 * 1024 * 1024;

struct MemoryState {
    entries: LruCache<CacheKey, Thumbnail>,
    total_cost: usize,
}

/// Count- and cost-bounded LRU cache of decoded thumbnails.
///
/// # Thread Safety
///
/// All operations take a short internal lock and never await, so the tier can
/// be read from synchronous code and shared across tasks via `Arc`.
pub struct MemoryTier {
    state: Mutex<MemoryState>,
    count_limit: NonZeroUsize,
    cost_limit: usize,
}

impl MemoryTier {
    /// Create a memory tier with default limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MEMORY_COUNT_LIMIT, DEFAULT_MEMORY_COST_LIMIT)
    }

    /// Create a memory tier with the given entry count and byte cost limits.
    ///
    /// A count limit of zero is treated as one.
    pub fn with_limits(count_limit: usize, cost_limit: usize) -> Self {
        let count_limit = NonZeroUsize::new(count_limit).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::new(count_limit),
                total_cost: 0,
            }),
            count_limit,
            cost_limit,
        }
    }

    /// Look up a thumbnail, marking it as recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Thumbnail> {
        let mut state = self.state.lock();
        let hit = state.entries.get(key).cloned();
        if hit.is_some() {
            trace!(key = %key, "Memory tier hit");
        } else {
            trace!(key = %key, "Memory tier miss");
        }
        hit
    }

    /// Check residency without touching LRU order.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Insert or replace a thumbnail.
    ///
    /// Least-recently-used entries are evicted until both the count and cost
    /// limits hold with the new entry in place. A thumbnail that alone exceeds
    /// the cost limit is not admitted; returns whether it was stored.
    pub fn put(&self, key: CacheKey, thumbnail: Thumbnail) -> bool {
        let cost = thumbnail.cost();
        if cost > self.cost_limit {
            debug!(
                key = %key,
                cost,
                cost_limit = self.cost_limit,
                "Thumbnail larger than memory budget, not cached"
            );
            return false;
        }

        let mut state = self.state.lock();

        if let Some(old) = state.entries.pop(&key) {
            state.total_cost = state.total_cost.saturating_sub(old.cost());
        }

        let mut evicted = 0usize;
        while state.total_cost + cost > self.cost_limit
            || state.entries.len() >= self.count_limit.get()
        {
            match state.entries.pop_lru() {
                Some((_, old)) => {
                    state.total_cost = state.total_cost.saturating_sub(old.cost());
                    evicted += 1;
                }
                None => break,
            }
        }

        state.entries.put(key.clone(), thumbnail);
        state.total_cost += cost;

        if evicted > 0 {
            debug!(key = %key, evicted, "Evicted thumbnails from memory tier");
        }
        trace!(key = %key, cost, total_cost = state.total_cost, "Stored thumbnail in memory tier");
        true
    }

    /// Remove a single entry.
    pub fn remove(&self, key: &CacheKey) -> Option<Thumbnail> {
        let mut state = self.state.lock();
        let removed = state.entries.pop(key)?;
        state.total_cost = state.total_cost.saturating_sub(removed.cost());
        Some(removed)
    }

    /// Remove `key` only if it still holds this exact thumbnail.
    ///
    /// A newer thumbnail stored under the same key is left alone.
    pub fn remove_if_same(&self, key: &CacheKey, thumbnail: &Thumbnail) -> bool {
        let mut state = self.state.lock();
        match state.entries.peek(key) {
            Some(current) if Thumbnail::ptr_eq(current, thumbnail) => {}
            _ => return false,
        }
        if let Some(removed) = state.entries.pop(key) {
            state.total_cost = state.total_cost.saturating_sub(removed.cost());
        }
        true
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_cost = 0;
    }

    /// Number of resident thumbnails.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total resident cost in bytes.
    pub fn cost(&self) -> usize {
        self.state.lock().total_cost
    }

    pub fn count_limit(&self) -> usize {
        self.count_limit.get()
    }

    pub fn cost_limit(&self) -> usize {
        self.cost_limit
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
