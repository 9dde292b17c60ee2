//! Cache tiers and key derivation.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            ThumbnailService             │
//! └──────────┬──────────────────┬───────────┘
//!            │                  │
//!            ▼                  ▼
//! ┌────────────────────┐ ┌────────────────────┐
//! │    MemoryTier      │ │     DiskTier       │
//! │  (decoded, LRU,    │ │  (encoded JPEG,    │
//! │   count + bytes)   │ │   age pruning)     │
//! └────────────────────┘ └────────────────────┘
//!            ▲                  ▲
//!            └──── CacheKey ────┘
//!          "{source_id}_{w}x{h}"
//! ```

mod disk;
mod key;
mod memory;

pub use disk::{default_cache_dir, DiskTier, DEFAULT_DISK_RETENTION, THUMBNAIL_EXTENSION};
pub use key::{CacheKey, ThumbnailSize};
pub use memory::{MemoryTier, DEFAULT_MEMORY_COST_LIMIT, DEFAULT_MEMORY_COUNT_LIMIT};
