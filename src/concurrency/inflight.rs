//! In-flight generation registry.
//!
//! Maps a cache key to the one generation currently running for it. The first
//! caller for a key becomes the leader and owns the outcome channel; every
//! later caller joins and awaits the same outcome instead of starting
//! duplicate work.
//!
//! Registry entries are removed when the leader handle drops, whichever way
//! the generation ends (success, failure, timeout, abort). A leader dropped
//! without publishing closes the channel and joined callers observe
//! [`ThumbnailError::Cancelled`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::cache::CacheKey;
use crate::error::ThumbnailError;
use crate::thumbnail::Thumbnail;

/// Result shared by every caller of one generation.
pub type Outcome = Result<Thumbnail, ThumbnailError>;

struct Entry {
    id: u64,
    receiver: watch::Receiver<Option<Outcome>>,
    abort: Option<AbortHandle>,
    started: Instant,
}

/// Registry of outstanding generations, at most one per key.
#[derive(Default)]
pub struct InFlightRegistry {
    entries: Mutex<HashMap<CacheKey, Entry>>,
    next_id: AtomicU64,
}

/// Result of [`InFlightRegistry::join_or_register`].
pub enum Registration {
    /// Another caller already owns the generation for this key
    Joined(InFlightWaiter),
    /// This caller must run the generation
    Leader(InFlightLeader),
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the generation running for `key`, if any.
    pub fn join(&self, key: &CacheKey) -> Option<InFlightWaiter> {
        let entries = self.entries.lock();
        entries.get(key).map(|entry| InFlightWaiter {
            key: key.clone(),
            receiver: entry.receiver.clone(),
        })
    }

    /// Join the running generation for `key`, or register a new one.
    ///
    /// Check and insert happen under one lock, so of any number of racing
    /// callers exactly one gets [`Registration::Leader`].
    pub fn join_or_register(self: &Arc<Self>, key: &CacheKey) -> Registration {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(key) {
            trace!(key = %key, "Joining in-flight generation");
            return Registration::Joined(InFlightWaiter {
                key: key.clone(),
                receiver: entry.receiver.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        entries.insert(
            key.clone(),
            Entry {
                id,
                receiver,
                abort: None,
                started: Instant::now(),
            },
        );
        trace!(key = %key, id, "Registered in-flight generation");

        Registration::Leader(InFlightLeader {
            key: key.clone(),
            id,
            sender,
            registry: Arc::clone(self),
        })
    }

    /// Abort and deregister the generation for `key`.
    pub fn cancel(&self, key: &CacheKey) -> bool {
        let removed = self.entries.lock().remove(key);
        match removed {
            Some(entry) => {
                if let Some(abort) = entry.abort {
                    abort.abort();
                }
                debug!(key = %key, "Cancelled in-flight generation");
                true
            }
            None => false,
        }
    }

    /// Abort and deregister every generation. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(CacheKey, Entry)> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            if let Some(abort) = entry.abort {
                abort.abort();
            }
        }
        if count > 0 {
            debug!(count, "Cancelled all in-flight generations");
        }
        count
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of the longest-running registered generation.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.entries
            .lock()
            .values()
            .map(|entry| entry.started.elapsed())
            .max()
    }

    /// Record the task running a generation so cancellation can abort it.
    ///
    /// If the registration is already gone (cancelled, or the task finished
    /// and deregistered), the task is aborted right away; aborting a finished
    /// task does nothing.
    pub fn attach(&self, ticket: &LeaderTicket, abort: AbortHandle) {
        let mut entries = self.entries.lock();
        match entries.get_mut(&ticket.key) {
            Some(entry) if entry.id == ticket.id => entry.abort = Some(abort),
            _ => {
                drop(entries);
                abort.abort();
            }
        }
    }

    fn deregister(&self, key: &CacheKey, id: u64) {
        let mut entries = self.entries.lock();
        // A cancelled-then-restarted key belongs to a newer leader now
        if entries.get(key).is_some_and(|entry| entry.id == id) {
            entries.remove(key);
            trace!(key = %key, id, "Deregistered in-flight generation");
        }
    }
}

// =============================================================================
// Leader / Waiter Handles
// =============================================================================

/// Registration identity, usable after the leader moved into a task.
#[derive(Debug, Clone)]
pub struct LeaderTicket {
    key: CacheKey,
    id: u64,
}

/// Handle owned by the caller that runs a generation.
///
/// Dropping it deregisters the key.
pub struct InFlightLeader {
    key: CacheKey,
    id: u64,
    sender: watch::Sender<Option<Outcome>>,
    registry: Arc<InFlightRegistry>,
}

impl InFlightLeader {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// A waiter on this leader's outcome.
    pub fn waiter(&self) -> InFlightWaiter {
        InFlightWaiter {
            key: self.key.clone(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Identifies this registration for [`InFlightRegistry::attach`].
    pub fn ticket(&self) -> LeaderTicket {
        LeaderTicket {
            key: self.key.clone(),
            id: self.id,
        }
    }

    /// Publish the outcome to every waiter and deregister.
    pub fn complete(self, outcome: Outcome) {
        self.sender.send_replace(Some(outcome));
    }
}

impl Drop for InFlightLeader {
    fn drop(&mut self) {
        self.registry.deregister(&self.key, self.id);
    }
}

/// Handle for awaiting another caller's generation.
pub struct InFlightWaiter {
    key: CacheKey,
    receiver: watch::Receiver<Option<Outcome>>,
}

impl InFlightWaiter {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Wait for the leader's outcome.
    ///
    /// Resolves to [`ThumbnailError::Cancelled`] if the leader went away
    /// without publishing one.
    pub async fn wait(mut self) -> Outcome {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or(Err(ThumbnailError::Cancelled)),
            Err(_) => Err(ThumbnailError::Cancelled),
        }
    }
}
