//! TTL-bounded store of transactions waiting for their response.
//!
//! Entries are removed from the map before anything else happens to them:
//! [`TransactionCache::take`] (response arrival) and eviction both go through
//! `DashMap::remove_if`, so exactly one of them obtains a given entry. The
//! winner then claims the handle's finalize flag; eviction never waits for
//! it and skips the entry if the flag is already taken.
//!
//! Expiry is enforced lazily on lookup and periodically by a sweeper task
//! that holds only a weak reference to the cache.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use warden_telemetry::metrics::{record_eviction, set_cached_transactions};

use crate::handle::TransactionHandle;

/// Lower bound for the sweep interval.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

struct Entry {
    handle: Arc<TransactionHandle>,
    expires_at: Instant,
}

/// Per-application transaction cache.
pub struct TransactionCache {
    app: String,
    entries: DashMap<String, Entry>,
}

impl std::fmt::Debug for TransactionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCache")
            .field("app", &self.app)
            .field("len", &self.entries.len())
            .finish()
    }
}

impl TransactionCache {
    /// Create an empty cache for application `app`.
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            entries: DashMap::new(),
        }
    }

    /// Store `handle` under its id until `ttl` elapses.
    ///
    /// A handle already stored under the same id is evicted.
    pub fn put(&self, handle: Arc<TransactionHandle>, ttl: Duration) {
        let id = handle.id().to_string();
        let entry = Entry {
            handle: Arc::clone(&handle),
            expires_at: Instant::now() + ttl,
        };

        if let Some(displaced) = self.entries.insert(id, entry) {
            if !Arc::ptr_eq(&displaced.handle, &handle) {
                self.finalize_evicted(&displaced.handle, "displaced");
            }
        }
        self.update_gauge();
    }

    /// Look up a live transaction without removing it.
    pub fn get(&self, id: &str) -> Option<Arc<TransactionHandle>> {
        let now = Instant::now();
        let expired = match self.entries.get(id) {
            Some(entry) if entry.expires_at > now => return Some(Arc::clone(&entry.handle)),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.evict(id, now);
        }
        None
    }

    /// Remove a transaction without finalizing it.
    pub fn remove(&self, id: &str) -> Option<Arc<TransactionHandle>> {
        let removed = self.entries.remove(id).map(|(_, entry)| entry.handle);
        self.update_gauge();
        removed
    }

    /// Remove and return a live transaction.
    ///
    /// An expired entry is evicted instead and `None` is returned.
    pub fn take(&self, id: &str) -> Option<Arc<TransactionHandle>> {
        let now = Instant::now();
        match self.entries.remove_if(id, |_, entry| entry.expires_at > now) {
            Some((_, entry)) => {
                self.update_gauge();
                Some(entry.handle)
            }
            None => {
                self.evict(id, now);
                None
            }
        }
    }

    /// Evict every expired entry. Returns the number of entries removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();

        expired.iter().filter(|id| self.evict(id, now)).count()
    }

    /// Evict every entry regardless of its TTL.
    ///
    /// Only safe once no new messages are dispatched to this cache.
    pub fn drain_all(&self) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut drained = 0;
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                self.finalize_evicted(&entry.handle, "shutdown");
                drained += 1;
            }
        }
        self.update_gauge();
        drained
    }

    /// Number of cached transactions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a live or expired entry exists for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Spawn the periodic eviction task on `runtime`.
    ///
    /// The task stops on its own once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, runtime: &Handle, every: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let every = every.max(MIN_SWEEP_INTERVAL);

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let evicted = cache.evict_expired();
                if evicted > 0 {
                    debug!(app = %cache.app, evicted, "evicted expired transactions");
                }
            }
        })
    }

    /// Remove `id` if it expired at `now` and finalize it.
    fn evict(&self, id: &str, now: Instant) -> bool {
        let Some((_, entry)) = self.entries.remove_if(id, |_, e| e.expires_at <= now) else {
            return false;
        };
        self.finalize_evicted(&entry.handle, "expired");
        self.update_gauge();
        true
    }

    fn finalize_evicted(&self, handle: &TransactionHandle, reason: &'static str) {
        match handle.try_begin_finalize() {
            Some(guard) => {
                drop(guard);
                record_eviction();
                info!(tx = %handle.id(), app = %self.app, reason, "transaction evicted");
            }
            None => {
                info!(
                    tx = %handle.id(),
                    app = %self.app,
                    reason,
                    "transaction is being finalized elsewhere, skipping eviction"
                );
            }
        }
    }

    fn update_gauge(&self) {
        set_cached_transactions(&self.app, self.entries.len());
    }
}
