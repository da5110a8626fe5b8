//! In-memory cache store.
//!
//! The store is a plain single-owner struct. Every state transition queues a
//! [`Dispatch`] per attached listener; the owner drains them with
//! [`CacheStore::take_notifications`] and delivers them once it no longer
//! holds whatever lock guards the store, so listeners may call back in.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use turbo_data::{RequestDescriptor, TransportError};

use crate::error::CacheError;
use crate::key::{CacheKey, KeyPattern};
use crate::policy::CachePolicy;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Known key, never loaded.
    Idle,
    /// First load in flight, no data yet.
    Pending,
    /// Data within its staleness window.
    Fresh,
    /// Data past its window or invalidated. Still served.
    Stale,
    /// Last fetch failed. Previous data, if any, is kept.
    Errored,
}

impl EntryStatus {
    /// Get the status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback attached to one entry.
pub type Listener = Arc<dyn Fn(&EntrySnapshot) + Send + Sync>;

/// Identifies a listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Proof that a fetch was started, handed back when it settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchToken {
    epoch: u64,
    generation: u64,
}

/// Read-only copy of an entry handed to callers and listeners.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    /// Key of the entry.
    pub key: CacheKey,
    /// Last successfully fetched data.
    pub data: Option<Arc<Value>>,
    /// Current status.
    pub status: EntryStatus,
    /// Classified error of the last failed fetch.
    pub error: Option<TransportError>,
    /// Whether a fetch is outstanding.
    pub fetching: bool,
    /// When the data goes stale.
    pub stale_at: Option<Instant>,
    /// When the data was last written.
    pub updated_at: Option<Instant>,
    /// Number of attached listeners.
    pub subscriber_count: usize,
}

impl EntrySnapshot {
    /// Snapshot of a key nothing is known about.
    pub fn idle(key: CacheKey) -> Self {
        Self {
            key,
            data: None,
            status: EntryStatus::Idle,
            error: None,
            fetching: false,
            stale_at: None,
            updated_at: None,
            subscriber_count: 0,
        }
    }

    /// Decode the data into a typed value.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.data
            .as_deref()
            .map(|value| T::deserialize(value))
            .transpose()
    }

    /// Check if the entry holds data.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Check if the data is fresh.
    pub fn is_fresh(&self) -> bool {
        self.status == EntryStatus::Fresh
    }
}

/// One queued listener call.
pub struct Dispatch {
    listener: Listener,
    snapshot: EntrySnapshot,
}

impl Dispatch {
    /// The snapshot the listener will see.
    pub fn snapshot(&self) -> &EntrySnapshot {
        &self.snapshot
    }

    /// Call the listener.
    pub fn deliver(self) {
        (self.listener)(&self.snapshot)
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("key", &self.snapshot.key)
            .field("status", &self.snapshot.status)
            .finish_non_exhaustive()
    }
}

struct CacheEntry {
    descriptor: Option<RequestDescriptor>,
    data: Option<Arc<Value>>,
    status: EntryStatus,
    error: Option<TransportError>,
    stale_at: Option<Instant>,
    updated_at: Option<Instant>,
    fetching: bool,
    /// Bumped by every invalidation.
    epoch: u64,
    /// Bumped when the entry is reset; results of older fetches are dropped.
    generation: u64,
    session_scoped: bool,
    idle_since: Option<Instant>,
    subscribers: Vec<(SubscriptionId, Listener)>,
}

impl CacheEntry {
    fn new(descriptor: Option<RequestDescriptor>, now: Instant) -> Self {
        let session_scoped = descriptor
            .as_ref()
            .is_some_and(RequestDescriptor::is_session_scoped);
        Self {
            descriptor,
            data: None,
            status: EntryStatus::Idle,
            error: None,
            stale_at: None,
            updated_at: None,
            fetching: false,
            epoch: 0,
            generation: 0,
            session_scoped,
            idle_since: Some(now),
            subscribers: Vec::new(),
        }
    }

    fn snapshot(&self, key: &CacheKey) -> EntrySnapshot {
        EntrySnapshot {
            key: key.clone(),
            data: self.data.clone(),
            status: self.status,
            error: self.error.clone(),
            fetching: self.fetching,
            stale_at: self.stale_at,
            updated_at: self.updated_at,
            subscriber_count: self.subscribers.len(),
        }
    }

    /// Lazy stale-on-read. Returns `true` if the status changed.
    fn expire(&mut self, now: Instant) -> bool {
        if self.status == EntryStatus::Fresh && self.stale_at.is_some_and(|at| at <= now) {
            self.status = EntryStatus::Stale;
            return true;
        }
        false
    }

    fn store(&mut self, data: Arc<Value>, freshness: Duration, now: Instant) {
        self.data = Some(data);
        self.status = EntryStatus::Fresh;
        self.error = None;
        self.stale_at = Some(now + freshness);
        self.updated_at = Some(now);
        self.touch(now);
    }

    fn touch(&mut self, now: Instant) {
        if self.subscribers.is_empty() {
            self.idle_since = Some(now);
        }
    }

    fn in_use(&self) -> bool {
        self.fetching || !self.subscribers.is_empty()
    }

    fn reset(&mut self) {
        self.data = None;
        self.error = None;
        self.stale_at = None;
        self.updated_at = None;
        self.status = if self.fetching {
            EntryStatus::Pending
        } else {
            EntryStatus::Idle
        };
        self.epoch += 1;
        self.generation += 1;
    }
}

fn queue(outbox: &mut Vec<Dispatch>, key: &CacheKey, entry: &CacheEntry) {
    if entry.subscribers.is_empty() {
        return;
    }
    let snapshot = entry.snapshot(key);
    for (_, listener) in &entry.subscribers {
        outbox.push(Dispatch {
            listener: listener.clone(),
            snapshot: snapshot.clone(),
        });
    }
}

/// Keyed store of cache entries.
pub struct CacheStore {
    entries: HashMap<CacheKey, CacheEntry>,
    subscriptions: HashMap<SubscriptionId, CacheKey>,
    next_subscription: u64,
    outbox: Vec<Dispatch>,
    policy: CachePolicy,
    /// Bumped by every `clear` and `clear_session_scoped`.
    clears: u64,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

impl CacheStore {
    /// Create an empty store.
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            entries: HashMap::new(),
            subscriptions: HashMap::new(),
            next_subscription: 0,
            outbox: Vec::new(),
            policy,
            clears: 0,
        }
    }

    /// Get the freshness and eviction policy.
    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if an entry exists.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Drain queued listener calls.
    pub fn take_notifications(&mut self) -> Vec<Dispatch> {
        std::mem::take(&mut self.outbox)
    }

    /// Make sure an entry exists for `key` and remember how to refetch it.
    pub fn register(&mut self, key: &CacheKey, descriptor: &RequestDescriptor) {
        let now = Instant::now();
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(None, now));
        let scoped = descriptor.is_session_scoped();
        if entry.descriptor.is_none() || (scoped && !entry.session_scoped) {
            entry.descriptor = Some(descriptor.clone());
        }
        // Once any reader scopes the key to the session, it stays scoped.
        entry.session_scoped |= scoped;
    }

    /// Look up an entry. A cache miss is `None`, not an error.
    ///
    /// A fresh entry whose window has passed turns stale here.
    pub fn get(&mut self, key: &CacheKey) -> Option<EntrySnapshot> {
        let now = Instant::now();
        let entry = self.entries.get_mut(key)?;
        if entry.expire(now) {
            tracing::debug!(key = %key, "entry went stale on read");
            queue(&mut self.outbox, key, entry);
        }
        Some(entry.snapshot(key))
    }

    /// Store data as fresh for `freshness`, replacing whatever was there.
    pub fn put(&mut self, key: &CacheKey, data: Value, freshness: Duration) {
        let now = Instant::now();
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(None, now));
        entry.store(Arc::new(data), freshness, now);
        tracing::debug!(key = %key, ?freshness, "entry stored");
        queue(&mut self.outbox, key, entry);
    }

    /// Invalidate every matching entry.
    ///
    /// Fresh entries turn stale and keep their data. Every matching entry has
    /// its epoch bumped so a fetch already in flight lands as stale. Returns
    /// the number of entries that went from fresh to stale.
    pub fn mark_stale(&mut self, pattern: &KeyPattern) -> usize {
        let mut transitioned = 0;
        for (key, entry) in self.entries.iter_mut() {
            if !pattern.matches(key) {
                continue;
            }
            entry.epoch += 1;
            if entry.status == EntryStatus::Fresh {
                entry.status = EntryStatus::Stale;
                transitioned += 1;
                queue(&mut self.outbox, key, entry);
            }
        }
        tracing::debug!(pattern = %pattern, transitioned, "entries invalidated");
        transitioned
    }

    /// Record a failed fetch. Previous data stays.
    pub fn mark_error(&mut self, key: &CacheKey, error: TransportError) {
        let now = Instant::now();
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(None, now));
        tracing::debug!(key = %key, error = %error, "entry errored");
        entry.status = EntryStatus::Errored;
        entry.error = Some(error);
        queue(&mut self.outbox, key, entry);
    }

    /// Flag an entry as fetching.
    ///
    /// An entry without data becomes pending; one with data keeps showing it.
    pub fn begin_fetch(&mut self, key: &CacheKey, descriptor: &RequestDescriptor) -> FetchToken {
        self.register(key, descriptor);
        let now = Instant::now();
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(Some(descriptor.clone()), now));
        entry.fetching = true;
        if entry.data.is_none() {
            entry.status = EntryStatus::Pending;
        }
        queue(&mut self.outbox, key, entry);
        FetchToken {
            epoch: entry.epoch,
            generation: entry.generation,
        }
    }

    /// Settle a fetch successfully.
    ///
    /// The data is stored fresh under the configured window, or stale if the
    /// entry was invalidated while the fetch was out. Results of fetches that
    /// predate a reset (or an eviction) are dropped; returns `false` then.
    pub fn complete_fetch(&mut self, key: &CacheKey, token: FetchToken, data: Arc<Value>) -> bool {
        let now = Instant::now();
        let freshness = self.policy.stale_time_for(key);
        let Some(entry) = self.entries.get_mut(key) else {
            tracing::debug!(key = %key, "fetch settled for an evicted entry, dropped");
            return false;
        };
        entry.fetching = false;
        if entry.generation != token.generation {
            tracing::debug!(key = %key, "fetch settled after reset, dropped");
            if entry.data.is_none() && entry.status == EntryStatus::Pending {
                entry.status = EntryStatus::Idle;
            }
            queue(&mut self.outbox, key, entry);
            return false;
        }
        entry.store(data, freshness, now);
        if entry.epoch != token.epoch {
            tracing::debug!(key = %key, "entry invalidated while fetching, stored as stale");
            entry.status = EntryStatus::Stale;
        }
        queue(&mut self.outbox, key, entry);
        true
    }

    /// Settle a fetch with a failure. Previous data stays.
    pub fn fail_fetch(&mut self, key: &CacheKey, token: FetchToken, error: TransportError) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        entry.fetching = false;
        if entry.generation != token.generation {
            if entry.data.is_none() && entry.status == EntryStatus::Pending {
                entry.status = EntryStatus::Idle;
            }
            queue(&mut self.outbox, key, entry);
            return false;
        }
        tracing::debug!(key = %key, error = %error, "fetch failed");
        entry.status = EntryStatus::Errored;
        entry.error = Some(error);
        queue(&mut self.outbox, key, entry);
        true
    }

    /// Clear the fetching flag without recording anything.
    pub fn abandon_fetch(&mut self, key: &CacheKey) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.fetching = false;
        if entry.data.is_none() && entry.status == EntryStatus::Pending {
            entry.status = EntryStatus::Idle;
        }
        queue(&mut self.outbox, key, entry);
    }

    /// Attach a listener, creating an idle entry if needed.
    pub fn subscribe(&mut self, key: &CacheKey, listener: Listener) -> SubscriptionId {
        let now = Instant::now();
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;

        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(None, now));
        entry.subscribers.push((id, listener));
        entry.idle_since = None;
        self.subscriptions.insert(id, key.clone());
        tracing::debug!(key = %key, subscribers = entry.subscribers.len(), "subscribed");
        id
    }

    /// Detach a listener. Returns `false` if it was not attached.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(key) = self.subscriptions.remove(&id) else {
            return false;
        };
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        entry.subscribers.retain(|(sid, _)| *sid != id);
        if entry.subscribers.is_empty() {
            entry.idle_since = Some(Instant::now());
        }
        tracing::debug!(key = %key, subscribers = entry.subscribers.len(), "unsubscribed");
        true
    }

    /// Number of listeners on an entry.
    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.entries.get(key).map_or(0, |e| e.subscribers.len())
    }

    /// Number of clears so far.
    ///
    /// An entry missing under an unchanged count was evicted, not cleared.
    pub fn clears(&self) -> u64 {
        self.clears
    }

    /// Invalidation epoch of an entry.
    pub fn epoch(&self, key: &CacheKey) -> Option<u64> {
        self.entries.get(key).map(|e| e.epoch)
    }

    /// Remove an entry nobody is using.
    pub fn evict(&mut self, key: &CacheKey) -> Result<(), CacheError> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| CacheError::NotFound(key.clone()))?;
        if entry.in_use() {
            return Err(CacheError::EntryInUse {
                key: key.clone(),
                subscribers: entry.subscribers.len(),
                fetching: entry.fetching,
            });
        }
        self.entries.remove(key);
        tracing::debug!(key = %key, "entry evicted");
        Ok(())
    }

    /// Evict entries that have been unused for longer than the idle timeout.
    ///
    /// Does nothing when the policy keeps idle entries forever.
    pub fn collect_idle(&mut self, now: Instant) -> usize {
        let Some(after) = self.policy.idle_eviction else {
            return 0;
        };
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let expired = !entry.in_use()
                && entry
                    .idle_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= after);
            if expired {
                tracing::debug!(key = %key, "idle entry evicted");
            }
            !expired
        });
        before - self.entries.len()
    }

    /// Drop every session-scoped entry.
    ///
    /// Entries still in use are emptied rather than removed so their
    /// listeners stay attached; fetches already out for them are discarded
    /// when they settle.
    pub fn clear_session_scoped(&mut self) -> usize {
        self.reset_where(|entry| entry.session_scoped)
    }

    /// Drop every entry.
    pub fn clear(&mut self) -> usize {
        self.reset_where(|_| true)
    }

    fn reset_where(&mut self, pred: impl Fn(&CacheEntry) -> bool) -> usize {
        self.clears += 1;
        let mut cleared = 0;
        let outbox = &mut self.outbox;
        self.entries.retain(|key, entry| {
            if !pred(entry) {
                return true;
            }
            cleared += 1;
            if entry.in_use() {
                entry.reset();
                queue(outbox, key, entry);
                true
            } else {
                false
            }
        });
        tracing::debug!(cleared, "entries cleared");
        cleared
    }

    /// Descriptors of subscribed entries matching `pattern`.
    pub fn subscribed_descriptors(&self, pattern: &KeyPattern) -> Vec<RequestDescriptor> {
        self.entries
            .iter()
            .filter(|(key, entry)| !entry.subscribers.is_empty() && pattern.matches(key))
            .filter_map(|(_, entry)| entry.descriptor.clone())
            .collect()
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("subscriptions", &self.subscriptions.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
