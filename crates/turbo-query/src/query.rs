//! Read-side coordination.
//!
//! A read either hits a fresh entry or joins the single in-flight fetch for
//! its key, starting one if there is none. Fetches run as spawned tasks so
//! they always settle into the store, whether or not anyone is still
//! waiting.

use std::collections::HashSet;
use std::sync::Arc;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use turbo_cache::{CacheKey, EntrySnapshot, EntryStatus, FetchToken, KeyPattern, Listener};
use turbo_data::{RequestDescriptor, TransportError};

use crate::client::{EngineState, Fetched, InFlight, Inner, SharedFetch};
use crate::error::SyncError;

/// Per-read options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Fetch even if the cached entry is fresh.
    pub force: bool,
}

impl QueryOptions {
    /// Options that always go to the network (joining an in-flight fetch).
    pub fn refetch() -> Self {
        Self { force: true }
    }
}

/// Read-side coordinator.
#[derive(Clone)]
pub struct QueryCoordinator {
    inner: Arc<Inner>,
}

impl QueryCoordinator {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Read through the cache.
    ///
    /// A fresh entry is returned without a transport call. Otherwise the
    /// handle carries whatever is cached (stale data stays visible) and a
    /// waiter on the one fetch for this key.
    pub fn query(&self, descriptor: &RequestDescriptor) -> QueryHandle {
        self.query_with(descriptor, QueryOptions::default())
    }

    /// Read with options.
    pub fn query_with(&self, descriptor: &RequestDescriptor, options: QueryOptions) -> QueryHandle {
        let key = self.inner.codec.encode(descriptor);
        let inner = &self.inner;
        let (snapshot, waiter) = inner.with_state(|state| {
            state.store.collect_idle(Instant::now());
            state.store.register(&key, descriptor);

            let current = state.store.get(&key);
            if let Some(snapshot) = current.filter(|s| s.is_fresh() && !options.force) {
                tracing::debug!(key = %key, "cache hit");
                return (snapshot, None);
            }

            let waiter = attach(inner, state, &key, descriptor);
            let snapshot = state
                .store
                .get(&key)
                .unwrap_or_else(|| EntrySnapshot::idle(key.clone()));
            (snapshot, Some(waiter))
        });

        QueryHandle {
            inner: self.inner.clone(),
            key,
            snapshot,
            waiter,
        }
    }

    /// Read, wait for the result, and decode it.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<T, SyncError> {
        let handle = self.query(descriptor);
        let key = handle.key().clone();
        let snapshot = handle.settled().await?;
        snapshot.data_as::<T>()?.ok_or(SyncError::NoData(key))
    }

    /// Refetch even if fresh.
    pub fn revalidate(&self, descriptor: &RequestDescriptor) -> QueryHandle {
        self.query_with(descriptor, QueryOptions::refetch())
    }

    /// Attach a listener to an entry, fetching it unless it is fresh.
    ///
    /// The listener runs after every transition of the entry until the
    /// returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, descriptor: &RequestDescriptor, listener: F) -> Subscription
    where
        F: Fn(&EntrySnapshot) + Send + Sync + 'static,
    {
        let key = self.inner.codec.encode(descriptor);
        let listener: Listener = Arc::new(listener);
        let inner = &self.inner;
        let (id, snapshot) = inner.with_state(|state| {
            state.store.collect_idle(Instant::now());
            state.store.register(&key, descriptor);
            let id = state.store.subscribe(&key, listener);

            let fresh = state.store.get(&key).is_some_and(|s| s.is_fresh());
            if !fresh {
                start_or_join(inner, state, &key, descriptor);
            }
            let snapshot = state
                .store
                .get(&key)
                .unwrap_or_else(|| EntrySnapshot::idle(key.clone()));
            (id, snapshot)
        });

        Subscription {
            inner: self.inner.clone(),
            id: Some(id),
            key,
            snapshot,
        }
    }

    /// Look at the cache without fetching.
    pub fn peek(&self, descriptor: &RequestDescriptor) -> Option<EntrySnapshot> {
        let key = self.inner.codec.encode(descriptor);
        self.inner.with_state(|state| state.store.get(&key))
    }

    /// Write data into the cache as if it had just been fetched.
    pub fn set_query_data<T: Serialize>(
        &self,
        descriptor: &RequestDescriptor,
        data: &T,
    ) -> Result<(), SyncError> {
        let value = serde_json::to_value(data)?;
        let key = self.inner.codec.encode(descriptor);
        self.inner.with_state(|state| {
            state.store.register(&key, descriptor);
            let freshness = state.store.policy().stale_time_for(&key);
            state.store.put(&key, value, freshness);
        });
        Ok(())
    }

    /// Mark matching entries stale and refetch the subscribed ones.
    ///
    /// Returns the number of entries that went from fresh to stale.
    pub fn invalidate(&self, patterns: &[KeyPattern]) -> usize {
        let inner = &self.inner;
        inner.with_state(|state| {
            let mut transitioned = 0;
            let mut descriptors = Vec::new();
            for pattern in patterns {
                transitioned += state.store.mark_stale(pattern);
                descriptors.extend(state.store.subscribed_descriptors(pattern));
            }

            let mut seen = HashSet::new();
            for descriptor in descriptors {
                let key = inner.codec.encode(&descriptor);
                if seen.insert(key.clone()) {
                    tracing::debug!(key = %key, "revalidating subscribed entry");
                    start_or_join(inner, state, &key, &descriptor);
                }
            }
            transitioned
        })
    }
}

/// Result of a read: the entry as it was, plus a way to wait for the fetch.
pub struct QueryHandle {
    inner: Arc<Inner>,
    key: CacheKey,
    snapshot: EntrySnapshot,
    waiter: Option<Waiter>,
}

impl QueryHandle {
    /// Key of the entry.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The entry when the read was made.
    pub fn snapshot(&self) -> &EntrySnapshot {
        &self.snapshot
    }

    /// Check if the read was answered from a fresh entry.
    pub fn is_cached(&self) -> bool {
        self.waiter.is_none()
    }

    /// Wait for the fetch, if any, and return the entry afterwards.
    ///
    /// Every caller attached to one fetch sees the same result.
    pub async fn settled(mut self) -> Result<EntrySnapshot, SyncError> {
        let fetched = match self.waiter.take() {
            Some(waiter) => Some(waiter.future.clone().await?),
            None => None,
        };
        let (current, clears) = self
            .inner
            .with_state(|state| (state.store.get(&self.key), state.store.clears()));
        if let Some(snapshot) = current {
            return Ok(snapshot);
        }
        // Evicted after settling: the recorded value still answers this read.
        // A value dropped by a reset, or cleared since, never does.
        let mut snapshot = self.snapshot.clone();
        if let Some(fetched) = fetched {
            snapshot.data = (fetched.recorded_at == Some(clears)).then_some(fetched.value);
        }
        Ok(snapshot)
    }
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("key", &self.key)
            .field("status", &self.snapshot.status)
            .field("waiting", &self.waiter.is_some())
            .finish()
    }
}

/// An attached caller. Dropping it withdraws interest in the fetch.
struct Waiter {
    inner: Arc<Inner>,
    key: CacheKey,
    id: u64,
    future: SharedFetch,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let (key, id) = (&self.key, self.id);
        self.inner.with_state(|state| {
            if let Some(flight) = state.inflight.get_mut(key).filter(|f| f.id == id) {
                flight.ref_count = flight.ref_count.saturating_sub(1);
            }
        });
    }
}

/// A listener registration. Dropping it stops delivery.
pub struct Subscription {
    inner: Arc<Inner>,
    id: Option<turbo_cache::SubscriptionId>,
    key: CacheKey,
    snapshot: EntrySnapshot,
}

impl Subscription {
    /// Key of the entry.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The entry when the subscription was made.
    pub fn snapshot(&self) -> &EntrySnapshot {
        &self.snapshot
    }

    /// The entry now.
    pub fn current(&self) -> Option<EntrySnapshot> {
        self.inner.with_state(|state| state.store.get(&self.key))
    }

    /// Stop delivery.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(id) = self.id.take() {
            self.inner.with_state(|state| state.store.unsubscribe(id));
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.id.is_some())
            .finish()
    }
}

fn attach(
    inner: &Arc<Inner>,
    state: &mut EngineState,
    key: &CacheKey,
    descriptor: &RequestDescriptor,
) -> Waiter {
    let (id, future) = start_or_join(inner, state, key, descriptor);
    if let Some(flight) = state.inflight.get_mut(key) {
        flight.ref_count += 1;
    }
    Waiter {
        inner: inner.clone(),
        key: key.clone(),
        id,
        future,
    }
}

/// Join the in-flight fetch for `key`, or start one.
pub(crate) fn start_or_join(
    inner: &Arc<Inner>,
    state: &mut EngineState,
    key: &CacheKey,
    descriptor: &RequestDescriptor,
) -> (u64, SharedFetch) {
    if let Some(flight) = state.inflight.get(key) {
        tracing::debug!(key = %key, fetch = flight.id, "joining in-flight fetch");
        return (flight.id, flight.future.clone());
    }

    let token = state.store.begin_fetch(key, descriptor);
    let id = inner.next_fetch_id();
    let session_epoch = inner.gate.epoch();
    let task = tokio::spawn(run_fetch(
        inner.clone(),
        key.clone(),
        descriptor.clone(),
        token,
        id,
        session_epoch,
    ));
    let future = async move {
        match task.await {
            Ok(result) => result,
            Err(e) => Err(TransportError::network(format!("fetch task failed: {}", e))),
        }
    }
    .boxed()
    .shared();

    state.inflight.insert(
        key.clone(),
        InFlight {
            id,
            future: future.clone(),
            ref_count: 0,
        },
    );
    tracing::debug!(key = %key, fetch = id, "fetch started");
    (id, future)
}

enum AfterFailure {
    Retry,
    Settle,
    Abandon,
}

fn after_failure(
    inner: &Inner,
    key: &CacheKey,
    id: u64,
    session_epoch: u64,
    error: &TransportError,
    attempt: u32,
) -> AfterFailure {
    if inner.gate.epoch() != session_epoch {
        return AfterFailure::Abandon;
    }
    if !inner.retry.should_retry(error, attempt) {
        return AfterFailure::Settle;
    }
    if !inner.with_state(|state| state.has_interest(key, id)) {
        tracing::debug!(key = %key, "nobody waiting, not retrying");
        return AfterFailure::Settle;
    }
    AfterFailure::Retry
}

async fn run_fetch(
    inner: Arc<Inner>,
    key: CacheKey,
    descriptor: RequestDescriptor,
    token: FetchToken,
    id: u64,
    session_epoch: u64,
) -> Result<Fetched, TransportError> {
    let mut attempt = 0;
    loop {
        let error = match inner.transport.send(descriptor.to_request()).await {
            Ok(value) => {
                let value = Arc::new(value);
                let recorded_at =
                    settle_success(&inner, &key, &descriptor, token, id, value.clone());
                tracing::debug!(
                    key = %key,
                    fetch = id,
                    attempt,
                    recorded = recorded_at.is_some(),
                    "fetch settled"
                );
                return Ok(Fetched { value, recorded_at });
            }
            Err(error) => error,
        };

        if error.is_credential_rejected() {
            inner.with_state(|state| {
                state.finish(&key, id);
                state.store.abandon_fetch(&key);
            });
            inner.reject_credentials();
            return Err(error);
        }

        let mut next = after_failure(&inner, &key, id, session_epoch, &error, attempt);
        if let AfterFailure::Retry = next {
            let delay = inner.retry.delay_for_attempt(attempt);
            tracing::warn!(key = %key, attempt, ?delay, error = %error, "fetch failed, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
            // The credential context or every waiter may be gone by now.
            if inner.gate.epoch() != session_epoch {
                next = AfterFailure::Abandon;
            } else if !inner.with_state(|state| state.has_interest(&key, id)) {
                next = AfterFailure::Settle;
            }
        }

        match next {
            AfterFailure::Retry => continue,
            AfterFailure::Abandon => {
                tracing::debug!(key = %key, "credentials changed during fetch, result dropped");
                inner.with_state(|state| {
                    state.finish(&key, id);
                    state.store.abandon_fetch(&key);
                });
                return Err(error);
            }
            AfterFailure::Settle => {
                tracing::warn!(key = %key, attempts = attempt + 1, error = %error, "fetch failed");
                let recorded = inner.with_state(|state| {
                    state.finish(&key, id);
                    state.store.fail_fetch(&key, token, error.clone())
                });
                if recorded {
                    inner.report_failure(&format!("Could not load {}", key.resource()), &error);
                }
                return Err(error);
            }
        }
    }
}

fn settle_success(
    inner: &Arc<Inner>,
    key: &CacheKey,
    descriptor: &RequestDescriptor,
    token: FetchToken,
    id: u64,
    value: Arc<Value>,
) -> Option<u64> {
    inner.with_state(|state| {
        state.finish(key, id);
        if !state.store.complete_fetch(key, token, value) {
            return None;
        }
        // Invalidated while in flight: subscribers get another round.
        let refetch = state
            .store
            .get(key)
            .is_some_and(|s| s.status == EntryStatus::Stale && s.subscriber_count > 0);
        if refetch {
            tracing::debug!(key = %key, "entry went stale in flight, refetching for subscribers");
            start_or_join(inner, state, key, descriptor);
        }
        Some(state.store.clears())
    })
}
