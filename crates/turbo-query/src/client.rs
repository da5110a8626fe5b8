//! The engine context shared by both coordinators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use turbo_auth::{
    AuthError, Navigator, NoopNavigator, PolicyContext, PolicyRegistry, Session, SessionGate,
    SessionStatus, User,
};
use turbo_cache::{CacheKey, CacheStore, EntrySnapshot, KeyCodec, KeyPattern};
use turbo_data::{RequestDescriptor, RetryPolicy, Transport, TransportError, TransportRequest};
use turbo_observability::{Notification, NotificationSink, TracingSink};

use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::mutation::{MutationCoordinator, MutationRequest};
use crate::query::{QueryCoordinator, QueryHandle, QueryOptions, Subscription};

pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<Fetched, TransportError>>>;

/// A successful transport result.
#[derive(Clone)]
pub(crate) struct Fetched {
    pub(crate) value: Arc<Value>,
    /// Store clear count when the value was kept; `None` when the entry was
    /// reset while the fetch was out, in which case nobody may see it.
    pub(crate) recorded_at: Option<u64>,
}

/// A fetch that has not settled yet.
pub(crate) struct InFlight {
    pub(crate) id: u64,
    pub(crate) future: SharedFetch,
    /// Waiters currently awaiting the result. Subscribers are not counted
    /// here, so a fetch started for a subscriber alone sits at zero; see
    /// [`EngineState::has_interest`].
    pub(crate) ref_count: usize,
}

/// Everything guarded by the engine lock.
pub(crate) struct EngineState {
    pub(crate) store: CacheStore,
    pub(crate) inflight: HashMap<CacheKey, InFlight>,
}

impl EngineState {
    /// Remove the in-flight record for `key` if it still belongs to fetch `id`.
    pub(crate) fn finish(&mut self, key: &CacheKey, id: u64) {
        if self.inflight.get(key).is_some_and(|f| f.id == id) {
            self.inflight.remove(key);
        }
    }

    /// Check if anyone still cares about fetch `id` for `key`.
    pub(crate) fn has_interest(&self, key: &CacheKey, id: u64) -> bool {
        let waiting = self
            .inflight
            .get(key)
            .is_some_and(|f| f.id == id && f.ref_count > 0);
        waiting || self.store.subscriber_count(key) > 0
    }
}

pub(crate) struct Inner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) gate: SessionGate,
    pub(crate) policies: PolicyRegistry,
    pub(crate) codec: KeyCodec,
    pub(crate) retry: RetryPolicy,
    pub(crate) session_path: String,
    state: Mutex<EngineState>,
    next_fetch: AtomicU64,
}

impl Inner {
    /// Run `f` under the engine lock, then deliver whatever it published.
    ///
    /// Listeners run after the lock is released so they may call back into
    /// the engine.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let (result, dispatches) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let result = f(&mut state);
            (result, state.store.take_notifications())
        };
        for dispatch in dispatches {
            dispatch.deliver();
        }
        result
    }

    pub(crate) fn next_fetch_id(&self) -> u64 {
        self.next_fetch.fetch_add(1, Ordering::Relaxed)
    }

    /// Route a credential rejection through the session gate.
    ///
    /// The first rejection of a credential context drops session-scoped
    /// entries and redirects; later ones are absorbed.
    pub(crate) fn reject_credentials(&self) {
        self.gate.reject_credentials_with(|| {
            let cleared = self.with_state(|state| state.store.clear_session_scoped());
            tracing::info!(cleared, "session-scoped entries cleared after credential loss");
        });
    }

    /// Surface a failed read or write.
    ///
    /// Credential rejections go to the session gate and nowhere else; every
    /// other failure becomes one error notification.
    pub(crate) fn report_failure(&self, title: &str, error: &TransportError) {
        if error.is_credential_rejected() {
            self.reject_credentials();
            return;
        }
        self.notifier
            .emit(Notification::error(title.to_string(), error.to_string()));
    }
}

/// Handle to the request cache and synchronization engine.
///
/// Cheap to clone; every clone shares one cache, one session and one set of
/// collaborators. Dropping the last clone tears the engine down. Reads spawn
/// their transport calls, so the client must be used inside a Tokio runtime.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

impl QueryClient {
    /// Start building a client around a transport.
    pub fn builder(transport: impl Transport + 'static) -> QueryClientBuilder {
        QueryClientBuilder::new(Arc::new(transport))
    }

    /// Create a client with default collaborators and configuration.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::builder(transport).build()
    }

    /// Read-side coordinator.
    pub fn queries(&self) -> QueryCoordinator {
        QueryCoordinator::new(self.inner.clone())
    }

    /// Write-side coordinator.
    pub fn mutations(&self) -> MutationCoordinator {
        MutationCoordinator::new(self.inner.clone())
    }

    /// Encode the cache key for a descriptor.
    pub fn key_for(&self, descriptor: &RequestDescriptor) -> CacheKey {
        self.inner.codec.encode(descriptor)
    }

    /// See [`QueryCoordinator::query`].
    pub fn query(&self, descriptor: &RequestDescriptor) -> QueryHandle {
        self.queries().query(descriptor)
    }

    /// See [`QueryCoordinator::query_with`].
    pub fn query_with(&self, descriptor: &RequestDescriptor, options: QueryOptions) -> QueryHandle {
        self.queries().query_with(descriptor, options)
    }

    /// See [`QueryCoordinator::fetch`].
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<T, SyncError> {
        self.queries().fetch(descriptor).await
    }

    /// See [`QueryCoordinator::subscribe`].
    pub fn subscribe<F>(&self, descriptor: &RequestDescriptor, listener: F) -> Subscription
    where
        F: Fn(&EntrySnapshot) + Send + Sync + 'static,
    {
        self.queries().subscribe(descriptor, listener)
    }

    /// See [`QueryCoordinator::peek`].
    pub fn peek(&self, descriptor: &RequestDescriptor) -> Option<EntrySnapshot> {
        self.queries().peek(descriptor)
    }

    /// See [`QueryCoordinator::set_query_data`].
    pub fn set_query_data<T: Serialize>(
        &self,
        descriptor: &RequestDescriptor,
        data: &T,
    ) -> Result<(), SyncError> {
        self.queries().set_query_data(descriptor, data)
    }

    /// See [`QueryCoordinator::invalidate`].
    pub fn invalidate(&self, pattern: impl Into<KeyPattern>) -> usize {
        self.queries().invalidate(&[pattern.into()])
    }

    /// See [`MutationCoordinator::mutate`].
    pub async fn mutate(&self, request: MutationRequest) -> Result<Value, SyncError> {
        self.mutations().mutate(request).await
    }

    /// See [`MutationCoordinator::login`].
    pub async fn login(&self, request: MutationRequest) -> Result<User, SyncError> {
        self.mutations().login(request).await
    }

    /// See [`MutationCoordinator::logout`].
    pub async fn logout(&self, request: MutationRequest) -> Result<(), SyncError> {
        self.mutations().logout(request).await
    }

    /// Snapshot of the session.
    pub fn session(&self) -> Session {
        self.inner.gate.session()
    }

    /// The session gate.
    pub fn gate(&self) -> &SessionGate {
        &self.inner.gate
    }

    /// Resolve an `Unknown` session by probing the session path.
    ///
    /// A `null` body or a credential rejection means nobody is signed in; an
    /// identity body means someone is. The probe never redirects. Concurrent
    /// callers share one probe.
    pub async fn resolve_session(&self) -> Result<SessionStatus, SyncError> {
        let transport = self.inner.transport.clone();
        let path = self.inner.session_path.clone();
        let status = self
            .inner
            .gate
            .resolve_with(|| async move {
                match transport.send(TransportRequest::get(path)).await {
                    Ok(Value::Null) => Ok(None),
                    Ok(body) => serde_json::from_value::<User>(body)
                        .map(Some)
                        .map_err(|e| AuthError::InvalidIdentity(e.to_string())),
                    Err(e) if e.is_credential_rejected() => Ok(None),
                    Err(e) => Err(AuthError::ResolutionFailed(e.to_string())),
                }
            })
            .await?;
        Ok(status)
    }

    /// Evaluate a named policy against the current identity.
    ///
    /// An unknown policy name denies.
    pub fn check_access(&self, policy: &str, ctx: &PolicyContext) -> bool {
        match self.inner.policies.get(policy) {
            Some(p) => self.inner.gate.check_access(p, ctx),
            None => {
                tracing::warn!(policy, "access check against unknown policy, denying");
                false
            }
        }
    }

    /// Like [`check_access`](Self::check_access), resolving the session first
    /// and reporting why access was refused.
    pub async fn authorize(&self, policy: &str, ctx: &PolicyContext) -> Result<(), SyncError> {
        let Some(p) = self.inner.policies.get(policy) else {
            return Err(SyncError::UnknownPolicy(policy.to_string()));
        };
        self.resolve_session().await?;
        if self.inner.gate.check_access(p, ctx) {
            Ok(())
        } else {
            tracing::debug!(policy, "access denied");
            Err(SyncError::AccessDenied(policy.to_string()))
        }
    }

    /// Number of cache entries.
    pub fn cache_len(&self) -> usize {
        self.inner.with_state(|state| state.store.len())
    }

    /// Drop every cache entry. Subscribed entries are emptied, not removed.
    pub fn clear(&self) -> usize {
        self.inner.with_state(|state| state.store.clear())
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("session", &self.inner.gate.session())
            .field("policies", &self.inner.policies.names())
            .finish_non_exhaustive()
    }
}

/// Builder for [`QueryClient`].
pub struct QueryClientBuilder {
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn NotificationSink>,
    navigator: Arc<dyn Navigator>,
    policies: PolicyRegistry,
    codec: KeyCodec,
    config: EngineConfig,
}

impl QueryClientBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            notifier: Arc::new(TracingSink),
            navigator: Arc::new(NoopNavigator),
            policies: PolicyRegistry::default(),
            codec: KeyCodec::default(),
            config: EngineConfig::default(),
        }
    }

    /// Set where notifications go. Defaults to the tracing pipeline.
    pub fn notifier(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.notifier = Arc::new(sink);
        self
    }

    /// Set the collaborator told to show the login boundary.
    pub fn navigator(mut self, navigator: impl Navigator + 'static) -> Self {
        self.navigator = Arc::new(navigator);
        self
    }

    /// Set the named authorization policies.
    pub fn policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = policies;
        self
    }

    /// Set the key codec (for parameter defaults).
    pub fn codec(mut self, codec: KeyCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the client: empty cache, `Unknown` session.
    pub fn build(self) -> QueryClient {
        tracing::debug!(
            stale_time_ms = self.config.stale_time_ms,
            max_retries = self.config.retry.max_retries,
            policies = self.policies.names().len(),
            "query client created"
        );
        QueryClient {
            inner: Arc::new(Inner {
                transport: self.transport,
                notifier: self.notifier,
                gate: SessionGate::new(self.navigator),
                policies: self.policies,
                codec: self.codec,
                retry: self.config.retry_policy(),
                session_path: self.config.session_path.clone(),
                state: Mutex::new(EngineState {
                    store: CacheStore::new(self.config.cache_policy()),
                    inflight: HashMap::new(),
                }),
                next_fetch: AtomicU64::new(0),
            }),
        }
    }
}
