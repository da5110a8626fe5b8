//! Write-side coordination.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use turbo_auth::{AuthError, User};
use turbo_cache::KeyPattern;
use turbo_data::{Method, TransportRequest};
use turbo_observability::Notification;

use crate::client::Inner;
use crate::error::SyncError;
use crate::query::QueryCoordinator;

type SettledCallback = Box<dyn FnOnce(&Result<Value, SyncError>) + Send>;

/// A write to send, and what it makes stale.
pub struct MutationRequest {
    action: String,
    method: Method,
    path: String,
    payload: Option<Value>,
    invalidates: Vec<KeyPattern>,
    success_message: Option<String>,
    on_settled: Option<SettledCallback>,
}

impl MutationRequest {
    /// Create a mutation.
    pub fn new(action: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            method,
            path: path.into(),
            payload: None,
            invalidates: Vec::new(),
            success_message: None,
            on_settled: None,
        }
    }

    /// Create a `POST` mutation.
    pub fn post(action: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(action, Method::POST, path)
    }

    /// Create a `PUT` mutation.
    pub fn put(action: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(action, Method::PUT, path)
    }

    /// Create a `DELETE` mutation.
    pub fn delete(action: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(action, Method::DELETE, path)
    }

    /// Set the JSON body.
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Mark entries matching `pattern` stale on success.
    pub fn invalidates(mut self, pattern: impl Into<KeyPattern>) -> Self {
        self.invalidates.push(pattern.into());
        self
    }

    /// Emit a success notification with this message.
    pub fn success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = Some(message.into());
        self
    }

    /// Run `callback` once the mutation has settled and its invalidations
    /// have been applied.
    pub fn on_settled<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Result<Value, SyncError>) + Send + 'static,
    {
        self.on_settled = Some(Box::new(callback));
        self
    }

    /// Get the action name.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Get the invalidation patterns.
    pub fn invalidation_patterns(&self) -> &[KeyPattern] {
        &self.invalidates
    }

    fn to_request(&self) -> TransportRequest {
        let request = TransportRequest::new(self.method.clone(), self.path.clone());
        match &self.payload {
            Some(body) => request.json(body.clone()),
            None => request,
        }
    }
}

impl fmt::Debug for MutationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationRequest")
            .field("action", &self.action)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("invalidates", &self.invalidates)
            .finish_non_exhaustive()
    }
}

/// Write-side coordinator.
#[derive(Clone)]
pub struct MutationCoordinator {
    inner: Arc<Inner>,
}

impl MutationCoordinator {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Send a write.
    ///
    /// Exactly one transport call, never retried. On success every listed
    /// pattern is marked stale and subscribed entries refetch, then
    /// `on_settled` runs, then the success notification goes out. On failure
    /// nothing is invalidated, the failure takes the same route as a failed
    /// read, and `on_settled` sees the error.
    pub async fn mutate(&self, request: MutationRequest) -> Result<Value, SyncError> {
        self.send(request, true).await
    }

    /// Sign in. The success body is the identity.
    ///
    /// A rejected login is an ordinary failure: it neither redirects nor
    /// touches the session.
    pub async fn login(&self, request: MutationRequest) -> Result<User, SyncError> {
        let body = self.send(request, false).await?;
        let user: User = serde_json::from_value(body)
            .map_err(|e| SyncError::Auth(AuthError::InvalidIdentity(e.to_string())))?;
        self.inner.gate.authenticate(user.clone());
        Ok(user)
    }

    /// Sign out. The session becomes anonymous without a redirect and
    /// session-scoped entries are dropped.
    pub async fn logout(&self, request: MutationRequest) -> Result<(), SyncError> {
        self.send(request, true).await?;
        self.inner.gate.sign_out();
        let cleared = self
            .inner
            .with_state(|state| state.store.clear_session_scoped());
        tracing::info!(cleared, "signed out, session-scoped entries cleared");
        Ok(())
    }

    async fn send(&self, request: MutationRequest, gate_failures: bool) -> Result<Value, SyncError> {
        let transport_request = request.to_request();
        let MutationRequest {
            action,
            invalidates,
            success_message,
            on_settled,
            ..
        } = request;

        tracing::debug!(action = %action, "mutation started");
        let result = match self.inner.transport.send(transport_request).await {
            Ok(body) => {
                let transitioned = QueryCoordinator::new(self.inner.clone()).invalidate(&invalidates);
                tracing::debug!(action = %action, transitioned, "mutation succeeded");
                Ok(body)
            }
            Err(error) => {
                tracing::warn!(action = %action, error = %error, "mutation failed");
                if gate_failures {
                    self.inner.report_failure(&action, &error);
                } else {
                    self.inner
                        .notifier
                        .emit(Notification::error(action.clone(), error.to_string()));
                }
                Err(SyncError::Transport(error))
            }
        };

        if let Some(callback) = on_settled {
            callback(&result);
        }
        if result.is_ok() {
            if let Some(message) = success_message {
                self.inner.notifier.emit(Notification::success(action, message));
            }
        }
        result
    }
}
