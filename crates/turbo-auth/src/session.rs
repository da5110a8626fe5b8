//! Session state and the gate that guards it.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::policy::{Policy, PolicyContext};
use crate::user::User;

/// Where the session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Not resolved yet.
    #[default]
    Unknown,
    /// A verified identity is attached.
    Authenticated,
    /// Resolved, nobody signed in.
    Anonymous,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Anonymous => write!(f, "anonymous"),
        }
    }
}

/// Snapshot of the process-wide session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Session {
    /// The signed-in user, if any.
    pub identity: Option<User>,
    /// Resolution status.
    pub status: SessionStatus,
    /// Incremented on every credential loss or sign-out.
    pub epoch: u64,
    /// When the status last changed.
    pub changed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Check if a verified identity is attached.
    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

/// Navigation collaborator the gate signals on credential loss.
pub trait Navigator: Send + Sync {
    /// Send the user to the login boundary.
    fn redirect_to_login(&self);
}

/// Navigator that does nothing (headless use).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn redirect_to_login(&self) {}
}

/// Tracks the authenticated identity and enforces the session state machine.
///
/// ```text
/// unknown --probe--> authenticated | anonymous
/// authenticated --credential rejected / logout--> anonymous
/// anonymous --login--> authenticated
/// ```
///
/// A credential context starts whenever the session is resolved, signed in
/// or signed out. The first credential rejection in a context redirects to
/// login; the rest are absorbed until the next context starts.
pub struct SessionGate {
    state: Mutex<GateState>,
    navigator: Arc<dyn Navigator>,
    resolving: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct GateState {
    session: Session,
    /// The current credential context has already lost its credentials.
    loss_handled: bool,
}

impl GateState {
    fn begin_context(&mut self, status: SessionStatus, identity: Option<User>) {
        self.session.identity = identity;
        self.session.status = status;
        self.session.changed_at = Some(Utc::now());
        self.loss_handled = false;
    }
}

impl SessionGate {
    /// Create a gate in the `Unknown` state.
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            navigator,
            resolving: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a snapshot of the session.
    pub fn session(&self) -> Session {
        self.lock().session.clone()
    }

    /// Get the current status.
    pub fn status(&self) -> SessionStatus {
        self.lock().session.status
    }

    /// Get the current identity.
    pub fn identity(&self) -> Option<User> {
        self.lock().session.identity.clone()
    }

    /// Get the credential epoch.
    pub fn epoch(&self) -> u64 {
        self.lock().session.epoch
    }

    /// Resolve an `Unknown` session with the given probe.
    ///
    /// The probe answers `Some(user)` for a verified identity and `None` when
    /// nobody is signed in. Concurrent callers share a single probe; an
    /// already-resolved session is returned without probing.
    pub async fn resolve_with<F, Fut>(&self, probe: F) -> Result<SessionStatus, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<User>, AuthError>>,
    {
        let status = self.status();
        if status != SessionStatus::Unknown {
            return Ok(status);
        }

        let _guard = self.resolving.lock().await;
        let status = self.status();
        if status != SessionStatus::Unknown {
            return Ok(status);
        }

        let resolved = probe().await?;
        let mut state = self.lock();
        // A login or rejection may have landed while the probe was out.
        if state.session.status != SessionStatus::Unknown {
            return Ok(state.session.status);
        }
        match resolved {
            Some(user) => {
                tracing::info!(user = %user.id, "session resolved as authenticated");
                state.begin_context(SessionStatus::Authenticated, Some(user));
            }
            None => {
                tracing::info!("session resolved as anonymous");
                state.begin_context(SessionStatus::Anonymous, None);
            }
        }
        Ok(state.session.status)
    }

    /// Attach a verified identity after a successful login.
    pub fn authenticate(&self, user: User) {
        let mut state = self.lock();
        tracing::info!(user = %user.id, from = %state.session.status, "session authenticated");
        state.begin_context(SessionStatus::Authenticated, Some(user));
    }

    /// Drop the identity after an explicit logout. No redirect.
    ///
    /// Returns `true` if an identity was attached.
    pub fn sign_out(&self) -> bool {
        let mut state = self.lock();
        let had_identity = state.session.identity.is_some();
        tracing::info!(from = %state.session.status, "session signed out");
        state.session.epoch += 1;
        state.begin_context(SessionStatus::Anonymous, None);
        had_identity
    }

    /// Handle a credential-rejected transport failure.
    ///
    /// Leaves the session `Anonymous`, bumps the epoch and redirects to
    /// login. Only the first rejection of a credential context acts; later
    /// ones return `false` and do nothing.
    pub fn reject_credentials(&self) -> bool {
        self.reject_credentials_with(|| {})
    }

    /// Like [`reject_credentials`](Self::reject_credentials), running
    /// `on_loss` after the transition and before the redirect.
    ///
    /// `on_loss` runs without the session lock held.
    pub fn reject_credentials_with<F: FnOnce()>(&self, on_loss: F) -> bool {
        {
            let mut state = self.lock();
            if state.loss_handled {
                tracing::debug!("credential rejection absorbed, already handled in this context");
                return false;
            }
            tracing::warn!(from = %state.session.status, "credentials rejected, session is now anonymous");
            state.loss_handled = true;
            state.session.identity = None;
            state.session.status = SessionStatus::Anonymous;
            state.session.epoch += 1;
            state.session.changed_at = Some(Utc::now());
        }
        on_loss();
        self.navigator.redirect_to_login();
        true
    }

    /// Evaluate a policy against the current identity.
    pub fn check_access(&self, policy: &Policy, ctx: &PolicyContext) -> bool {
        let state = self.lock();
        policy.evaluate(state.session.identity.as_ref(), ctx)
    }
}

impl std::fmt::Debug for SessionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGate")
            .field("session", &self.session())
            .finish_non_exhaustive()
    }
}
