//! Authorization errors.

use thiserror::Error;

/// Authorization error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No policy registered under this name.
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),

    /// The current identity does not satisfy the policy.
    #[error("access denied by policy {0}")]
    AccessDenied(String),

    /// The session probe failed for a reason other than missing credentials.
    #[error("session resolution failed: {0}")]
    ResolutionFailed(String),

    /// A login answered with something that is not an identity.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}

impl AuthError {
    /// Check if this is a permission error.
    pub fn is_permission_error(&self) -> bool {
        matches!(self, AuthError::AccessDenied(_))
    }
}
