//! Engine error types.

use thiserror::Error;
use turbo_auth::AuthError;
use turbo_cache::CacheKey;
use turbo_data::{FailureKind, TransportError};

use crate::config::ConfigError;

/// Engine error type.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The transport call failed; carries the classified failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Data arrived but does not have the requested shape.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A read settled without leaving data behind.
    #[error("no data for {0}")]
    NoData(CacheKey),

    /// The current identity does not satisfy a policy.
    #[error("access denied by policy {0}")]
    AccessDenied(String),

    /// No policy registered under this name.
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),

    /// Session resolution or login failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Get the failure classification, for transport failures.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Transport(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Check if the failure was a credential rejection.
    pub fn is_credential_rejected(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_credential_rejected())
    }

    /// Check if this is a permission error.
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind() {
        let err = SyncError::from(TransportError::client(422, "bad input"));
        assert_eq!(err.failure_kind(), Some(FailureKind::ClientError));
        assert!(!err.is_credential_rejected());
        assert_eq!(err.to_string(), "client-error (422): bad input");

        let err = SyncError::from(TransportError::credential_rejected("expired"));
        assert!(err.is_credential_rejected());

        assert_eq!(SyncError::AccessDenied("items.edit".into()).failure_kind(), None);
    }
}
