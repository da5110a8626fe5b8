//! Transport failure taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification every transport failure is mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Connection, timeout or other transient I/O failure.
    Network,
    /// The caller's session is no longer valid.
    CredentialRejected,
    /// The request itself was at fault (4xx except the credential class).
    ClientError,
    /// The remote end failed (5xx) or answered with something unusable.
    ServerError,
}

impl FailureKind {
    /// Classify an HTTP status code. Returns `None` for non-error statuses.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(Self::CredentialRejected),
            400..=499 => Some(Self::ClientError),
            500..=599 => Some(Self::ServerError),
            _ => None,
        }
    }

    /// Whether an automatic retry may help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::ServerError)
    }

    /// Get the kebab-case name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network-error",
            Self::CredentialRejected => "credential-rejected",
            Self::ClientError => "client-error",
            Self::ServerError => "server-error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified transport failure.
///
/// `Clone` so a single failed fetch can be handed to every caller attached to
/// it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
pub struct TransportError {
    /// Failure class.
    pub kind: FailureKind,
    /// HTTP status, when the remote end answered.
    pub status: Option<u16>,
    /// Human-readable message.
    pub message: String,
}

impl TransportError {
    /// Create a new transport error.
    pub fn new(kind: FailureKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    /// A network-level failure (no response received).
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, None, message)
    }

    /// The session was rejected by the remote end.
    pub fn credential_rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::CredentialRejected, Some(401), message)
    }

    /// A client-input error with the given status.
    pub fn client(status: u16, message: impl Into<String>) -> Self {
        Self::new(FailureKind::ClientError, Some(status), message)
    }

    /// A server-side failure with the given status.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::new(FailureKind::ServerError, Some(status), message)
    }

    /// The remote end answered but the body could not be decoded.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ServerError, None, message)
    }

    /// Build an error from an HTTP error status.
    ///
    /// Statuses outside the 4xx/5xx range are treated as server errors since
    /// the caller only reaches this for responses it could not accept.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = FailureKind::from_status(status).unwrap_or(FailureKind::ServerError);
        Self::new(kind, Some(status), message)
    }

    /// Check if this failure means the session was lost.
    pub fn is_credential_rejected(&self) -> bool {
        self.kind == FailureKind::CredentialRejected
    }

    /// Check if an automatic retry may help.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::malformed(e.to_string())
    }
}
