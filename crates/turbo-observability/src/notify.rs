//! Human-readable failure and success notifications.
//!
//! The engine only produces notifications; a UI collaborator consumes them
//! through whichever sink it installs.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
    Success,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// A single notification event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Severity.
    pub kind: NotificationKind,
    /// Short title.
    pub title: String,
    /// Longer message.
    pub message: String,
    /// When the event was produced.
    pub emitted_at: DateTime<Utc>,
}

impl Notification {
    /// Create a new notification stamped with the current time.
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            emitted_at: Utc::now(),
        }
    }

    /// Create an error notification.
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, title, message)
    }

    /// Create a success notification.
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, title, message)
    }
}

/// Receives notifications.
///
/// `emit` must not block and must not panic; sinks swallow their own
/// delivery failures.
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification.
    fn emit(&self, notification: Notification);
}

impl<T: NotificationSink + ?Sized> NotificationSink for Arc<T> {
    fn emit(&self, notification: Notification) {
        (**self).emit(notification)
    }
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn emit(&self, _notification: Notification) {}
}

/// Writes notifications to the `tracing` pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, n: Notification) {
        match n.kind {
            NotificationKind::Error => {
                tracing::error!(title = %n.title, "{}", n.message)
            }
            NotificationKind::Warning => {
                tracing::warn!(title = %n.title, "{}", n.message)
            }
            NotificationKind::Info | NotificationKind::Success => {
                tracing::info!(kind = %n.kind, title = %n.title, "{}", n.message)
            }
        }
    }
}

/// Forwards notifications over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    /// Create a sink and the receiver a UI collaborator reads from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn emit(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(Notification::error("Failed to load items", "server-error (500)"));
        sink.emit(Notification::success("Saved", "item created"));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, NotificationKind::Error);
        assert_eq!(first.title, "Failed to load items");
        assert_eq!(rx.try_recv().unwrap().kind, NotificationKind::Success);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(Notification::new(NotificationKind::Info, "t", "m"));
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&NotificationKind::Warning).unwrap();
        assert_eq!(json, r#""warning""#);
    }
}
