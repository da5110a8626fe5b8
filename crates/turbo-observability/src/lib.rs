//! Observability for turbo-query.
//!
//! This crate provides:
//! - `NotificationSink` - Fire-and-forget channel for human-readable events
//! - `TracingSink` / `ChannelSink` / `NullSink` - Stock sinks
//! - `init_logging` - `tracing-subscriber` setup in human or JSON format

mod logging;
mod notify;

pub use logging::*;
pub use notify::*;
