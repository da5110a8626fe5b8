//! Typed request cache and synchronization engine.
//!
//! Reads go through the [`QueryCoordinator`]: a fresh cache entry is served
//! as is, anything else joins the one in-flight fetch for its key while stale
//! data stays visible. Writes go through the [`MutationCoordinator`], which
//! invalidates the keys a write affects so subscribed readers refetch. A
//! [`SessionGate`](turbo_auth::SessionGate) sits in front of both and turns
//! a credential rejection into exactly one redirect to login.
//!
//! # Example
//!
//! ```rust,ignore
//! use turbo_query::prelude::*;
//!
//! let client = QueryClient::builder(HttpTransport::new("https://api.example.com")?)
//!     .notifier(TracingSink)
//!     .config(EngineConfig::from_path("turbo-query.toml")?)
//!     .build();
//!
//! let page = RequestDescriptor::new("items").param("page", 1);
//! let items: Vec<Item> = client.fetch(&page).await?;
//!
//! client
//!     .mutate(
//!         MutationRequest::post("create-item", "/items")
//!             .payload(serde_json::json!({ "name": "widget" }))
//!             .invalidates("items"),
//!     )
//!     .await?;
//! ```

mod client;
mod config;
mod error;
mod mutation;
mod query;

pub use client::{QueryClient, QueryClientBuilder};
pub use config::{BackoffConfig, ConfigError, EngineConfig, RetryConfig};
pub use error::SyncError;
pub use mutation::{MutationCoordinator, MutationRequest};
pub use query::{QueryCoordinator, QueryHandle, QueryOptions, Subscription};

pub use turbo_auth::{
    Navigator, NoopNavigator, Policy, PolicyContext, PolicyRegistry, Role, Session, SessionStatus,
    User, UserId,
};
pub use turbo_cache::{CacheKey, EntrySnapshot, EntryStatus, KeyCodec, KeyPattern};
pub use turbo_data::{
    FailureKind, HttpTransport, Method, ParamValue, RequestDescriptor, Transport, TransportError,
    TransportRequest,
};
pub use turbo_observability::{
    ChannelSink, Notification, NotificationKind, NotificationSink, NullSink, TracingSink,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        EngineConfig, EntrySnapshot, EntryStatus, HttpTransport, KeyPattern, MutationRequest,
        QueryClient, RequestDescriptor, SyncError, TracingSink,
    };
}
