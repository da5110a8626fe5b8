//! In-memory query cache for turbo-query.
//!
//! Turns request descriptors into canonical keys and keeps one entry per key
//! with stale-while-revalidate semantics.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use turbo_cache::{CacheStore, EntryStatus, KeyCodec, KeyPattern};
//! use turbo_data::RequestDescriptor;
//!
//! let codec = KeyCodec::new();
//! let key = codec.encode(&RequestDescriptor::new("items").param("page", 1));
//!
//! let mut store = CacheStore::default();
//! store.put(&key, serde_json::json!([{"id": 1}]), Duration::from_secs(30));
//! store.mark_stale(&KeyPattern::from("items"));
//!
//! let entry = store.get(&key).unwrap();
//! assert_eq!(entry.status, EntryStatus::Stale);
//! assert!(entry.has_data());
//! ```

mod error;
mod key;
mod policy;
mod store;

pub use error::CacheError;
pub use key::{matches_prefix, CacheKey, KeyCodec, KeyPattern};
pub use policy::{CachePolicy, DEFAULT_STALE_TIME};
pub use store::{
    CacheStore, Dispatch, EntrySnapshot, EntryStatus, FetchToken, Listener, SubscriptionId,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{CacheKey, CacheStore, EntrySnapshot, EntryStatus, KeyCodec, KeyPattern};
}
