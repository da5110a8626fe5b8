//! Cache error types.

use thiserror::Error;

use crate::key::CacheKey;

/// Errors that can occur when using the cache store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The entry still has subscribers or an in-flight fetch.
    #[error("entry in use: {key} ({subscribers} subscribers, fetching: {fetching})")]
    EntryInUse {
        /// Key of the entry.
        key: CacheKey,
        /// Attached subscribers.
        subscribers: usize,
        /// Whether a fetch is outstanding.
        fetching: bool,
    },

    /// No entry under this key.
    #[error("no entry for key: {0}")]
    NotFound(CacheKey),
}
