//! Freshness and eviction policies.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::key::{matches_prefix, CacheKey};

/// Default staleness window.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(30);

/// Decides how long entries stay fresh and when unused ones are evicted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Staleness window for resources without an override.
    pub stale_time: Duration,
    /// Per-resource staleness windows, keyed by resource prefix.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, Duration>,
    /// Evict unsubscribed entries after this long. `None` keeps them forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_eviction: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            stale_time: DEFAULT_STALE_TIME,
            overrides: BTreeMap::new(),
            idle_eviction: None,
        }
    }
}

impl CachePolicy {
    /// Create a policy with the given default staleness window.
    pub fn new(stale_time: Duration) -> Self {
        Self {
            stale_time,
            ..Default::default()
        }
    }

    /// Set the staleness window for a resource prefix.
    pub fn with_resource(mut self, prefix: impl Into<String>, stale_time: Duration) -> Self {
        self.overrides.insert(prefix.into(), stale_time);
        self
    }

    /// Enable idle eviction.
    pub fn with_idle_eviction(mut self, after: Duration) -> Self {
        self.idle_eviction = Some(after);
        self
    }

    /// Get the staleness window for a key.
    ///
    /// The longest matching resource prefix wins.
    pub fn stale_time_for(&self, key: &CacheKey) -> Duration {
        self.overrides
            .iter()
            .filter(|(prefix, _)| matches_prefix(key, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, window)| *window)
            .unwrap_or(self.stale_time)
    }

    /// Check if idle entries are ever evicted.
    pub fn evicts_idle(&self) -> bool {
        self.idle_eviction.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyCodec;
    use turbo_data::RequestDescriptor;

    fn key(resource: &str) -> CacheKey {
        KeyCodec::new().encode(&RequestDescriptor::new(resource))
    }

    #[test]
    fn test_default_policy() {
        let policy = CachePolicy::default();
        assert_eq!(policy.stale_time_for(&key("items")), DEFAULT_STALE_TIME);
        assert!(!policy.evicts_idle());
    }

    #[test]
    fn test_resource_override() {
        let policy = CachePolicy::new(Duration::from_secs(10))
            .with_resource("items", Duration::from_secs(60))
            .with_resource("items/featured", Duration::from_secs(1));

        assert_eq!(policy.stale_time_for(&key("items")), Duration::from_secs(60));
        assert_eq!(policy.stale_time_for(&key("items/7")), Duration::from_secs(60));
        assert_eq!(
            policy.stale_time_for(&key("items/featured")),
            Duration::from_secs(1)
        );
        assert_eq!(policy.stale_time_for(&key("orders")), Duration::from_secs(10));
    }

    #[test]
    fn test_idle_eviction() {
        let policy = CachePolicy::default().with_idle_eviction(Duration::from_secs(300));
        assert!(policy.evicts_idle());
        assert_eq!(policy.idle_eviction, Some(Duration::from_secs(300)));
    }
}
