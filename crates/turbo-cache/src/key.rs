//! Cache key composition.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use turbo_data::{ParamValue, RequestDescriptor};

/// A canonical key identifying one cached query.
///
/// Two descriptors with the same resource and parameter set encode to equal
/// keys regardless of the order parameters were added in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Resource the key belongs to (used for prefix matching).
    resource: String,
    /// The computed key string.
    canonical: String,
}

impl CacheKey {
    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Get the resource name.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Check if this key falls under a resource prefix.
    pub fn matches_prefix(&self, resource_prefix: &str) -> bool {
        matches_prefix(self, resource_prefix)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical)
    }
}

/// Check if a key's resource equals `resource_prefix` or is nested under it.
///
/// Resources nest on `/`: `items` matches `items` and `items/42` but not
/// `itemsets`. An empty prefix matches every key.
pub fn matches_prefix(key: &CacheKey, resource_prefix: &str) -> bool {
    let prefix = resource_prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match key.resource.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Selects cache entries for invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    /// One specific key.
    Exact(CacheKey),
    /// Every key under a resource prefix, whatever its parameters.
    Resource(String),
}

impl KeyPattern {
    /// Match a single key.
    pub fn exact(key: CacheKey) -> Self {
        Self::Exact(key)
    }

    /// Match every key under a resource prefix.
    pub fn resource(prefix: impl Into<String>) -> Self {
        Self::Resource(prefix.into())
    }

    /// Check if a key is selected.
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            Self::Exact(k) => k == key,
            Self::Resource(prefix) => matches_prefix(key, prefix),
        }
    }
}

impl From<CacheKey> for KeyPattern {
    fn from(key: CacheKey) -> Self {
        Self::Exact(key)
    }
}

impl From<&str> for KeyPattern {
    fn from(prefix: &str) -> Self {
        Self::Resource(prefix.to_string())
    }
}

impl std::fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(key) => write!(f, "{}", key),
            Self::Resource(prefix) => write!(f, "{}/*", prefix),
        }
    }
}

/// Turns request descriptors into cache keys.
///
/// Parameters equal to a registered per-resource default are dropped, so a
/// descriptor that spells out the default and one that omits it share a key.
#[derive(Debug, Clone, Default)]
pub struct KeyCodec {
    defaults: HashMap<String, BTreeMap<String, ParamValue>>,
}

impl KeyCodec {
    /// Create a codec with no registered defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the default value of an optional parameter.
    pub fn with_default(
        mut self,
        resource: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Self {
        self.defaults
            .entry(resource.into())
            .or_default()
            .insert(name.into(), value.into());
        self
    }

    /// Build the cache key for a descriptor.
    pub fn encode(&self, descriptor: &RequestDescriptor) -> CacheKey {
        let resource = descriptor.resource();
        let defaults = self.defaults.get(resource);

        let mut canonical = escape(resource);
        let mut separator = '?';
        for (name, value) in descriptor.params() {
            if defaults.and_then(|d| d.get(name)) == Some(value) {
                continue;
            }
            canonical.push(separator);
            separator = '&';
            canonical.push_str(&escape(name));
            canonical.push('=');
            canonical.push(value.tag());
            canonical.push(':');
            canonical.push_str(&escape(&value_repr(value)));
        }

        CacheKey {
            resource: resource.to_string(),
            canonical,
        }
    }
}

fn value_repr(value: &ParamValue) -> String {
    match value {
        // -0.0 == 0.0, so both share a key.
        ParamValue::Float(x) if *x == 0.0 => format!("{:?}", 0.0_f64),
        // Debug keeps the fractional part so 1.0 and 1 never print alike.
        ParamValue::Float(x) => format!("{:?}", x),
        other => other.to_string(),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            '?' => out.push_str("%3F"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn items() -> RequestDescriptor {
        RequestDescriptor::new("items")
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let codec = KeyCodec::new();
        let a = items().param("page", 1).param("sort", "name");
        let b = items().param("sort", "name").param("page", 1);
        assert_eq!(codec.encode(&a), codec.encode(&b));
        assert_eq!(codec.encode(&a).as_str(), "items?page=i:1&sort=s:name");
    }

    #[test]
    fn test_no_params() {
        let key = KeyCodec::new().encode(&items());
        assert_eq!(key.as_str(), "items");
        assert_eq!(key.resource(), "items");
    }

    #[test]
    fn test_absent_optional_is_omitted() {
        let codec = KeyCodec::new();
        let a = items().param("page", 1).param_opt("q", None::<&str>);
        let b = items().param("page", 1);
        assert_eq!(codec.encode(&a), codec.encode(&b));
    }

    #[test]
    fn test_registered_default_is_normalised() {
        let codec = KeyCodec::new().with_default("items", "page", 1);
        let explicit = items().param("page", 1);
        let implicit = items();
        let other = items().param("page", 2);

        assert_eq!(codec.encode(&explicit), codec.encode(&implicit));
        assert_ne!(codec.encode(&explicit), codec.encode(&other));
        // Defaults are per resource.
        let orders = RequestDescriptor::new("orders").param("page", 1);
        assert_eq!(codec.encode(&orders).as_str(), "orders?page=i:1");
    }

    #[test]
    fn test_types_do_not_collide() {
        let codec = KeyCodec::new();
        let int = codec.encode(&items().param("id", 1));
        let string = codec.encode(&items().param("id", "1"));
        let float = codec.encode(&items().param("id", 1.0));
        assert_ne!(int, string);
        assert_ne!(int, float);
        assert_ne!(string, float);
    }

    #[test]
    fn test_signed_zero_shares_a_key() {
        let codec = KeyCodec::new();
        let neg = codec.encode(&RequestDescriptor::new("geo").param("lat", -0.0_f64));
        let pos = codec.encode(&RequestDescriptor::new("geo").param("lat", 0.0_f64));
        assert_eq!(neg, pos);
        assert_ne!(pos, codec.encode(&RequestDescriptor::new("geo").param("lat", 0_i64)));
    }

    #[test]
    fn test_separators_do_not_collide() {
        let codec = KeyCodec::new();
        let one = codec.encode(&items().param("a", "x&b=s:y"));
        let two = codec.encode(&items().param("a", "x").param("b", "y"));
        assert_ne!(one, two);
    }

    #[test]
    fn test_session_scope_and_path_are_not_part_of_key() {
        let codec = KeyCodec::new();
        let a = items().param("page", 1);
        let b = items().param("page", 1).session_scoped().at_path("/v2/items");
        assert_eq!(codec.encode(&a), codec.encode(&b));
    }

    #[test]
    fn test_matches_prefix() {
        let codec = KeyCodec::new();
        let list = codec.encode(&items().param("page", 1));
        let detail = codec.encode(&RequestDescriptor::new("items/42"));
        let other = codec.encode(&RequestDescriptor::new("itemsets"));

        assert!(matches_prefix(&list, "items"));
        assert!(matches_prefix(&detail, "items"));
        assert!(matches_prefix(&detail, "items/"));
        assert!(!matches_prefix(&other, "items"));
        assert!(!matches_prefix(&list, "items/42"));
        assert!(matches_prefix(&other, ""));
    }

    #[test]
    fn test_pattern_matching() {
        let codec = KeyCodec::new();
        let page1 = codec.encode(&items().param("page", 1));
        let page2 = codec.encode(&items().param("page", 2));

        let exact = KeyPattern::from(page1.clone());
        assert!(exact.matches(&page1));
        assert!(!exact.matches(&page2));

        let all = KeyPattern::from("items");
        assert!(all.matches(&page1));
        assert!(all.matches(&page2));
        assert_eq!(all.to_string(), "items/*");
    }

    fn arb_value() -> impl Strategy<Value = ParamValue> {
        prop_oneof![
            any::<bool>().prop_map(ParamValue::Bool),
            any::<i64>().prop_map(ParamValue::Int),
            (-1.0e6f64..1.0e6).prop_map(ParamValue::Float),
            "[a-z0-9&=%?]{0,8}".prop_map(ParamValue::Str),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: encoding ignores insertion order.
        #[test]
        fn prop_encode_order_independent(
            params in prop::collection::btree_map("[a-z&=?%]{1,6}", arb_value(), 0..6),
            shift in any::<usize>(),
        ) {
            let codec = KeyCodec::new();
            let mut pairs: Vec<(String, ParamValue)> = params.into_iter().collect();
            let forward = pairs
                .iter()
                .fold(items(), |d, (k, v)| d.param(k.clone(), v.clone()));

            pairs.reverse();
            if !pairs.is_empty() {
                let n = pairs.len();
                pairs.rotate_left(shift % n);
            }
            let shuffled = pairs
                .iter()
                .fold(items(), |d, (k, v)| d.param(k.clone(), v.clone()));

            prop_assert_eq!(codec.encode(&forward), codec.encode(&shuffled));
        }

        /// Property: distinct values for the same parameter never collide.
        #[test]
        fn prop_distinct_values_distinct_keys(a in arb_value(), b in arb_value()) {
            prop_assume!(a != b);
            let codec = KeyCodec::new();
            let ka = codec.encode(&items().param("x", a));
            let kb = codec.encode(&items().param("x", b));
            prop_assert_ne!(ka, kb);
        }
    }
}
