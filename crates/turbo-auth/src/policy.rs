//! Authorization policies and the startup-time registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::user::{Role, User};

type Predicate = dyn Fn(Option<&User>, &PolicyContext) -> bool + Send + Sync;

/// Resource-specific facts a policy decides on (owner id, status, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyContext {
    fields: Map<String, Value>,
}

impl PolicyContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Get a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for PolicyContext {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// A stateless predicate over the current identity and a context.
#[derive(Clone)]
pub struct Policy {
    requires_identity: bool,
    predicate: Arc<Predicate>,
}

impl Policy {
    /// Create a policy from a predicate.
    ///
    /// When `requires_identity` is set the predicate is never consulted for
    /// an anonymous caller; the answer is `false`.
    pub fn new<F>(requires_identity: bool, predicate: F) -> Self
    where
        F: Fn(Option<&User>, &PolicyContext) -> bool + Send + Sync + 'static,
    {
        Self {
            requires_identity,
            predicate: Arc::new(predicate),
        }
    }

    /// Allows everyone, signed in or not.
    pub fn public() -> Self {
        Self::new(false, |_, _| true)
    }

    /// Allows any signed-in identity.
    pub fn authenticated() -> Self {
        Self::new(true, |_, _| true)
    }

    /// Allows identities holding at least the given role.
    pub fn role(min: Role) -> Self {
        Self::new(true, move |user, _| user.is_some_and(|u| u.has_permission(min)))
    }

    /// Allows the identity whose id equals the context field `field`.
    pub fn owner(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(true, move |user, ctx| match (user, ctx.get_str(&field)) {
            (Some(u), Some(owner)) => u.id.as_str() == owner,
            _ => false,
        })
    }

    /// Allows when either policy allows.
    pub fn or(self, other: Policy) -> Self {
        let requires_identity = self.requires_identity && other.requires_identity;
        Self::new(requires_identity, move |user, ctx| {
            self.evaluate(user, ctx) || other.evaluate(user, ctx)
        })
    }

    /// Check if the policy needs a signed-in identity.
    pub fn requires_identity(&self) -> bool {
        self.requires_identity
    }

    /// Evaluate the policy.
    pub fn evaluate(&self, identity: Option<&User>, ctx: &PolicyContext) -> bool {
        if self.requires_identity && identity.is_none() {
            return false;
        }
        (self.predicate)(identity, ctx)
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("requires_identity", &self.requires_identity)
            .finish_non_exhaustive()
    }
}

/// Named policies, fixed once built.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: Arc<HashMap<String, Policy>>,
}

impl PolicyRegistry {
    /// Start building a registry.
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// Check if a policy is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    /// Registered policy names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Builder for [`PolicyRegistry`].
#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
    policies: HashMap<String, Policy>,
}

impl PolicyRegistryBuilder {
    /// Register a policy. A later registration under the same name wins.
    pub fn register(mut self, name: impl Into<String>, policy: Policy) -> Self {
        let name = name.into();
        if self.policies.insert(name.clone(), policy).is_some() {
            tracing::warn!(policy = %name, "policy registered twice, keeping the last one");
        }
        self
    }

    /// Freeze the registry.
    pub fn build(self) -> PolicyRegistry {
        PolicyRegistry {
            policies: Arc::new(self.policies),
        }
    }
}
