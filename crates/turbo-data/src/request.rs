//! Request descriptors and transport requests.

use std::collections::BTreeMap;

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scalar request parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Single-character type tag used in canonical keys.
    pub fn tag(&self) -> char {
        match self {
            Self::Bool(_) => 'b',
            Self::Int(_) => 'i',
            Self::Float(_) => 'f',
            Self::Str(_) => 's',
        }
    }

    /// Render the value the way it goes on the wire.
    pub fn to_query_value(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for ParamValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for ParamValue {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Semantic description of a read: a resource name plus scalar parameters.
///
/// Built with consuming builder methods and immutable afterwards.
///
/// # Example
///
/// ```
/// use turbo_data::RequestDescriptor;
///
/// let items = RequestDescriptor::new("items")
///     .param("page", 1)
///     .param_opt("sort", None::<&str>);
///
/// assert_eq!(items.path(), "/items");
/// assert!(items.param_value("sort").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    resource: String,
    params: BTreeMap<String, ParamValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default)]
    session_scoped: bool,
}

impl RequestDescriptor {
    /// Create a descriptor for a resource with no parameters.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            params: BTreeMap::new(),
            path: None,
            session_scoped: false,
        }
    }

    /// Add a parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Add an optional parameter. `None` leaves the parameter out entirely.
    pub fn param_opt<V: Into<ParamValue>>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.param(name, v),
            None => self,
        }
    }

    /// Send the request to an explicit path instead of `/{resource}`.
    pub fn at_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Mark the data as belonging to the signed-in identity.
    pub fn session_scoped(mut self) -> Self {
        self.session_scoped = true;
        self
    }

    /// Get the resource name.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Get all parameters, sorted by name.
    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    /// Get a single parameter.
    pub fn param_value(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Get the transport path.
    pub fn path(&self) -> String {
        match &self.path {
            Some(path) => path.clone(),
            None => format!("/{}", self.resource.trim_start_matches('/')),
        }
    }

    /// Check if the data is tied to the current session.
    pub fn is_session_scoped(&self) -> bool {
        self.session_scoped
    }

    /// Build the GET request that reads this descriptor.
    pub fn to_request(&self) -> TransportRequest {
        let mut request = TransportRequest::get(self.path());
        for (name, value) in &self.params {
            request = request.query(name.clone(), value.to_query_value());
        }
        request
    }
}

/// A single network call handed to a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the transport's base URL.
    pub path: String,
    /// Query string pairs.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
}

impl TransportRequest {
    /// Create a request with the given method.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Create a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Create a POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Add a query pair.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}
