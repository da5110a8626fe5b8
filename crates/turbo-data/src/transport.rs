//! The transport seam and its HTTP implementation.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::error::TransportError;
use crate::request::TransportRequest;
use crate::timeout::TimeoutConfig;

/// Issues a single network call and classifies its failure.
///
/// Implementations own no cache and never retry; retries are the query
/// coordinator's business.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the decoded JSON body.
    async fn send(&self, request: TransportRequest) -> Result<Value, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: TransportRequest) -> Result<Value, TransportError> {
        (**self).send(request).await
    }
}

/// JSON-over-HTTP transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport with default headers and timeouts.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Self::builder(base_url).build()
    }

    /// Start building a transport.
    pub fn builder(base_url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder {
            base_url: base_url.into(),
            headers: Vec::new(),
            timeout: TimeoutConfig::default(),
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<Value, TransportError> {
        let url = self.url(&request.path);
        tracing::debug!(method = %request.method, url = %url, "sending request");

        let mut builder = self.client.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify_reqwest_error)?;

        decode_response(status, &body)
    }
}

/// Builder for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportBuilder {
    base_url: String,
    headers: Vec<(String, String)>,
    timeout: TimeoutConfig,
}

impl HttpTransportBuilder {
    /// Add a header sent with every request.
    pub fn with_default_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Add a bearer token authorization header.
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        self.with_default_header("Authorization", format!("Bearer {}", token.as_ref()))
    }

    /// Set timeouts.
    pub fn with_timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<HttpTransport, TransportError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &self.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| TransportError::network(format!("invalid header {}: {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::network(format!("invalid header {}: {}", key, e)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(self.timeout.connect)
            .timeout(self.timeout.total)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::network(e.to_string()))?;

        Ok(HttpTransport {
            client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Turn a status and raw body into a JSON value or a classified error.
///
/// An empty success body decodes to `Value::Null`. Error bodies contribute
/// their `message` or `error` field when they are JSON.
pub fn decode_response(status: u16, body: &[u8]) -> Result<Value, TransportError> {
    if (200..300).contains(&status) {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        return Ok(serde_json::from_slice(body)?);
    }

    let message = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            (!text.is_empty()).then_some(text)
        })
        .unwrap_or_else(|| format!("HTTP {}", status));

    Err(TransportError::from_status(status, message))
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_decode() {
        return TransportError::malformed(err.to_string());
    }
    match err.status() {
        Some(status) => TransportError::from_status(status.as_u16(), err.to_string()),
        None => TransportError::network(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use serde_json::json;

    #[test]
    fn test_decode_success_body() {
        let value = decode_response(200, br#"[{"id":1}]"#).unwrap();
        assert_eq!(value, json!([{"id": 1}]));
    }

    #[test]
    fn test_decode_empty_body_is_null() {
        assert_eq!(decode_response(204, b"").unwrap(), Value::Null);
        assert_eq!(decode_response(200, b"  \n").unwrap(), Value::Null);
    }

    #[test]
    fn test_decode_malformed_success_body() {
        let err = decode_response(200, b"<html>").unwrap_err();
        assert_eq!(err.kind, FailureKind::ServerError);
        assert_eq!(err.status, None);
    }

    #[test]
    fn test_decode_error_message_from_json() {
        let err = decode_response(422, br#"{"message":"name is required"}"#).unwrap_err();
        assert_eq!(err.kind, FailureKind::ClientError);
        assert_eq!(err.status, Some(422));
        assert_eq!(err.message, "name is required");
    }

    #[test]
    fn test_decode_error_message_fallbacks() {
        let err = decode_response(503, b"upstream down").unwrap_err();
        assert_eq!(err.kind, FailureKind::ServerError);
        assert_eq!(err.message, "upstream down");

        let err = decode_response(401, b"").unwrap_err();
        assert!(err.is_credential_rejected());
        assert_eq!(err.message, "HTTP 401");
    }

    #[test]
    fn test_url_joining() {
        let transport = HttpTransport::new("https://api.example.com/").unwrap();
        assert_eq!(transport.base_url(), "https://api.example.com");
        assert_eq!(transport.url("/items"), "https://api.example.com/items");
        assert_eq!(transport.url("items"), "https://api.example.com/items");
        assert_eq!(
            transport.url("https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let result = HttpTransport::builder("https://api.example.com")
            .with_default_header("bad header", "x")
            .build();
        assert!(result.is_err());
    }
}
