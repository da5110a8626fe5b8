//! Transport layer for turbo-query.
//!
//! This crate provides:
//! - `RequestDescriptor` - Semantic description of a read (resource + params)
//! - `Transport` - The single-network-call seam, with an HTTP implementation
//! - `TransportError` / `FailureKind` - The failure taxonomy every error maps to
//! - `RetryPolicy` - Bounded retry with backoff
//!
//! # Example
//!
//! ```rust,ignore
//! use turbo_data::{HttpTransport, RequestDescriptor, Transport};
//!
//! let transport = HttpTransport::builder("https://api.example.com")
//!     .bearer_auth(token)
//!     .build()?;
//!
//! let page = RequestDescriptor::new("items").param("page", 1);
//! let items = transport.send(page.to_request()).await?;
//! ```

mod error;
mod request;
mod retry;
mod timeout;
mod transport;

pub use error::{FailureKind, TransportError};
pub use request::{ParamValue, RequestDescriptor, TransportRequest};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use timeout::TimeoutConfig;
pub use transport::{decode_response, HttpTransport, HttpTransportBuilder, Transport};

pub use http::Method;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        FailureKind, Method, ParamValue, RequestDescriptor, Transport, TransportError,
        TransportRequest,
    };
}
