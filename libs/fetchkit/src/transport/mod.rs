//! The consumed network capability and the default hyper-based adapter.

mod hyper_client;

pub use hyper_client::{DEFAULT_USER_AGENT, HyperTransport, TransportConfig};

use async_trait::async_trait;

use crate::error::BoxError;
use crate::request::Request;
use crate::response::Response;

/// The external "perform network call" primitive.
///
/// The engine never dictates the implementation: anything that can turn a
/// [`Request`] into a [`Response`] (or an opaque failure) qualifies, which
/// keeps the whole engine scriptable for tests. Failures are normalized by
/// [`Error::coerce`](crate::Error::coerce) before entering the error
/// pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the network call for `request`.
    async fn call(&self, request: Request) -> Result<Response, BoxError>;
}
