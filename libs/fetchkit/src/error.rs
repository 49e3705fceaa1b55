use http::StatusCode;
use thiserror::Error;

/// Boxed error type used at the transport boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which schema-bearing field a validation failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// The query-parameter schema
    Params,
    /// The request-body schema
    Body,
    /// The response schema
    Response,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Field::Params => "params",
            Field::Body => "body",
            Field::Response => "response",
        };
        f.write_str(name)
    }
}

/// Structured failure produced by a [`Schema`](crate::schema::Schema)
/// implementation when a value does not match.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SchemaError {
    /// Human-readable description of the mismatch
    pub message: String,
}

impl SchemaError {
    /// Create a schema error with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Client engine error types
///
/// Every failure path in the engine surfaces as one of these variants, so
/// interceptors and callers can rely on a single name/message contract no
/// matter what a transport or validator threw.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A params/body/response value failed schema parsing
    #[error("{field} validation failed: {source}")]
    Validation {
        field: Field,
        #[source]
        source: SchemaError,
    },

    /// The params schema produced a value that cannot be rendered as a
    /// flat query-string mapping
    #[error("params key '{key}' is not representable as a query parameter: {reason}")]
    ParamSerialization { key: String, reason: String },

    /// Transport error (network, connection, etc)
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Request attempt timed out
    #[error("request attempt timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// HTTP non-2xx status
    #[error("HTTP {status}: {status_text}")]
    Status {
        status: StatusCode,
        status_text: String,
        /// Best-effort text rendering of the response body
        body: String,
    },

    /// Response body exceeded size limit
    #[error("response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// JSON parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL (failed to parse, missing scheme/authority, bad scheme)
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Invalid header name
    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// The resolved configuration chain carries no transport
    #[error("no transport configured for this client chain")]
    NoTransport,

    /// Anything that reached the engine without a typed shape
    #[error("{message}")]
    Other { message: String },
}

impl Error {
    /// Normalize a boxed failure into the engine error shape.
    ///
    /// Values that already carry an [`Error`] pass through unchanged;
    /// anything else is treated as an opaque transport failure with its
    /// source preserved.
    #[must_use]
    pub fn coerce(err: BoxError) -> Self {
        match err.downcast::<Error>() {
            Ok(known) => *known,
            Err(other) => Error::Transport(other),
        }
    }

    /// Wrap a plain message into the engine error shape
    pub fn other(message: impl Into<String>) -> Self {
        Error::Other {
            message: message.into(),
        }
    }
}
