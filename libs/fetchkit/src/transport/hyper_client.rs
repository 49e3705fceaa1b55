use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use serde_json::Value;

use super::Transport;
use crate::error::{BoxError, Error};
use crate::request::Request;
use crate::response::Response;

/// Default User-Agent string for outbound requests
pub const DEFAULT_USER_AGENT: &str = concat!("fetchkit/", env!("CARGO_PKG_VERSION"));

/// Configuration for [`HyperTransport`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Default per-request timeout when a request carries none (default: 30s)
    pub request_timeout: Duration,

    /// Maximum response body size in bytes (default: 10 MB)
    pub max_body_size: usize,

    /// User-Agent header value, injected only when the request has none
    pub user_agent: String,

    /// Allow plain `http://` URLs (default: false)
    ///
    /// Only for testing with local mock servers; production traffic should
    /// stay on HTTPS.
    pub allow_insecure_http: bool,

    /// Timeout for idle connections in the pool (default: 90 seconds)
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum number of idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            allow_insecure_http: false,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl TransportConfig {
    /// Configuration for testing against local mock servers (allows plain
    /// HTTP, small limits)
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024,
            allow_insecure_http: true,
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Self::default()
        }
    }
}

/// The default network adapter: a pooled hyper client with rustls TLS.
///
/// Bodies cross the boundary as the values the schema layer produced:
/// string values are sent as text, structured values as JSON — encoding
/// happens here at the adapter edge, never inside the engine.
pub struct HyperTransport {
    client: LegacyClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    config: TransportConfig,
}

impl HyperTransport {
    /// Create a transport with default configuration
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, Error> {
        Self::with_config(TransportConfig::default())
    }

    /// Create a transport with the given configuration
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn with_config(config: TransportConfig) -> Result<Self, Error> {
        if config.allow_insecure_http {
            tracing::warn!(
                "insecure HTTP enabled (TransportConfig::allow_insecure_http); \
                 use only for testing with mock servers"
            );
        }

        let connector = https_connector(config.allow_insecure_http)?;

        let mut builder = LegacyClient::builder(TokioExecutor::new());
        // pool_timer is required for pool_idle_timeout to take effect
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle_timeout) = config.pool_idle_timeout {
            builder.pool_idle_timeout(idle_timeout);
        }
        let client = builder.build::<_, Full<Bytes>>(connector);

        Ok(Self { client, config })
    }
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Build the HTTPS connector with webpki roots.
///
/// HTTP/2 is negotiated via ALPN (`enable_all_versions`); protocol
/// selection happens during the TLS handshake.
fn https_connector(allow_http: bool) -> Result<HttpsConnector<HttpConnector>, Error> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(provider)
        .map_err(|e| Error::Tls(Box::new(e)))?;
    let connector = if allow_http {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}

/// Validate the URL and scheme against the transport configuration.
///
/// The engine keeps URLs opaque; this adapter requires an absolute http(s)
/// URL with an authority.
fn validate_url(url: &str, allow_http: bool) -> Result<http::Uri, Error> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| Error::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;

    if uri.authority().is_none() {
        return Err(Error::InvalidUrl {
            url: url.to_owned(),
            reason: "missing host/authority".to_owned(),
        });
    }

    match uri.scheme_str() {
        Some("https") => Ok(uri),
        Some("http") if allow_http => Ok(uri),
        Some("http") => Err(Error::InvalidUrl {
            url: url.to_owned(),
            reason: "HTTPS required (insecure HTTP is disabled)".to_owned(),
        }),
        Some(scheme) => Err(Error::InvalidUrl {
            url: url.to_owned(),
            reason: format!("unsupported scheme '{scheme}'"),
        }),
        None => Err(Error::InvalidUrl {
            url: url.to_owned(),
            reason: "missing scheme".to_owned(),
        }),
    }
}

/// Encode a validated body value for the wire.
///
/// String values go as UTF-8 text, everything else as JSON; the matching
/// default Content-Type is applied only when the request carries none.
fn encode_body(body: &Value) -> Result<(Bytes, &'static str), Error> {
    match body {
        Value::String(text) => Ok((
            Bytes::from(text.clone()),
            "text/plain; charset=utf-8",
        )),
        other => Ok((
            Bytes::from(serde_json::to_vec(other)?),
            "application/json",
        )),
    }
}

/// Collect a streamed body, enforcing the byte limit as frames arrive.
async fn read_body_limited(body: hyper::body::Incoming, limit: usize) -> Result<Bytes, Error> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| Error::Transport(Box::new(e)))?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(Error::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

#[async_trait]
impl Transport for HyperTransport {
    async fn call(&self, request: Request) -> Result<Response, BoxError> {
        let uri = validate_url(&request.url, self.config.allow_insecure_http)?;

        let (body_bytes, default_content_type) = match &request.body {
            None | Some(Value::Null) => (Bytes::new(), None),
            Some(value) => {
                let (bytes, content_type) = encode_body(value)?;
                (bytes, Some(content_type))
            }
        };

        let mut outbound = http::Request::builder()
            .method(request.method.clone())
            .uri(uri)
            .body(Full::new(body_bytes))?;

        let headers = outbound.headers_mut();
        for (name, value) in &request.headers {
            headers.append(name.clone(), value.clone());
        }
        if let Some(content_type) = default_content_type {
            if !headers.contains_key(http::header::CONTENT_TYPE) {
                headers.insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static(content_type),
                );
            }
        }
        if !headers.contains_key(http::header::USER_AGENT) {
            headers.insert(
                http::header::USER_AGENT,
                http::HeaderValue::try_from(self.config.user_agent.as_str())
                    .map_err(Error::InvalidHeaderValue)?,
            );
        }

        let timeout = request.timeout.unwrap_or(self.config.request_timeout);
        let inbound = match tokio::time::timeout(timeout, self.client.request(outbound)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(Box::new(Error::Transport(Box::new(e)))),
            Err(_elapsed) => return Err(Box::new(Error::Timeout(timeout))),
        };

        let status = inbound.status();
        let headers = inbound.headers().clone();
        let body = read_body_limited(inbound.into_body(), self.config.max_body_size).await?;

        Ok(Response::new(status, headers, body))
    }
}
