use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method};
use serde_json::Value;

use crate::call::CallBuilder;
use crate::config::{ClientConfig, ResolvedConfig, resolve};
use crate::error::Error;
use crate::interceptor::{
    CallContext, ErrorContext, InterceptorOptions, Registry, error_callback, request_callback,
    response_callback,
};
use crate::request::Request;
use crate::response::Response;
use crate::schema::{Schema, SchemaCatalog, SchemaSource};
use crate::transport::Transport;

/// One node of an extension chain: the keys set on this instance, a shared
/// back-reference to the instance it extends, and this instance's own
/// interceptor lists.
pub(crate) struct ClientNode {
    pub(crate) config: ClientConfig,
    pub(crate) parent: Option<Arc<ClientNode>>,
    pub(crate) interceptors: Registry,
}

/// A configured client instance.
///
/// Instances are immutable after construction except for their interceptor
/// lists. Extending never copies or touches the parent — the child holds a
/// shared back-reference and all inherited behavior comes from explicit
/// chain traversal at call time.
///
/// # Example
///
/// ```ignore
/// let api = Client::builder()
///     .url("https://api.example.com/users")
///     .transport(Arc::new(HyperTransport::new()?))
///     .response_schema_with(|s| s.of::<Vec<User>>())
///     .build()?;
///
/// let users: Vec<User> = api.call().send_as().await?;
/// ```
#[derive(Clone)]
pub struct Client {
    pub(crate) node: Arc<ClientNode>,
}

impl Client {
    /// Start building a root instance
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new(None)
    }

    /// Start building an instance extending this one.
    ///
    /// The new instance's keys take precedence over this chain's; keys it
    /// leaves unset fall back to the nearest ancestor that defines them.
    #[must_use]
    pub fn extend(&self) -> ClientBuilder {
        ClientBuilder::new(Some(Arc::clone(&self.node)))
    }

    /// Start a call against this instance
    #[must_use]
    pub fn call(&self) -> CallBuilder {
        CallBuilder::new(self.clone())
    }

    /// Compute the flattened, schema-materialized configuration for this
    /// instance. Calls do this internally; exposed for diagnostics.
    #[must_use]
    pub fn resolved_config(&self) -> ResolvedConfig {
        resolve(&self.node)
    }

    /// Register a request interceptor on this instance.
    ///
    /// Request interceptors run after the request is built, in
    /// chain-root-first then registration order; each receives the previous
    /// one's output.
    pub fn on_request<F, Fut>(&self, callback: F)
    where
        F: Fn(Request, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Request, Error>> + Send + 'static,
    {
        self.on_request_with(callback, InterceptorOptions::default());
    }

    /// Register a request interceptor with options (cancellation token).
    pub fn on_request_with<F, Fut>(&self, callback: F, options: InterceptorOptions)
    where
        F: Fn(Request, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Request, Error>> + Send + 'static,
    {
        self.node
            .interceptors
            .add_request(request_callback(callback), options);
    }

    /// Register a response interceptor on this instance.
    ///
    /// Response interceptors receive the current response and the final
    /// request that produced it.
    pub fn on_response<F, Fut>(&self, callback: F)
    where
        F: Fn(Response, Request, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, Error>> + Send + 'static,
    {
        self.on_response_with(callback, InterceptorOptions::default());
    }

    /// Register a response interceptor with options (cancellation token).
    pub fn on_response_with<F, Fut>(&self, callback: F, options: InterceptorOptions)
    where
        F: Fn(Response, Request, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, Error>> + Send + 'static,
    {
        self.node
            .interceptors
            .add_response(response_callback(callback), options);
    }

    /// Register an error interceptor on this instance.
    ///
    /// Error interceptors may transform or annotate the error but cannot
    /// suppress it; the pipeline's final value is the call's terminal
    /// error.
    pub fn on_error<F, Fut>(&self, callback: F)
    where
        F: Fn(Error, ErrorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Error> + Send + 'static,
    {
        self.on_error_with(callback, InterceptorOptions::default());
    }

    /// Register an error interceptor with options (cancellation token).
    pub fn on_error_with<F, Fut>(&self, callback: F, options: InterceptorOptions)
    where
        F: Fn(Error, ErrorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Error> + Send + 'static,
    {
        self.node
            .interceptors
            .add_error(error_callback(callback), options);
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.node.config)
            .field("extends", &self.node.parent.is_some())
            .field("interceptors", &self.node.interceptors)
            .finish()
    }
}

/// Builder for a [`Client`] instance (root or extension).
///
/// Header parse failures are deferred and surfaced by [`build()`]
/// (ClientBuilder::build), so configuration chains stay fluent.
#[must_use = "ClientBuilder does nothing until .build() is called"]
pub struct ClientBuilder {
    parent: Option<Arc<ClientNode>>,
    config: ClientConfig,
    /// Error captured during building (deferred to `build()`)
    error: Option<Error>,
}

impl ClientBuilder {
    fn new(parent: Option<Arc<ClientNode>>) -> Self {
        Self {
            parent,
            config: ClientConfig::default(),
            error: None,
        }
    }

    /// Set the diagnostic name (tracing and call contexts only)
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Set the request URL. Kept opaque: relative paths are passed through
    /// to the transport unchanged.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = Some(url.into());
        self
    }

    /// Set the HTTP method (GET when no instance in the chain sets one)
    pub fn method(mut self, method: Method) -> Self {
        self.config.method = Some(method);
        self
    }

    /// Add a header to this instance's header map.
    ///
    /// Note that headers resolve as one key: an instance (or override)
    /// that sets any header replaces an ancestor's whole map.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match (
            http::header::HeaderName::try_from(name),
            http::header::HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.config
                    .headers
                    .get_or_insert_with(HeaderMap::new)
                    .append(name, value);
            }
            (Err(e), _) => {
                self.error = Some(Error::InvalidHeaderName(e));
            }
            (_, Err(e)) => {
                self.error = Some(Error::InvalidHeaderValue(e));
            }
        }
        self
    }

    /// Set the per-request timeout forwarded to the transport
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set the transport this chain performs network calls with
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.config.transport = Some(transport);
        self
    }

    /// Set the params schema
    pub fn params_schema(mut self, schema: Arc<dyn Schema>) -> Self {
        self.config.params = Some(SchemaSource::Concrete(schema));
        self
    }

    /// Set the params schema lazily via a factory
    pub fn params_schema_with<F>(mut self, factory: F) -> Self
    where
        F: Fn(&SchemaCatalog) -> Arc<dyn Schema> + Send + Sync + 'static,
    {
        self.config.params = Some(SchemaSource::Factory(Arc::new(factory)));
        self
    }

    /// Set the body schema
    pub fn body_schema(mut self, schema: Arc<dyn Schema>) -> Self {
        self.config.body = Some(SchemaSource::Concrete(schema));
        self
    }

    /// Set the body schema lazily via a factory
    pub fn body_schema_with<F>(mut self, factory: F) -> Self
    where
        F: Fn(&SchemaCatalog) -> Arc<dyn Schema> + Send + Sync + 'static,
    {
        self.config.body = Some(SchemaSource::Factory(Arc::new(factory)));
        self
    }

    /// Set the response schema
    pub fn response_schema(mut self, schema: Arc<dyn Schema>) -> Self {
        self.config.response = Some(SchemaSource::Concrete(schema));
        self
    }

    /// Set the response schema lazily via a factory
    pub fn response_schema_with<F>(mut self, factory: F) -> Self
    where
        F: Fn(&SchemaCatalog) -> Arc<dyn Schema> + Send + Sync + 'static,
    {
        self.config.response = Some(SchemaSource::Factory(Arc::new(factory)));
        self
    }

    /// Set a custom response unwrap callback.
    ///
    /// When configured it fully determines the materialized value and the
    /// default content-type inspection is skipped.
    pub fn unwrap_with<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Error>> + Send + 'static,
    {
        self.config.unwrap = Some(Arc::new(move |response| Box::pin(callback(response))));
        self
    }

    /// Build the instance.
    ///
    /// # Errors
    /// Returns any deferred header parse error.
    pub fn build(self) -> Result<Client, Error> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(Client {
            node: Arc::new(ClientNode {
                config: self.config,
                parent: self.parent,
                interceptors: Registry::default(),
            }),
        })
    }
}
