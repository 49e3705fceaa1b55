use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method};

use crate::client::ClientNode;
use crate::response::UnwrapFn;
use crate::schema::{AnySchema, Schema, SchemaCatalog, SchemaSource};
use crate::transport::Transport;

/// Per-instance configuration: the keys explicitly set on one client node.
///
/// Every field is optional; unset keys fall back to the nearest ancestor
/// that defines them during resolution. The same type doubles as the
/// override fragment accepted at call time, where set keys outrank
/// everything else.
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// Diagnostic name; no runtime effect beyond tracing and contexts
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<Method>,
    pub headers: Option<HeaderMap>,
    /// Per-request timeout forwarded to the transport
    pub timeout: Option<Duration>,
    pub transport: Option<Arc<dyn Transport>>,
    pub params: Option<SchemaSource>,
    pub body: Option<SchemaSource>,
    pub response: Option<SchemaSource>,
    pub unwrap: Option<Arc<UnwrapFn>>,
}

impl ClientConfig {
    /// Fill keys absent on `self` from an ancestor's config. Keys already
    /// present are never overwritten, so the instance closest to the
    /// caller always wins.
    pub(crate) fn merge_under(&mut self, fallback: &ClientConfig) {
        if self.name.is_none() {
            self.name = fallback.name.clone();
        }
        if self.url.is_none() {
            self.url = fallback.url.clone();
        }
        if self.method.is_none() {
            self.method = fallback.method.clone();
        }
        if self.headers.is_none() {
            self.headers = fallback.headers.clone();
        }
        if self.timeout.is_none() {
            self.timeout = fallback.timeout;
        }
        if self.transport.is_none() {
            self.transport = fallback.transport.clone();
        }
        if self.params.is_none() {
            self.params = fallback.params.clone();
        }
        if self.body.is_none() {
            self.body = fallback.body.clone();
        }
        if self.response.is_none() {
            self.response = fallback.response.clone();
        }
        if self.unwrap.is_none() {
            self.unwrap = fallback.unwrap.clone();
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("transport", &self.transport.as_ref().map(|_| "<transport>"))
            .field("params", &self.params)
            .field("body", &self.body)
            .field("response", &self.response)
            .field("unwrap", &self.unwrap.as_ref().map(|_| "<unwrap>"))
            .finish()
    }
}

/// The flattened, schema-materialized configuration computed for one
/// instance per call. Not stored anywhere; discarded when the call ends.
#[derive(Clone)]
pub struct ResolvedConfig {
    pub name: Option<String>,
    pub url: Option<String>,
    /// Defaults to GET when no instance in the chain sets a method
    pub method: Method,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
    pub transport: Option<Arc<dyn Transport>>,
    pub params: Arc<dyn Schema>,
    pub body: Arc<dyn Schema>,
    pub response: Arc<dyn Schema>,
    pub unwrap: Option<Arc<UnwrapFn>>,
}

impl ResolvedConfig {
    /// Apply an override fragment on top of this config. Schema slots in
    /// the fragment are materialized through `catalog` on application.
    pub(crate) fn apply(&mut self, patch: &ClientConfig, catalog: &SchemaCatalog) {
        if let Some(name) = &patch.name {
            self.name = Some(name.clone());
        }
        if let Some(url) = &patch.url {
            self.url = Some(url.clone());
        }
        if let Some(method) = &patch.method {
            self.method = method.clone();
        }
        if let Some(headers) = &patch.headers {
            self.headers = headers.clone();
        }
        if let Some(timeout) = patch.timeout {
            self.timeout = Some(timeout);
        }
        if let Some(transport) = &patch.transport {
            self.transport = Some(Arc::clone(transport));
        }
        if let Some(params) = &patch.params {
            self.params = params.materialize(catalog);
        }
        if let Some(body) = &patch.body {
            self.body = body.materialize(catalog);
        }
        if let Some(response) = &patch.response {
            self.response = response.materialize(catalog);
        }
        if let Some(unwrap) = &patch.unwrap {
            self.unwrap = Some(Arc::clone(unwrap));
        }
    }
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("transport", &self.transport.as_ref().map(|_| "<transport>"))
            .field("unwrap", &self.unwrap.as_ref().map(|_| "<unwrap>"))
            .finish()
    }
}

/// Call-time override: a fragment, or a function of the resolved instance
/// config producing one. Its merged effect outranks both the resolved
/// config and the plain call config.
#[derive(Clone)]
pub enum Override {
    /// A ready fragment
    Patch(ClientConfig),
    /// Computed from the resolved instance config (before call-time keys
    /// are merged in)
    With(Arc<dyn Fn(&ResolvedConfig) -> ClientConfig + Send + Sync>),
}

impl Override {
    pub(crate) fn resolve_patch(&self, resolved: &ResolvedConfig) -> ClientConfig {
        match self {
            Override::Patch(patch) => patch.clone(),
            Override::With(build) => build(resolved),
        }
    }
}

impl fmt::Debug for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Override::Patch(patch) => f.debug_tuple("Override::Patch").field(patch).finish(),
            Override::With(_) => f.write_str("Override::With"),
        }
    }
}

/// Flatten an instance's extension chain into one configuration.
///
/// Starts from the instance's own keys and walks the `parent` links
/// outward, each ancestor filling only still-absent keys. Afterwards the
/// schema slots are materialized: unset slots become the accept-anything
/// schema, factories are invoked once with the catalog handle. This
/// operation has no failure path; a malformed factory result only fails
/// when the schema it produced is exercised.
pub(crate) fn resolve(node: &ClientNode) -> ResolvedConfig {
    let mut flat = node.config.clone();
    let mut cursor = node.parent.as_deref();
    while let Some(ancestor) = cursor {
        flat.merge_under(&ancestor.config);
        cursor = ancestor.parent.as_deref();
    }

    let catalog = SchemaCatalog;
    let any = |slot: Option<SchemaSource>| {
        slot.map_or_else(
            || Arc::new(AnySchema) as Arc<dyn Schema>,
            |source| source.materialize(&catalog),
        )
    };

    ResolvedConfig {
        name: flat.name,
        url: flat.url,
        method: flat.method.unwrap_or(Method::GET),
        headers: flat.headers.unwrap_or_default(),
        timeout: flat.timeout,
        transport: flat.transport,
        params: any(flat.params),
        body: any(flat.body),
        response: any(flat.response),
        unwrap: flat.unwrap,
    }
}
