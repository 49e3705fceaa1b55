use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::Client;
use crate::config::{ClientConfig, Override, ResolvedConfig};
use crate::error::{Error, Field};
use crate::interceptor::{CallContext, ErrorContext, PipelineSnapshot, Stage};
use crate::request::{Request, append_query, query_pairs};
use crate::response::{check_status, unwrap_body};
use crate::schema::SchemaCatalog;

/// Per-call configuration and the entry points that drive a call.
///
/// Created by [`Client::call`]. Params/body serialization failures and
/// header parse failures are deferred and surfaced when the call runs, so
/// chains stay fluent:
///
/// ```ignore
/// let value = client
///     .call()
///     .params(&json!({"id": "42"}))
///     .send()
///     .await?;
/// ```
#[must_use = "CallBuilder does nothing until .send() or .settle() is awaited"]
pub struct CallBuilder {
    client: Client,
    params: Option<Value>,
    body: Option<Value>,
    headers: Option<HeaderMap>,
    timeout: Option<Duration>,
    override_: Option<Override>,
    /// Error captured during building (deferred to the entry points)
    error: Option<Error>,
}

impl CallBuilder {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            params: None,
            body: None,
            headers: None,
            timeout: None,
            override_: None,
            error: None,
        }
    }

    fn defer(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Supply the params input validated by the params schema
    pub fn params<T: Serialize>(mut self, params: &T) -> Self {
        match serde_json::to_value(params) {
            Ok(value) => self.params = Some(value),
            Err(e) => self.defer(Error::Json(e)),
        }
        self
    }

    /// Supply the body input validated by the body schema
    pub fn body<T: Serialize>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => self.body = Some(value),
            Err(e) => self.defer(Error::Json(e)),
        }
        self
    }

    /// Add a call-level header.
    ///
    /// Headers merge as one key: supplying any call-level header replaces
    /// the headers resolved from the chain. Fixed construction-time keys
    /// like url and method require an override to change.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match (
            http::header::HeaderName::try_from(name),
            http::header::HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers
                    .get_or_insert_with(HeaderMap::new)
                    .append(name, value);
            }
            (Err(e), _) => self.defer(Error::InvalidHeaderName(e)),
            (_, Err(e)) => self.defer(Error::InvalidHeaderValue(e)),
        }
        self
    }

    /// Set a call-level timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Apply an override fragment; its set keys outrank both the resolved
    /// config and the call-level keys
    pub fn override_config(mut self, patch: ClientConfig) -> Self {
        self.override_ = Some(Override::Patch(patch));
        self
    }

    /// Compute the override fragment from the resolved instance config
    pub fn override_config_with<F>(mut self, build: F) -> Self
    where
        F: Fn(&ResolvedConfig) -> ClientConfig + Send + Sync + 'static,
    {
        self.override_ = Some(Override::With(Arc::new(build)));
        self
    }

    /// Run the call, resolving with the validated value or failing with the
    /// terminal error produced by the error pipeline.
    ///
    /// # Errors
    /// Any failure along the call's stages, after the error pipeline ran.
    pub async fn send(self) -> Result<Value, Error> {
        let CallBuilder {
            client,
            params,
            body,
            headers,
            timeout,
            override_,
            error,
        } = self;
        if let Some(error) = error {
            return Err(error);
        }
        let input = CallInput {
            params,
            body,
            headers,
            timeout,
            override_,
        };
        execute(&client, input).await
    }

    /// Run the call and deserialize the terminal value.
    ///
    /// # Errors
    /// Same as [`send`](Self::send), plus a JSON error when the terminal
    /// value does not deserialize as `T`.
    pub async fn send_as<T: DeserializeOwned>(self) -> Result<T, Error> {
        let value = self.send().await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Run the call without failing: the settled outcome carries the value
    /// in the first slot or the terminal error in the second, never both.
    pub async fn settle(self) -> (Option<Value>, Option<Error>) {
        match self.send().await {
            Ok(value) => (Some(value), None),
            Err(error) => (None, Some(error)),
        }
    }
}

struct CallInput {
    params: Option<Value>,
    body: Option<Value>,
    headers: Option<HeaderMap>,
    timeout: Option<Duration>,
    override_: Option<Override>,
}

/// Drive one call through its stages.
///
/// Pipelines and configuration are snapshotted synchronously before the
/// first suspension point, so concurrent interceptor registration or
/// cancellation cannot affect this call.
async fn execute(client: &Client, input: CallInput) -> Result<Value, Error> {
    let pipelines = PipelineSnapshot::capture(&client.node);
    let resolved = client.resolved_config();
    let ctx = CallContext::new(resolved.name.clone());
    debug!(
        id = ctx.id(),
        name = ctx.name().unwrap_or(""),
        "call started"
    );

    let mut latest: Option<Request> = None;
    let mut stage = Stage::Request;
    match run(resolved, input, &pipelines, &ctx, &mut latest, &mut stage).await {
        Ok(value) => {
            debug!(id = ctx.id(), "call succeeded");
            Ok(value)
        }
        Err(error) => {
            warn!(id = ctx.id(), error = %error, ?stage, "call failed");
            let context = ErrorContext {
                request: latest,
                stage,
                call: ctx.clone(),
            };
            Err(pipelines.run_error(error, context).await)
        }
    }
}

async fn run(
    resolved: ResolvedConfig,
    input: CallInput,
    pipelines: &PipelineSnapshot,
    ctx: &CallContext,
    latest: &mut Option<Request>,
    stage: &mut Stage,
) -> Result<Value, Error> {
    let catalog = SchemaCatalog;

    // Merge precedence, lowest to highest: resolved < call < override.
    // An override function sees the resolved instance config, before the
    // call-level keys are merged in.
    let mut config = resolved;
    let patch = input
        .override_
        .as_ref()
        .map(|override_| override_.resolve_patch(&config));
    if let Some(headers) = input.headers {
        config.headers = headers;
    }
    if let Some(timeout) = input.timeout {
        config.timeout = Some(timeout);
    }
    if let Some(patch) = patch {
        config.apply(&patch, &catalog);
    }

    // Params and body validation are independent; run them concurrently.
    // Params validation composes with the query-representability
    // constraint; body validation performs no serialization of any kind.
    let params_schema = Arc::clone(&config.params);
    let body_schema = Arc::clone(&config.body);
    let params_input = input.params.unwrap_or(Value::Null);
    let body_input = input.body.unwrap_or(Value::Null);
    let params_task = async {
        let parsed = params_schema
            .parse(params_input)
            .await
            .map_err(|source| Error::Validation {
                field: Field::Params,
                source,
            })?;
        query_pairs(&parsed)
    };
    let body_task = async {
        let parsed = body_schema
            .parse(body_input)
            .await
            .map_err(|source| Error::Validation {
                field: Field::Body,
                source,
            })?;
        Ok::<_, Error>(if parsed.is_null() { None } else { Some(parsed) })
    };
    let (pairs, body) = tokio::try_join!(params_task, body_task)?;

    // Build the request value.
    let url = config.url.clone().ok_or_else(|| Error::InvalidUrl {
        url: String::new(),
        reason: "no url configured".to_owned(),
    })?;
    let request = Request {
        method: config.method.clone(),
        url: append_query(&url, &pairs),
        headers: config.headers.clone(),
        body,
        timeout: config.timeout,
    };
    *latest = Some(request.clone());
    debug!(
        id = ctx.id(),
        method = %request.method,
        url = %request.url,
        "request built"
    );

    // Request pipeline; its output is the final request.
    let request = pipelines.run_request(request, ctx, latest).await?;

    // Everything from the transport call onwards fails with response stage.
    *stage = Stage::Response;
    let transport = config.transport.clone().ok_or(Error::NoTransport)?;
    let response = transport
        .call(request.clone())
        .await
        .map_err(Error::coerce)?;
    debug!(id = ctx.id(), status = %response.status, "response received");

    let response = check_status(response)?;
    let response = pipelines.run_response(response, &request, ctx).await?;

    let value = if let Some(custom) = &config.unwrap {
        custom(response).await?
    } else {
        unwrap_body(&response)?
    };

    config
        .response
        .parse(value)
        .await
        .map_err(|source| Error::Validation {
            field: Field::Response,
            source,
        })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::response::Response;
    use crate::schema::TypedSchema;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Transport stub that replays scripted outcomes and records every
    /// request it is handed.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<Response, String>>>,
        seen: Mutex<Vec<Request>>,
    }

    impl ScriptedTransport {
        fn reply_json(status: u16, body: &Value) -> Arc<Self> {
            let transport = Self::default();
            transport.push_json(status, body);
            Arc::new(transport)
        }

        fn push_json(&self, status: u16, body: &Value) {
            let mut headers = HeaderMap::new();
            headers.insert(
                http::header::CONTENT_TYPE,
                "application/json".parse().unwrap(),
            );
            self.replies.lock().push_back(Ok(Response::new(
                StatusCode::from_u16(status).unwrap(),
                headers,
                Bytes::from(serde_json::to_vec(body).unwrap()),
            )));
        }

        fn last_request(&self) -> Request {
            self.seen.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn call(&self, request: Request) -> Result<Response, BoxError> {
            self.seen.lock().push(request);
            match self.replies.lock().pop_front() {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(message.into()),
                None => Err("no scripted reply".into()),
            }
        }
    }

    fn client_with(transport: Arc<ScriptedTransport>) -> Client {
        Client::builder()
            .url("/echo")
            .transport(transport)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn send_resolves_with_the_unwrapped_value() {
        let transport = ScriptedTransport::reply_json(200, &json!({"ok": true}));
        let client = client_with(Arc::clone(&transport));

        let value = client.call().send().await.unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(transport.last_request().method, Method::GET);
        assert_eq!(transport.last_request().url, "/echo");
    }

    #[tokio::test]
    async fn validated_params_land_in_the_query_string() {
        let transport = ScriptedTransport::reply_json(200, &json!(null));
        let client = Client::builder()
            .url("/things")
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .params_schema(Arc::new(TypedSchema::<std::collections::BTreeMap<String, String>>::new()))
            .build()
            .unwrap();

        client
            .call()
            .params(&json!({"id": "42"}))
            .send()
            .await
            .unwrap();
        assert_eq!(transport.last_request().url, "/things?id=42");
    }

    #[tokio::test]
    async fn response_validation_failures_surface_in_both_modes() {
        let transport = ScriptedTransport::reply_json(200, &json!("oops"));
        transport.push_json(200, &json!("oops"));
        let client = Client::builder()
            .url("/number")
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .response_schema(Arc::new(TypedSchema::<i64>::new()))
            .build()
            .unwrap();

        let err = client.call().send().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation {
                field: Field::Response,
                ..
            }
        ));

        let (value, err) = client.call().settle().await;
        assert!(value.is_none());
        assert!(matches!(
            err,
            Some(Error::Validation {
                field: Field::Response,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn params_validation_aborts_before_the_transport_runs() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = Client::builder()
            .url("/things")
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .params_schema(Arc::new(TypedSchema::<
                std::collections::BTreeMap<String, String>,
            >::new()))
            .build()
            .unwrap();

        let err = client.call().params(&json!("not-a-map")).send().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation {
                field: Field::Params,
                ..
            }
        ));
        assert!(transport.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn unrepresentable_params_fail_with_a_serialization_error() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client_with(Arc::clone(&transport));

        let err = client
            .call()
            .params(&json!({"filter": {"nested": true}}))
            .send()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ParamSerialization { .. }));
        assert!(transport.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn non_success_statuses_become_status_errors() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.replies.lock().push_back(Ok(Response::new(
            StatusCode::NOT_FOUND,
            HeaderMap::new(),
            Bytes::from_static(b"missing"),
        )));
        let client = client_with(Arc::clone(&transport));

        let err = client.call().send().await.unwrap_err();
        match err {
            Error::Status {
                status,
                status_text,
                body,
            } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(status_text, "Not Found");
                assert_eq!(body, "missing");
            }
            other => panic!("expected Status, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failures_are_coerced() {
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .replies
            .lock()
            .push_back(Err("connection refused".to_owned()));
        let client = client_with(Arc::clone(&transport));

        let err = client.call().send().await.unwrap_err();
        match err {
            Error::Transport(source) => {
                assert!(source.to_string().contains("connection refused"));
            }
            other => panic!("expected Transport, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn settle_matches_send_on_success() {
        let transport = ScriptedTransport::reply_json(200, &json!({"n": 1}));
        transport.push_json(200, &json!({"n": 1}));
        let client = client_with(transport);

        let sent = client.call().send().await.unwrap();
        let (value, error) = client.call().settle().await;
        assert_eq!(value.unwrap(), sent);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn send_as_deserializes_the_terminal_value() {
        #[derive(serde::Deserialize)]
        struct Reply {
            n: i64,
        }

        let transport = ScriptedTransport::reply_json(200, &json!({"n": 7}));
        let client = client_with(transport);
        let reply: Reply = client.call().send_as().await.unwrap();
        assert_eq!(reply.n, 7);
    }

    #[tokio::test]
    async fn missing_transport_is_reported() {
        let client = Client::builder().url("/nowhere").build().unwrap();
        let err = client.call().send().await.unwrap_err();
        assert!(matches!(err, Error::NoTransport));
    }

    #[tokio::test]
    async fn missing_url_is_reported() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = Client::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .build()
            .unwrap();
        let err = client.call().send().await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn overrides_outrank_call_and_resolved_keys() {
        let transport = ScriptedTransport::reply_json(200, &json!(null));
        let client = client_with(Arc::clone(&transport));

        client
            .call()
            .override_config(ClientConfig {
                url: Some("/elsewhere".to_owned()),
                method: Some(Method::DELETE),
                ..ClientConfig::default()
            })
            .send()
            .await
            .unwrap();

        let seen = transport.last_request();
        assert_eq!(seen.url, "/elsewhere");
        assert_eq!(seen.method, Method::DELETE);
    }

    #[tokio::test]
    async fn override_functions_see_the_resolved_config() {
        let transport = ScriptedTransport::reply_json(200, &json!(null));
        let client = client_with(Arc::clone(&transport));

        client
            .call()
            .override_config_with(|resolved| ClientConfig {
                url: resolved.url.as_ref().map(|url| format!("{url}/nested")),
                ..ClientConfig::default()
            })
            .send()
            .await
            .unwrap();

        assert_eq!(transport.last_request().url, "/echo/nested");
    }

    #[tokio::test]
    async fn custom_unwrap_determines_the_value() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.replies.lock().push_back(Ok(Response::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"\x01\x02\x03"),
        )));
        let client = Client::builder()
            .url("/raw")
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .unwrap_with(|response| async move { Ok(json!(response.body.len())) })
            .build()
            .unwrap();

        let value = client.call().send().await.unwrap();
        assert_eq!(value, json!(3));
    }

    #[tokio::test]
    async fn error_interceptors_shape_the_terminal_error() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.replies.lock().push_back(Ok(Response::new(
            StatusCode::BAD_GATEWAY,
            HeaderMap::new(),
            Bytes::new(),
        )));
        let client = client_with(Arc::clone(&transport));
        client.on_error(|error, context| async move {
            assert_eq!(context.stage, Stage::Response);
            assert!(context.request.is_some());
            Error::other(format!("annotated: {error}"))
        });

        let err = client.call().send().await.unwrap_err();
        assert_eq!(err.to_string(), "annotated: HTTP 502 Bad Gateway: Bad Gateway");
    }

    #[tokio::test]
    async fn request_stage_failures_carry_the_request_stage() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client_with(Arc::clone(&transport));
        client.on_request(|_request, _ctx| async move {
            Err(Error::other("interceptor balked"))
        });
        client.on_error(|error, context| async move {
            assert_eq!(context.stage, Stage::Request);
            // the built request is still known
            assert_eq!(context.request.as_ref().unwrap().url, "/echo");
            error
        });

        let err = client.call().send().await.unwrap_err();
        assert_eq!(err.to_string(), "interceptor balked");
        assert!(transport.seen.lock().is_empty());
    }
}
