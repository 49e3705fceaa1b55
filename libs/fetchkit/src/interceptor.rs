use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::ClientNode;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// Which half of a call a failure was routed from: steps up to and
/// including the request pipeline carry `Request`, everything from the
/// transport call onwards carries `Response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Request,
    Response,
}

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
struct ContextInner {
    name: Option<String>,
    id: u64,
}

/// Diagnostic context shared by every interceptor invocation of one call.
#[derive(Debug, Clone)]
pub struct CallContext {
    inner: Arc<ContextInner>,
}

impl CallContext {
    pub(crate) fn new(name: Option<String>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                name,
                id: NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed) + 1,
            }),
        }
    }

    /// Diagnostic name of the resolved instance, if one was configured
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Process-unique id of this call
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

/// Context handed to error interceptors alongside the error itself.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// The last successfully built request, when one exists
    pub request: Option<Request>,
    /// Which half of the call failed
    pub stage: Stage,
    /// The call's shared diagnostic context
    pub call: CallContext,
}

/// Request-event callback: receives the current request and produces the
/// next one.
pub type RequestCallback =
    Arc<dyn Fn(Request, CallContext) -> BoxFuture<'static, Result<Request, Error>> + Send + Sync>;

/// Response-event callback: receives the current response plus the final
/// request and produces the next response.
pub type ResponseCallback = Arc<
    dyn Fn(Response, Request, CallContext) -> BoxFuture<'static, Result<Response, Error>>
        + Send
        + Sync,
>;

/// Error-event callback: may transform or annotate the error but never
/// suppress it — whatever it returns becomes the next pipeline input and,
/// ultimately, the call's terminal error.
pub type ErrorCallback =
    Arc<dyn Fn(Error, ErrorContext) -> BoxFuture<'static, Error> + Send + Sync>;

/// Options accepted at interceptor registration.
#[derive(Debug, Clone, Default)]
pub struct InterceptorOptions {
    /// When set, the interceptor is dropped from its list once the token
    /// signals cancellation. Only pipelines snapshotted afterwards are
    /// affected; in-flight calls keep their snapshot.
    pub cancel: Option<CancellationToken>,
}

impl InterceptorOptions {
    /// Options carrying a cancellation token
    #[must_use]
    pub fn cancel_on(token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
        }
    }
}

struct Entry<C> {
    callback: C,
    cancel: Option<CancellationToken>,
}

fn purge<C>(list: &mut Vec<Entry<C>>) {
    list.retain(|entry| {
        !entry
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    });
}

/// Per-instance ordered interceptor lists, one per event.
///
/// Lists are the only mutable state an instance carries. Mutation is safe
/// concurrently with in-flight calls because every call takes a
/// [`PipelineSnapshot`] synchronously before its first suspension point.
#[derive(Default)]
pub(crate) struct Registry {
    request: Mutex<Vec<Entry<RequestCallback>>>,
    response: Mutex<Vec<Entry<ResponseCallback>>>,
    error: Mutex<Vec<Entry<ErrorCallback>>>,
}

impl Registry {
    pub(crate) fn add_request(&self, callback: RequestCallback, options: InterceptorOptions) {
        let mut list = self.request.lock();
        purge(&mut list);
        list.push(Entry {
            callback,
            cancel: options.cancel,
        });
    }

    pub(crate) fn add_response(&self, callback: ResponseCallback, options: InterceptorOptions) {
        let mut list = self.response.lock();
        purge(&mut list);
        list.push(Entry {
            callback,
            cancel: options.cancel,
        });
    }

    pub(crate) fn add_error(&self, callback: ErrorCallback, options: InterceptorOptions) {
        let mut list = self.error.lock();
        purge(&mut list);
        list.push(Entry {
            callback,
            cancel: options.cancel,
        });
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("request", &self.request.lock().len())
            .field("response", &self.response.lock().len())
            .field("error", &self.error.lock().len())
            .finish()
    }
}

/// Immutable per-call view of every pipeline.
///
/// Captured synchronously when a call begins: interceptors added or
/// cancelled afterwards do not affect a call already in flight. Ordering is
/// extension-chain root first, then registration order within each
/// instance.
pub(crate) struct PipelineSnapshot {
    request: Vec<RequestCallback>,
    response: Vec<ResponseCallback>,
    error: Vec<ErrorCallback>,
}

impl PipelineSnapshot {
    pub(crate) fn capture(node: &Arc<ClientNode>) -> Self {
        let mut chain = Vec::new();
        let mut cursor = Some(Arc::clone(node));
        while let Some(current) = cursor {
            cursor = current.parent.clone();
            chain.push(current);
        }

        let mut snapshot = Self {
            request: Vec::new(),
            response: Vec::new(),
            error: Vec::new(),
        };
        for instance in chain.iter().rev() {
            let registry = &instance.interceptors;
            {
                let mut list = registry.request.lock();
                purge(&mut list);
                snapshot
                    .request
                    .extend(list.iter().map(|entry| Arc::clone(&entry.callback)));
            }
            {
                let mut list = registry.response.lock();
                purge(&mut list);
                snapshot
                    .response
                    .extend(list.iter().map(|entry| Arc::clone(&entry.callback)));
            }
            {
                let mut list = registry.error.lock();
                purge(&mut list);
                snapshot
                    .error
                    .extend(list.iter().map(|entry| Arc::clone(&entry.callback)));
            }
        }
        snapshot
    }

    /// Sequential left-to-right fold of the request pipeline. `latest`
    /// tracks the most recent successful output for error context.
    pub(crate) async fn run_request(
        &self,
        mut request: Request,
        ctx: &CallContext,
        latest: &mut Option<Request>,
    ) -> Result<Request, Error> {
        for callback in &self.request {
            request = callback(request, ctx.clone()).await?;
            *latest = Some(request.clone());
        }
        Ok(request)
    }

    /// Sequential left-to-right fold of the response pipeline.
    pub(crate) async fn run_response(
        &self,
        mut response: Response,
        final_request: &Request,
        ctx: &CallContext,
    ) -> Result<Response, Error> {
        for callback in &self.response {
            response = callback(response, final_request.clone(), ctx.clone()).await?;
        }
        Ok(response)
    }

    /// Sequential fold of the error pipeline; the final value is the call's
    /// terminal error.
    pub(crate) async fn run_error(&self, mut error: Error, context: ErrorContext) -> Error {
        for callback in &self.error {
            error = callback(error, context.clone()).await;
        }
        error
    }
}

pub(crate) fn request_callback<F, Fut>(callback: F) -> RequestCallback
where
    F: Fn(Request, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Request, Error>> + Send + 'static,
{
    Arc::new(move |request, ctx| Box::pin(callback(request, ctx)))
}

pub(crate) fn response_callback<F, Fut>(callback: F) -> ResponseCallback
where
    F: Fn(Response, Request, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    Arc::new(move |response, request, ctx| Box::pin(callback(response, request, ctx)))
}

pub(crate) fn error_callback<F, Fut>(callback: F) -> ErrorCallback
where
    F: Fn(Error, ErrorContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Error> + Send + 'static,
{
    Arc::new(move |error, context| Box::pin(callback(error, context)))
}
