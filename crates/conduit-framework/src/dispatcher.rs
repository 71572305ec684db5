//! The request dispatcher.
//!
//! [`Dispatcher`] drives one request through its state machine:
//!
//! ```text
//! RECEIVED ─▶ MIDDLEWARE_RUNNING ─┬─▶ LISTENER_MATCHED ─▶ HANDLER_RUNNING ─▶ ACKNOWLEDGED
//!                                 ├─▶ UNHANDLED ─────────────────────────────▶ ACKNOWLEDGED
//!                                 └─▶ (short-circuit) ───────────────────────▶ ACKNOWLEDGED
//!                                                       ACKNOWLEDGED ─▶ LAZY_SCHEDULED ─▶ COMPLETED
//! ```
//!
//! 1. The context is seeded (request id, logger span, client, derived ids)
//! 2. Global middleware runs in registration order; built-ins come first
//! 3. The first listener whose matchers accept the request owns it
//! 4. Its middleware runs, then its handler produces the acknowledgment
//! 5. Lazy functions are snapshotted and handed to the lazy runner
//! 6. The completion handler runs exactly once
//!
//! Every failure in steps 2 to 4 becomes a response. Only an
//! [`AckBuildError`] escapes [`Dispatcher::dispatch`].
//!
//! # Example
//!
//! ```rust,ignore
//! use conduit_framework::{Dispatcher, Listener, Matcher};
//!
//! let dispatcher = Dispatcher::builder()
//!     .signing_secret(std::env::var("SIGNING_SECRET")?)
//!     .listener(
//!         Listener::new("mention", Matcher::event_type("app_mention"))
//!             .handler(|args| Box::pin(async move {
//!                 args.ack.ack();
//!                 Ok(())
//!             })),
//!     )
//!     .build();
//!
//! let response = dispatcher.dispatch(request).await?;
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::Poll;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tower::Service;
use tracing::{Instrument, debug, error, info_span, warn};

use conduit_core::{
    AckBuildError, BoxError, BoxedClient, DeferredInvocation, DeferredPayload, DeferredResult,
    DispatchError, Request, Response, ValidationError,
};

use crate::ack::Ack;
use crate::builtin::{RequestVerification, SslCheck, UrlVerification};
use crate::handler::{BoxFuture, HandlerArgs, HandlerResult, panic_message};
use crate::hooks::{
    BoxedCompletionHandler, BoxedErrorHandler, CompletionHandler, ErrorHandler,
    LoggingErrorHandler, NoopCompletionHandler,
};
use crate::lazy::{BoxedLazyRunner, LazyJob, LazyRunner, TaskLazyRunner};
use crate::listener::Listener;
use crate::matcher::MatchOutcome;
use crate::middleware::{BoxedMiddleware, Endpoint, Next};
use crate::registry::ListenerRegistry;

// ============================================================================
// Outcome
// ============================================================================

/// Which path a dispatch took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A global middleware answered without forwarding.
    ShortCircuited,
    /// A listener handled the request.
    Handled {
        listener: String,
        lazy_scheduled: usize,
    },
    /// Processing failed; the response is the failure shape.
    Failed {
        /// [`DispatchError::kind`] of the classified failure.
        kind: &'static str,
        /// The listener that owned the request, if one was matched.
        listener: Option<String>,
        lazy_scheduled: usize,
    },
    /// No listener matched.
    Unhandled,
    /// A deferred request ran its lazy function inline.
    LazyOnly { function: String, succeeded: bool },
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortCircuited => "short_circuited",
            Self::Handled { .. } => "handled",
            Self::Failed { .. } => "failed",
            Self::Unhandled => "unhandled",
            Self::LazyOnly { .. } => "lazy_only",
        }
    }

    pub fn listener(&self) -> Option<&str> {
        match self {
            Self::Handled { listener, .. } => Some(listener),
            Self::Failed { listener, .. } => listener.as_deref(),
            _ => None,
        }
    }

    /// Number of lazy jobs handed to the runner.
    pub fn lazy_scheduled(&self) -> usize {
        match self {
            Self::Handled { lazy_scheduled, .. } | Self::Failed { lazy_scheduled, .. } => {
                *lazy_scheduled
            }
            _ => 0,
        }
    }
}

/// A response together with the path that produced it.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub response: Response,
    pub outcome: DispatchOutcome,
}

// ============================================================================
// Dispatcher
// ============================================================================

struct DispatcherInner {
    registry: ListenerRegistry,
    middleware: Vec<BoxedMiddleware>,
    lazy_runner: BoxedLazyRunner,
    completion: BoxedCompletionHandler,
    error_handler: BoxedErrorHandler,
    client: Option<BoxedClient>,
    token: Option<String>,
    raise_error_for_unhandled_request: bool,
}

/// Routes requests to listeners. Cheap to clone and safe to share.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    pub fn lazy_runner(&self) -> &BoxedLazyRunner {
        &self.inner.lazy_runner
    }

    /// Number of global middleware, built-ins included.
    pub fn middleware_count(&self) -> usize {
        self.inner.middleware.len()
    }

    /// Waits for lazy work that is still in flight.
    pub async fn shutdown(&self) {
        self.inner.lazy_runner.shutdown().await;
    }

    /// Dispatches one request and returns its acknowledgment.
    pub async fn dispatch(&self, request: Request) -> Result<Response, AckBuildError> {
        self.dispatch_detailed(request).await.map(|d| d.response)
    }

    /// Dispatches one request and reports which path it took.
    pub async fn dispatch_detailed(&self, mut request: Request) -> Result<Dispatched, AckBuildError> {
        self.seed(&mut request);
        let span = request.context().logger().clone();

        async move {
            let started = Instant::now();
            let result = if request.is_lazy_only() {
                Ok(self.run_lazy_only(&request).await)
            } else {
                self.run_pipeline(&mut request).await
            };

            self.complete(&request, result.as_ref().ok().map(|d| &d.response))
                .await;

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(d) => debug!(
                    status = d.response.status,
                    outcome = d.outcome.as_str(),
                    elapsed_ms,
                    "Responding"
                ),
                Err(e) => error!(error = %e, elapsed_ms, "Failed to build acknowledgment"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Decodes a deferred payload and runs the lazy function it names.
    ///
    /// Callers must authenticate the payload first; lazy-only requests skip
    /// the middleware chain, request verification included.
    pub async fn dispatch_payload(&self, payload: DeferredPayload) -> DeferredResult<Response> {
        let invocation = DeferredInvocation::from_payload(payload)?;
        let response = match self.dispatch(invocation.into_request()).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Deferred request failed to acknowledge");
                Response::failure()
            }
        };
        Ok(response)
    }

    /// Same as [`Dispatcher::dispatch_payload`], from the JSON wire form.
    pub async fn dispatch_deferred(&self, bytes: &[u8]) -> DeferredResult<Response> {
        let payload: DeferredPayload = serde_json::from_slice(bytes)?;
        self.dispatch_payload(payload).await
    }

    fn seed(&self, request: &mut Request) {
        let body = request.body().clone();
        let mode = request.mode();
        let context = request.context_mut();
        if context.request_id().is_empty() {
            context.set_request_id(uuid::Uuid::new_v4().to_string());
        }
        let span = info_span!("dispatch", request_id = %context.request_id(), mode = %mode);
        context.set_logger(span);
        if context.client().is_none()
            && let Some(client) = &self.inner.client
        {
            context.set_client(Arc::clone(client));
        }
        if let Some(token) = &self.inner.token {
            context.set_token(token.clone());
        }
        context.derive_from_body(&body);
    }

    async fn run_pipeline(&self, request: &mut Request) -> Result<Dispatched, AckBuildError> {
        let endpoint = ListenerEndpoint {
            dispatcher: &self.inner,
            state: Mutex::new(RouteState::default()),
        };
        let chain = AssertUnwindSafe(
            Next::new(&self.inner.middleware, &endpoint).run(request, Response::pending()),
        )
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(format!("middleware panicked: {}", panic_message(panic)).into()));
        let state = endpoint.state.into_inner();

        if let Some(e) = state.build_error {
            return Err(e);
        }

        let lazy_scheduled = state.lazy.len();
        let listener = match &state.reached {
            Reached::Listener { name, .. } => Some(name.clone()),
            _ => None,
        };

        let dispatched = match chain {
            Ok(response) => {
                let outcome = match state.reached {
                    Reached::Nothing => DispatchOutcome::ShortCircuited,
                    Reached::Unhandled => DispatchOutcome::Unhandled,
                    Reached::Listener { name, failed: false } => DispatchOutcome::Handled {
                        listener: name,
                        lazy_scheduled,
                    },
                    Reached::Listener { name, failed: true } => DispatchOutcome::Failed {
                        kind: "listener",
                        listener: Some(name),
                        lazy_scheduled,
                    },
                };
                let response = if outcome == DispatchOutcome::Unhandled {
                    self.unhandled(request, response).await
                } else {
                    response
                };
                Dispatched { response, outcome }
            }
            Err(e) => {
                let error = classify(e);
                let fallback = match error {
                    DispatchError::Validation { .. } => Response::invalid_request(),
                    _ => Response::failure(),
                };
                let response = handle_error(&self.inner, &error, request, fallback).await;
                Dispatched {
                    response,
                    outcome: DispatchOutcome::Failed {
                        kind: error.kind(),
                        listener,
                        lazy_scheduled,
                    },
                }
            }
        };

        for job in state.lazy {
            debug!(function = job.name(), runner = self.inner.lazy_runner.name(), "Starting lazy function");
            self.inner.lazy_runner.start(job);
        }
        Ok(dispatched)
    }

    async fn unhandled(&self, request: &Request, response: Response) -> Response {
        let body = request.body();
        let field = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or("-").to_owned();
        warn!(
            payload_type = %field(body.get("type")),
            event_type = %field(body.get("event").and_then(|e| e.get("type"))),
            command = %field(body.get("command")),
            callback_id = %field(body.get("callback_id")),
            "Unhandled request"
        );
        if self.inner.raise_error_for_unhandled_request {
            handle_error(&self.inner, &DispatchError::Unhandled, request, response).await
        } else {
            response
        }
    }

    async fn run_lazy_only(&self, request: &Request) -> Dispatched {
        let name = request.lazy_function_name().unwrap_or_default().to_owned();
        let listener = request.lazy_listener_name();
        let Some(function) = self.inner.registry.lazy_function(listener, &name) else {
            error!(listener = listener.unwrap_or("-"), function = %name, "No lazy function registered under this name");
            return Dispatched {
                response: Response::unhandled(),
                outcome: DispatchOutcome::Unhandled,
            };
        };

        debug!(function = %name, "Running lazy function inline");
        // the seeded context supplies the client and token
        let job = LazyJob::for_request(Arc::clone(function), listener.unwrap_or_default(), request);
        let succeeded = self.inner.lazy_runner.run(job).await;
        Dispatched {
            response: Response::ok(),
            outcome: DispatchOutcome::LazyOnly {
                function: name,
                succeeded,
            },
        }
    }

    async fn complete(&self, request: &Request, response: Option<&Response>) {
        let outcome = AssertUnwindSafe(self.inner.completion.handle(request, response))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Completion handler failed"),
            Err(panic) => error!(panic = %panic_message(panic), "Completion handler panicked"),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.inner.registry)
            .field(
                "middleware",
                &self.inner.middleware.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("lazy_runner", &self.inner.lazy_runner.name())
            .finish_non_exhaustive()
    }
}

/// Maps an error that left the middleware chain onto the taxonomy.
fn classify(error: BoxError) -> DispatchError {
    match error.downcast::<ValidationError>() {
        Ok(v) => DispatchError::Validation { reason: v.0 },
        Err(error) => match error.downcast::<DispatchError>() {
            Ok(classified) => *classified,
            Err(error) => DispatchError::Middleware(error),
        },
    }
}

/// Runs the error handler, keeping `response` if the handler itself fails.
async fn handle_error(
    inner: &DispatcherInner,
    error: &DispatchError,
    request: &Request,
    response: Response,
) -> Response {
    let handled = AssertUnwindSafe(inner.error_handler.handle(error, request, response.clone()))
        .catch_unwind()
        .await;
    match handled {
        Ok(Ok(rewritten)) => rewritten,
        Ok(Err(e)) => {
            error!(error = %e, "Error handler failed");
            response
        }
        Err(panic) => {
            error!(panic = %panic_message(panic), "Error handler panicked");
            response
        }
    }
}

// ============================================================================
// Routing endpoints
// ============================================================================

#[derive(Default)]
enum Reached {
    /// A global middleware answered first.
    #[default]
    Nothing,
    Unhandled,
    Listener { name: String, failed: bool },
}

#[derive(Default)]
struct RouteState {
    reached: Reached,
    build_error: Option<AckBuildError>,
    lazy: Vec<LazyJob>,
}

/// Terminates the global chain: matches a listener and runs its chain.
struct ListenerEndpoint<'d> {
    dispatcher: &'d DispatcherInner,
    state: Mutex<RouteState>,
}

#[async_trait]
impl Endpoint for ListenerEndpoint<'_> {
    async fn call(&self, req: &mut Request, resp: Response) -> HandlerResult<Response> {
        let Some((listener, outcome)) = self.dispatcher.registry.find(req, &resp) else {
            self.state.lock().reached = Reached::Unhandled;
            return Ok(Response::unhandled());
        };
        let listener = listener.clone();
        if let MatchOutcome::Matched { captures: Some(captures) } = outcome {
            req.context_mut().set_matches(captures);
        }
        debug!(listener = listener.name(), "Listener matched");
        self.state.lock().reached = Reached::Listener {
            name: listener.name().to_owned(),
            failed: false,
        };

        let endpoint = HandlerEndpoint {
            listener: &listener,
            dispatcher: self.dispatcher,
            state: &self.state,
        };
        let chain = AssertUnwindSafe(Next::new(listener.middleware_chain(), &endpoint).run(req, resp))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(format!("listener middleware panicked: {}", panic_message(panic)).into())
            });

        chain.map_err(|e| {
            if e.is::<ValidationError>() || e.is::<DispatchError>() {
                return e;
            }
            if let Reached::Listener { failed, .. } = &mut self.state.lock().reached {
                *failed = true;
            }
            Box::new(DispatchError::Listener {
                listener: listener.name().to_owned(),
                source: e,
            }) as BoxError
        })
    }
}

/// Terminates a listener's chain: runs the handler and settles the ack.
struct HandlerEndpoint<'l> {
    listener: &'l Listener,
    dispatcher: &'l DispatcherInner,
    state: &'l Mutex<RouteState>,
}

#[async_trait]
impl Endpoint for HandlerEndpoint<'_> {
    async fn call(&self, req: &mut Request, resp: Response) -> HandlerResult<Response> {
        let name = self.listener.name();
        let ack = Ack::new();
        let result = match self.listener.primary_handler() {
            Some(handler) => {
                let args = HandlerArgs {
                    request: &mut *req,
                    ack: ack.clone(),
                };
                AssertUnwindSafe(handler.call(args))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(format!("handler panicked: {}", panic_message(panic)).into())
                    })
            }
            None => Ok(()),
        };

        let build_error = ack.take_build_error().or_else(|| match &result {
            Err(e) if e.is::<AckBuildError>() => Some(AckBuildError::Invalid(e.to_string())),
            _ => None,
        });
        if let Some(e) = build_error {
            self.state.lock().build_error = Some(e);
            return Ok(resp);
        }

        let lazy: Vec<LazyJob> = self
            .listener
            .lazy_functions()
            .iter()
            .map(|f| LazyJob::for_request(Arc::clone(f), name, req))
            .collect();
        self.state.lock().lazy = lazy;

        match result {
            Ok(()) => Ok(match ack.response() {
                Some(acked) => acked,
                None if self.listener.is_auto_ack() => {
                    debug!(listener = name, "Handler returned without ack, acknowledging");
                    Response::ok()
                }
                None => {
                    warn!(listener = name, "Handler returned without ack and auto-ack is off");
                    Response::pending()
                }
            }),
            Err(source) => {
                if let Reached::Listener { failed, .. } = &mut self.state.lock().reached {
                    *failed = true;
                }
                let error = DispatchError::Listener {
                    listener: name.to_owned(),
                    source,
                };
                Ok(handle_error(self.dispatcher, &error, req, Response::failure()).await)
            }
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    registry: ListenerRegistry,
    middleware: Vec<BoxedMiddleware>,
    signing_secret: Option<String>,
    request_verification: bool,
    timestamp_tolerance_secs: u64,
    ssl_check: bool,
    verification_token: Option<String>,
    url_verification: bool,
    lazy_runner: Option<BoxedLazyRunner>,
    completion: Option<BoxedCompletionHandler>,
    error_handler: Option<BoxedErrorHandler>,
    client: Option<BoxedClient>,
    token: Option<String>,
    raise_error_for_unhandled_request: bool,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self {
            registry: ListenerRegistry::new(),
            middleware: Vec::new(),
            signing_secret: None,
            request_verification: true,
            timestamp_tolerance_secs: 300,
            ssl_check: true,
            verification_token: None,
            url_verification: true,
            lazy_runner: None,
            completion: None,
            error_handler: None,
            client: None,
            token: None,
            raise_error_for_unhandled_request: false,
        }
    }
}

impl DispatcherBuilder {
    /// Registers a listener after the ones already registered.
    pub fn listener(mut self, listener: Listener) -> Self {
        self.registry.register(listener);
        self
    }

    /// Replaces the registry wholesale.
    pub fn registry(mut self, registry: ListenerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Appends a global middleware; runs after the built-ins.
    pub fn middleware(mut self, middleware: BoxedMiddleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Secret used to verify request signatures.
    pub fn signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }

    /// Toggles signature verification; it also needs a signing secret.
    pub fn request_verification(mut self, enabled: bool) -> Self {
        self.request_verification = enabled;
        self
    }

    pub fn timestamp_tolerance_secs(mut self, secs: u64) -> Self {
        self.timestamp_tolerance_secs = secs;
        self
    }

    pub fn ssl_check(mut self, enabled: bool) -> Self {
        self.ssl_check = enabled;
        self
    }

    /// Legacy verification token compared during the SSL check step.
    pub fn verification_token(mut self, token: impl Into<String>) -> Self {
        self.verification_token = Some(token.into());
        self
    }

    pub fn url_verification(mut self, enabled: bool) -> Self {
        self.url_verification = enabled;
        self
    }

    /// Runner for lazy functions; defaults to [`TaskLazyRunner`].
    pub fn lazy_runner(self, runner: impl LazyRunner) -> Self {
        self.lazy_runner_arc(Arc::new(runner))
    }

    pub fn lazy_runner_arc(mut self, runner: BoxedLazyRunner) -> Self {
        self.lazy_runner = Some(runner);
        self
    }

    pub fn completion_handler(self, handler: impl CompletionHandler) -> Self {
        self.completion_handler_arc(Arc::new(handler))
    }

    pub fn completion_handler_arc(mut self, handler: BoxedCompletionHandler) -> Self {
        self.completion = Some(handler);
        self
    }

    pub fn error_handler(self, handler: impl ErrorHandler) -> Self {
        self.error_handler_arc(Arc::new(handler))
    }

    pub fn error_handler_arc(mut self, handler: BoxedErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Client handle placed into every request context.
    pub fn client(mut self, client: BoxedClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Routes unhandled requests through the error handler as well.
    pub fn raise_error_for_unhandled_request(mut self, enabled: bool) -> Self {
        self.raise_error_for_unhandled_request = enabled;
        self
    }

    pub fn build(self) -> Dispatcher {
        let mut middleware: Vec<BoxedMiddleware> = Vec::new();
        if self.ssl_check {
            let mut ssl_check = SslCheck::new();
            if let Some(token) = self.verification_token {
                ssl_check = ssl_check.verification_token(token);
            }
            middleware.push(Arc::new(ssl_check));
        }
        match (self.request_verification, self.signing_secret) {
            (true, Some(secret)) => middleware.push(Arc::new(
                RequestVerification::new(secret).tolerance_secs(self.timestamp_tolerance_secs),
            )),
            (true, None) => {
                warn!("No signing secret configured, request verification is disabled");
            }
            (false, _) => debug!("Request verification disabled"),
        }
        if self.url_verification {
            middleware.push(Arc::new(UrlVerification));
        }
        middleware.extend(self.middleware);

        Dispatcher {
            inner: Arc::new(DispatcherInner {
                registry: self.registry,
                middleware,
                lazy_runner: self
                    .lazy_runner
                    .unwrap_or_else(|| Arc::new(TaskLazyRunner::new())),
                completion: self
                    .completion
                    .unwrap_or_else(|| Arc::new(NoopCompletionHandler)),
                error_handler: self
                    .error_handler
                    .unwrap_or_else(|| Arc::new(LoggingErrorHandler)),
                client: self.client,
                token: self.token,
                raise_error_for_unhandled_request: self.raise_error_for_unhandled_request,
            }),
        }
    }
}

// ============================================================================
// Tower Service Implementation
// ============================================================================

/// Lets transports and users stack tower layers around the dispatcher.
impl Service<Request> for Dispatcher {
    type Response = Response;
    type Error = AckBuildError;
    type Future = BoxFuture<'static, Result<Response, AckBuildError>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { dispatcher.dispatch(request).await })
    }
}
