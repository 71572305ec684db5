//! Lazy (deferred) execution.
//!
//! Once a listener's synchronous path has produced its acknowledgment, the
//! dispatcher snapshots the request once per declared lazy function and
//! hands each [`LazyJob`] to a [`LazyRunner`]. Runners never block the
//! caller: [`LazyRunner::start`] returns as soon as the job is scheduled.
//!
//! | runner | where the function runs |
//! |---|---|
//! | [`TaskLazyRunner`] | a detached tokio task on the current runtime |
//! | [`ThreadLazyRunner`] | a bounded pool of OS threads, each with its own runtime |
//! | [`RemoteLazyRunner`] | another process, reached through a [`RemoteInvoker`] |
//!
//! The function always receives a request rebuilt from the snapshot. That
//! request is tagged lazy-only, so dispatching it again runs the function
//! directly and never schedules further lazy work. In-process runners also
//! hand over the originating context's client and token; those live handles
//! are never serialized, so a remote worker seeds its own.

mod remote;
mod task;
mod thread;

pub use remote::{QueueInvoker, RemoteInvoker, RemoteLazyRunner, consume_queue};
pub use task::TaskLazyRunner;
pub use thread::ThreadLazyRunner;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{Instrument, debug, error, info_span};

use conduit_core::{BoxedClient, DeferredInvocation, DispatchError, Request};

use crate::handler::{LazyFunction, panic_message};

/// One lazy function paired with the snapshot it runs against.
#[derive(Clone)]
pub struct LazyJob {
    pub function: Arc<LazyFunction>,
    pub invocation: DeferredInvocation,
    client: Option<BoxedClient>,
    token: Option<String>,
}

impl LazyJob {
    pub fn new(function: Arc<LazyFunction>, invocation: DeferredInvocation) -> Self {
        Self {
            function,
            invocation,
            client: None,
            token: None,
        }
    }

    /// Snapshots `request` for `function` of `listener`, keeping its
    /// context's client and token.
    pub fn for_request(function: Arc<LazyFunction>, listener: &str, request: &Request) -> Self {
        let invocation = DeferredInvocation::snapshot(request, listener, function.name());
        let context = request.context();
        Self {
            client: context.client().cloned(),
            token: context.token().map(str::to_owned),
            ..Self::new(function, invocation)
        }
    }

    /// Client placed into the rebuilt request's context.
    pub fn with_client(mut self, client: BoxedClient) -> Self {
        self.client = Some(client);
        self
    }

    /// Token placed into the rebuilt request's context.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn name(&self) -> &str {
        self.function.name()
    }

    pub fn client(&self) -> Option<&BoxedClient> {
        self.client.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Rebuilds the request and runs the function on the current task.
    pub async fn execute(self) -> Result<(), DispatchError> {
        let mut request = self.invocation.into_request();
        let context = request.context_mut();
        if let Some(client) = self.client {
            context.set_client(client);
        }
        if let Some(token) = self.token {
            context.set_token(token);
        }
        execute(&self.function, request).await
    }
}

impl std::fmt::Debug for LazyJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyJob")
            .field("function", &self.function.name())
            .field("invocation", &self.invocation)
            .field("has_client", &self.client.is_some())
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

/// Schedules lazy jobs away from the acknowledgment path.
#[async_trait]
pub trait LazyRunner: Send + Sync + 'static {
    /// Schedules `job` and returns immediately.
    fn start(&self, job: LazyJob);

    /// Runs `job` to completion on the caller's task.
    ///
    /// Failures are logged; returns whether the function succeeded.
    async fn run(&self, job: LazyJob) -> bool {
        run_logged(job).await
    }

    /// Waits for scheduled jobs that are still running.
    async fn shutdown(&self) {}

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Shared lazy runner.
pub type BoxedLazyRunner = Arc<dyn LazyRunner>;

/// Runs `function` against `request`, catching errors and panics.
pub async fn execute(function: &LazyFunction, mut request: Request) -> Result<(), DispatchError> {
    let name = function.name().to_owned();
    let span = info_span!(
        "lazy",
        function = %name,
        request_id = %request.context().request_id(),
    );
    let body = request.body().clone();
    let context = request.context_mut();
    context.derive_from_body(&body);
    context.set_logger(span.clone());

    let started = Instant::now();
    let outcome = AssertUnwindSafe(function.call(request))
        .catch_unwind()
        .instrument(span)
        .await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(())) => {
            debug!(function = %name, elapsed_ms, "Lazy function finished");
            Ok(())
        }
        Ok(Err(source)) => Err(DispatchError::LazyExecution {
            function: name,
            source,
        }),
        Err(panic) => Err(DispatchError::LazyExecution {
            function: name,
            source: format!("panicked: {}", panic_message(panic)).into(),
        }),
    }
}

/// Executes a job and logs its failure; lazy errors never travel further.
pub(crate) async fn run_logged(job: LazyJob) -> bool {
    let request_id = job.invocation.request_id.clone();
    match job.execute().await {
        Ok(()) => true,
        Err(e) => {
            error!(request_id = %request_id, kind = e.kind(), error = %e, "Failed to run lazy function");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{ApiResult, Client, Headers};
    use serde_json::Value;

    struct StubClient;

    #[async_trait]
    impl Client for StubClient {
        async fn call_api(&self, _method: &str, _params: Value) -> ApiResult<Value> {
            Ok(Value::Null)
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
            self
        }
    }

    fn job(function: LazyFunction) -> LazyJob {
        let original = Request::new(r#"{"team_id":"T1"}"#)
            .with_headers(Headers::new().with("content-type", "application/json"));
        let invocation = DeferredInvocation::snapshot(&original, "listener", function.name());
        LazyJob::new(Arc::new(function), invocation)
    }

    #[tokio::test]
    async fn test_rebuilt_request_is_lazy_only() {
        let f = LazyFunction::new("check", |req: Request| async move {
            assert!(req.is_lazy_only());
            assert_eq!(req.lazy_function_name(), Some("check"));
            assert_eq!(req.context().team_id(), Some("T1"));
            Ok(())
        });
        assert!(job(f).execute().await.is_ok());
    }

    #[tokio::test]
    async fn test_context_handles_carry_over() {
        let mut original = Request::new("{}");
        original.context_mut().set_request_id("req-9");
        original.context_mut().set_client(Arc::new(StubClient));
        original.context_mut().set_token("xoxb-test");

        let f = LazyFunction::new("uses_client", |req: Request| async move {
            assert!(req.context().client().is_some());
            assert_eq!(req.context().token(), Some("xoxb-test"));
            assert_eq!(req.context().request_id(), "req-9");
            Ok(())
        });
        let job = LazyJob::for_request(Arc::new(f), "listener", &original);
        assert!(job.client().is_some());
        assert!(job.execute().await.is_ok());
    }

    #[tokio::test]
    async fn test_error_is_classified() {
        let f = LazyFunction::new("fails", |_req: Request| async { Err("nope".into()) });
        let err = job(f).execute().await.unwrap_err();
        assert_eq!(err.kind(), "lazy_execution");
        assert!(err.to_string().contains("fails"));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let f = LazyFunction::new("panics", |req: Request| async move {
            if !req.is_lazy_only() || req.lazy_function_name() == Some("panics") {
                panic!("lazy boom");
            }
            Ok(())
        });
        let err = job(f).execute().await.unwrap_err();
        assert!(err.to_string().contains("lazy boom"));
    }
}
