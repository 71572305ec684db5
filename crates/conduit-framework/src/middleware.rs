//! Middleware chain.
//!
//! A [`Middleware`] sees the request, the in-progress response and a [`Next`]
//! handle. Calling [`Next::run`] forwards to the rest of the chain; returning
//! without calling it short-circuits. Links run strictly in registration
//! order and an error from any link aborts the whole chain.
//!
//! ```text
//! mw[0] ──▶ mw[1] ──▶ ... ──▶ mw[n-1] ──▶ endpoint
//!   ◀──────── responses flow back up ◀────────
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use conduit_framework::middleware::middleware_fn;
//!
//! let audit = middleware_fn(|req, resp, next| Box::pin(async move {
//!     req.context_mut().set("audited", true);
//!     next.run(req, resp).await
//! }));
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use conduit_core::{Request, Response};

use crate::handler::{BoxFuture, HandlerResult};

/// An interceptor in a middleware chain.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Processes the request, forwarding to `next` or short-circuiting.
    async fn process(
        &self,
        req: &mut Request,
        resp: Response,
        next: Next<'_>,
    ) -> HandlerResult<Response>;

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A shared middleware trait object.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// What a chain terminates into once every link has forwarded.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, req: &mut Request, resp: Response) -> HandlerResult<Response>;
}

/// Handle to the remainder of a middleware chain.
pub struct Next<'a> {
    chain: &'a [BoxedMiddleware],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    /// Creates a handle that runs `chain` and then `endpoint`.
    pub fn new(chain: &'a [BoxedMiddleware], endpoint: &'a dyn Endpoint) -> Self {
        Self { chain, endpoint }
    }

    /// Runs the next link, or the endpoint when the chain is exhausted.
    pub fn run<'r>(self, req: &'r mut Request, resp: Response) -> BoxFuture<'r, HandlerResult<Response>>
    where
        'a: 'r,
    {
        Box::pin(async move {
            match self.chain.split_first() {
                Some((head, rest)) => {
                    trace!(middleware = head.name(), "Running middleware");
                    head.process(req, resp, Next::new(rest, self.endpoint)).await
                }
                None => self.endpoint.call(req, resp).await,
            }
        })
    }

    /// Number of links still ahead.
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}

// ============================================================================
// Closure middleware
// ============================================================================

/// A middleware built from a closure; see [`middleware_fn`].
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Request, Response, Next<'a>) -> BoxFuture<'a, HandlerResult<Response>>
        + Send
        + Sync
        + 'static,
{
    async fn process(
        &self,
        req: &mut Request,
        resp: Response,
        next: Next<'_>,
    ) -> HandlerResult<Response> {
        (self.f)(req, resp, next).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wraps a closure as a middleware.
pub fn middleware_fn<F>(f: F) -> BoxedMiddleware
where
    F: for<'a> Fn(&'a mut Request, Response, Next<'a>) -> BoxFuture<'a, HandlerResult<Response>>
        + Send
        + Sync
        + 'static,
{
    named_middleware_fn("fn_middleware", f)
}

/// Wraps a closure as a middleware with a name for logs.
pub fn named_middleware_fn<F>(name: impl Into<String>, f: F) -> BoxedMiddleware
where
    F: for<'a> Fn(&'a mut Request, Response, Next<'a>) -> BoxFuture<'a, HandlerResult<Response>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnMiddleware {
        name: name.into(),
        f,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder(Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl Endpoint for Recorder {
        async fn call(&self, _req: &mut Request, _resp: Response) -> HandlerResult<Response> {
            self.0.lock().push("endpoint");
            Ok(Response::text(200, "done"))
        }
    }

    fn tagging(log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> BoxedMiddleware {
        named_middleware_fn(tag, move |req, resp, next| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push(tag);
                next.run(req, resp).await
            })
        })
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![tagging(log.clone(), "a"), tagging(log.clone(), "b")];
        let endpoint = Recorder(log.clone());

        let mut req = Request::new("{}");
        let resp = Next::new(&chain, &endpoint)
            .run(&mut req, Response::pending())
            .await
            .unwrap();

        assert_eq!(resp.body, "done");
        assert_eq!(*log.lock(), ["a", "b", "endpoint"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stop = middleware_fn(|_req, _resp, _next| {
            Box::pin(async move { Ok(Response::text(200, "stopped")) })
        });
        let chain = vec![stop, tagging(log.clone(), "never")];
        let endpoint = Recorder(log.clone());

        let mut req = Request::new("{}");
        let resp = Next::new(&chain, &endpoint)
            .run(&mut req, Response::pending())
            .await
            .unwrap();

        assert_eq!(resp.body, "stopped");
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_error_aborts_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing = middleware_fn(|_req, _resp, _next| Box::pin(async move { Err("boom".into()) }));
        let chain = vec![failing, tagging(log.clone(), "never")];
        let endpoint = Recorder(log.clone());

        let mut req = Request::new("{}");
        let result = Next::new(&chain, &endpoint)
            .run(&mut req, Response::pending())
            .await;

        assert!(result.is_err());
        assert!(log.lock().is_empty());
    }
}
