//! Completion and error hooks.
//!
//! Both hooks are observational by contract. The completion handler runs
//! exactly once per dispatch and cannot change what was sent; the error
//! handler may rewrite the failure response before it is returned. A hook
//! that errors or panics is logged and otherwise ignored.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use conduit_core::{DispatchError, Request, Response};

use crate::handler::HandlerResult;

/// Runs after the synchronous path settles, whatever the outcome.
#[async_trait]
pub trait CompletionHandler: Send + Sync + 'static {
    /// `response` is `None` only when the acknowledgment could not be built.
    async fn handle(&self, request: &Request, response: Option<&Response>) -> HandlerResult;
}

/// Shared completion handler.
pub type BoxedCompletionHandler = Arc<dyn CompletionHandler>;

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompletionHandler;

#[async_trait]
impl CompletionHandler for NoopCompletionHandler {
    async fn handle(&self, _request: &Request, _response: Option<&Response>) -> HandlerResult {
        Ok(())
    }
}

/// Completion handler backed by a synchronous closure.
pub struct FnCompletionHandler<F>(F);

#[async_trait]
impl<F> CompletionHandler for FnCompletionHandler<F>
where
    F: Fn(&Request, Option<&Response>) + Send + Sync + 'static,
{
    async fn handle(&self, request: &Request, response: Option<&Response>) -> HandlerResult {
        (self.0)(request, response);
        Ok(())
    }
}

/// Wraps a closure as a completion handler.
pub fn completion_fn<F>(f: F) -> FnCompletionHandler<F>
where
    F: Fn(&Request, Option<&Response>) + Send + Sync + 'static,
{
    FnCompletionHandler(f)
}

/// Sees every classified failure of the synchronous path.
///
/// Receives the failure response the dispatcher would send and returns the
/// one to send instead.
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        error: &DispatchError,
        request: &Request,
        response: Response,
    ) -> HandlerResult<Response>;
}

pub type BoxedErrorHandler = Arc<dyn ErrorHandler>;

/// Logs the error and keeps the response.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorHandler;

#[async_trait]
impl ErrorHandler for LoggingErrorHandler {
    async fn handle(
        &self,
        error: &DispatchError,
        request: &Request,
        response: Response,
    ) -> HandlerResult<Response> {
        let request_id = request.context().request_id();
        match error {
            DispatchError::Unhandled | DispatchError::Validation { .. } => {
                warn!(request_id, kind = error.kind(), error = %error, "Request not processed");
            }
            _ => {
                error!(request_id, kind = error.kind(), error = %error, "Request failed");
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_completion_fn_sees_response() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let hook = completion_fn(move |_req, resp| {
            if resp.is_some_and(|r| r.status == 200) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        hook.handle(&Request::new(""), Some(&Response::ok())).await.unwrap();
        hook.handle(&Request::new(""), None).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logging_error_handler_keeps_response() {
        let resp = LoggingErrorHandler
            .handle(&DispatchError::Unhandled, &Request::new(""), Response::unhandled())
            .await
            .unwrap();
        assert_eq!(resp.status, 404);
    }
}
