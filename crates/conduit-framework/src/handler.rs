//! Handler signatures for listeners and lazy functions.
//!
//! Handlers receive one explicit argument struct rather than having their
//! parameters resolved by name: a primary handler gets [`HandlerArgs`]
//! (request, context through the request, and the [`Ack`] handle); a lazy
//! function gets the rebuilt [`Request`] it owns outright.
//!
//! # Example
//!
//! ```rust,ignore
//! use conduit_framework::{HandlerArgs, Listener, Matcher};
//!
//! let listener = Listener::new("mention", Matcher::event_type("app_mention"))
//!     .handler(|args: HandlerArgs<'_>| Box::pin(async move {
//!         let user = args.context().user_id().unwrap_or("someone").to_owned();
//!         args.ack.ack_text(format!("hi <@{user}>"));
//!         Ok(())
//!     }));
//! ```

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use conduit_core::{BoxError, Context, Request};

use crate::ack::Ack;

/// A type alias for a boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a handler, middleware or hook.
pub type HandlerResult<T = ()> = Result<T, BoxError>;

/// Renders a caught panic payload for logs and error chains.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_owned(),
            Err(_) => "non-string panic payload".to_owned(),
        },
    }
}

// ============================================================================
// Primary handlers
// ============================================================================

/// Arguments handed to a listener's primary handler.
pub struct HandlerArgs<'a> {
    /// The request being handled; its context carries derived identifiers
    /// and match captures.
    pub request: &'a mut Request,
    /// Acknowledgment handle for this request.
    pub ack: Ack,
}

impl<'a> HandlerArgs<'a> {
    pub fn context(&self) -> &Context {
        self.request.context()
    }

    pub fn context_mut(&mut self) -> &mut Context {
        self.request.context_mut()
    }

    /// Capture groups written by the matcher.
    pub fn matches(&self) -> Vec<String> {
        self.request.context().matches()
    }
}

/// Type-erased primary handler trait for dynamic dispatch.
pub trait ErasedHandler: Send + Sync {
    /// Execute the handler with the given arguments.
    fn call<'a>(&'a self, args: HandlerArgs<'a>) -> BoxFuture<'a, HandlerResult>;
}

impl<F> ErasedHandler for F
where
    F: for<'a> Fn(HandlerArgs<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    fn call<'a>(&'a self, args: HandlerArgs<'a>) -> BoxFuture<'a, HandlerResult> {
        (self)(args)
    }
}

/// A type-erased handler that can be stored in collections.
pub type BoxedHandler = Arc<dyn ErasedHandler>;

/// Converts a handler closure into a boxed handler.
pub fn into_handler<F>(f: F) -> BoxedHandler
where
    F: for<'a> Fn(HandlerArgs<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(f)
}

// ============================================================================
// Lazy functions
// ============================================================================

/// Type-erased lazy function.
///
/// Lazy functions own their request: it is rebuilt from a snapshot and lives
/// on a different task, thread or process than the original.
pub trait ErasedLazy: Send + Sync {
    fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> ErasedLazy for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(request))
    }
}

/// A named deferred function attached to a listener.
pub struct LazyFunction {
    name: String,
    func: Box<dyn ErasedLazy>,
}

impl LazyFunction {
    /// Creates a lazy function from an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the function on the current task.
    pub fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        self.func.call(request)
    }
}

impl std::fmt::Debug for LazyFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
