//! # Conduit Framework
//!
//! The machinery that moves a [`Request`](conduit_core::Request) from arrival
//! to acknowledgment, and its lazy work beyond it.
//!
//! This layer provides:
//! - [`Middleware`] chains with short-circuiting, plus the built-in
//!   SSL check, signature verification and URL verification steps
//! - [`Matcher`]s and [`Listener`]s kept in a first-match-wins
//!   [`ListenerRegistry`]
//! - The [`Dispatcher`], which owns the acknowledgment contract and
//!   classifies every failure into a response
//! - [`LazyRunner`]s that execute deferred work on a task, a thread or a
//!   remote target
//!
//! The dispatcher also implements `tower::Service<Request>`, so transports
//! can wrap it with tower layers.

pub mod ack;
pub mod builtin;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod hooks;
pub mod lazy;
pub mod listener;
pub mod matcher;
pub mod middleware;
pub mod registry;

pub use ack::Ack;
pub use builtin::{RequestVerification, SslCheck, UrlVerification, constant_time_eq};
pub use dispatcher::{DispatchOutcome, Dispatched, Dispatcher, DispatcherBuilder};
pub use error::{InvokeError, InvokeResult};
pub use handler::{
    BoxFuture, BoxedHandler, ErasedHandler, HandlerArgs, HandlerResult, LazyFunction, into_handler,
};
pub use hooks::{
    BoxedCompletionHandler, BoxedErrorHandler, CompletionHandler, ErrorHandler,
    FnCompletionHandler, LoggingErrorHandler, NoopCompletionHandler, completion_fn,
};
pub use lazy::{
    BoxedLazyRunner, LazyJob, LazyRunner, QueueInvoker, RemoteInvoker, RemoteLazyRunner,
    TaskLazyRunner, ThreadLazyRunner, consume_queue,
};
pub use listener::Listener;
pub use matcher::{CheckFn, MatchOutcome, Matcher};
pub use middleware::{
    BoxedMiddleware, Endpoint, FnMiddleware, Middleware, Next, middleware_fn, named_middleware_fn,
};
pub use registry::ListenerRegistry;
