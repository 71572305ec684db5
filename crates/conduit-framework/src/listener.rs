//! Listeners: matchers, per-listener middleware, handler and lazy functions.
//!
//! A [`Listener`] is assembled once at startup and is immutable afterwards.
//! Its matchers are ANDed: every one must accept the request. When several
//! produce captures, the last non-empty list wins.
//!
//! # Example
//!
//! ```rust,ignore
//! use conduit_framework::{Listener, Matcher};
//!
//! let listener = Listener::new("deploy", Matcher::command("/deploy"))
//!     .handler(|args| Box::pin(async move {
//!         args.ack.ack_text("deploying...");
//!         Ok(())
//!     }))
//!     .lazy("run_deploy", |req| async move {
//!         run_deploy(req.body()).await
//!     });
//! ```

use std::future::Future;
use std::sync::Arc;

use tracing::trace;

use conduit_core::{Request, Response};

use crate::handler::{BoxFuture, BoxedHandler, HandlerArgs, HandlerResult, LazyFunction, into_handler};
use crate::matcher::{MatchOutcome, Matcher};
use crate::middleware::BoxedMiddleware;

#[derive(Clone)]
struct ListenerInner {
    name: String,
    matchers: Vec<Matcher>,
    middleware: Vec<BoxedMiddleware>,
    handler: Option<BoxedHandler>,
    lazy: Vec<Arc<LazyFunction>>,
    auto_ack: bool,
}

/// A registered listener.
///
/// Cheap to clone; builder calls copy-on-write the shared inner data.
#[derive(Clone)]
pub struct Listener {
    inner: Arc<ListenerInner>,
}

impl Listener {
    /// Creates a listener with one matcher.
    pub fn new(name: impl Into<String>, matcher: Matcher) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                name: name.into(),
                matchers: vec![matcher],
                middleware: Vec::new(),
                handler: None,
                lazy: Vec::new(),
                auto_ack: true,
            }),
        }
    }

    fn inner_mut(&mut self) -> &mut ListenerInner {
        Arc::make_mut(&mut self.inner)
    }

    /// Adds another matcher; all matchers must accept the request.
    pub fn matcher(mut self, matcher: Matcher) -> Self {
        self.inner_mut().matchers.push(matcher);
        self
    }

    /// Appends a middleware that runs after matching, before the handler.
    pub fn middleware(mut self, middleware: BoxedMiddleware) -> Self {
        self.inner_mut().middleware.push(middleware);
        self
    }

    /// Sets the primary handler.
    pub fn handler<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(HandlerArgs<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.inner_mut().handler = Some(into_handler(f));
        self
    }

    /// Sets a pre-built boxed handler.
    pub fn handler_boxed(mut self, handler: BoxedHandler) -> Self {
        self.inner_mut().handler = Some(handler);
        self
    }

    /// Declares a lazy function, run after the acknowledgment.
    pub fn lazy<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.lazy_function(LazyFunction::new(name, f))
    }

    pub fn lazy_function(mut self, function: LazyFunction) -> Self {
        self.inner_mut().lazy.push(Arc::new(function));
        self
    }

    /// Whether a handler that returns `Ok` without acking is acked with `200`.
    ///
    /// Defaults to `true`.
    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.inner_mut().auto_ack = auto_ack;
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.inner.matchers
    }

    pub fn middleware_chain(&self) -> &[BoxedMiddleware] {
        &self.inner.middleware
    }

    pub fn primary_handler(&self) -> Option<&BoxedHandler> {
        self.inner.handler.as_ref()
    }

    pub fn lazy_functions(&self) -> &[Arc<LazyFunction>] {
        &self.inner.lazy
    }

    pub fn is_auto_ack(&self) -> bool {
        self.inner.auto_ack
    }

    /// Evaluates every matcher, stopping at the first that rejects.
    pub fn evaluate(&self, req: &Request, resp: &Response) -> MatchOutcome {
        let mut captures = None;
        for matcher in &self.inner.matchers {
            match matcher.evaluate(req, resp) {
                MatchOutcome::NoMatch => {
                    trace!(listener = %self.inner.name, matcher = ?matcher, "Matcher rejected request");
                    return MatchOutcome::NoMatch;
                }
                MatchOutcome::Matched { captures: Some(c) } if !c.is_empty() => {
                    captures = Some(c);
                }
                MatchOutcome::Matched { .. } => {}
            }
        }
        MatchOutcome::Matched { captures }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.inner.name)
            .field("matchers", &self.inner.matchers)
            .field("middleware_count", &self.inner.middleware.len())
            .field("has_handler", &self.inner.handler.is_some())
            .field("lazy", &self.inner.lazy)
            .field("auto_ack", &self.inner.auto_ack)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mention(text: &str) -> Request {
        Request::from_json(json!({
            "type": "event_callback",
            "event": {"type": "app_mention", "text": text}
        }))
    }

    #[test]
    fn test_matchers_are_anded() {
        let listener = Listener::new("l", Matcher::event_type("app_mention"))
            .matcher(Matcher::regex_text("^deploy").unwrap());
        let resp = Response::pending();

        assert!(listener.evaluate(&mention("deploy now"), &resp).is_match());
        assert!(!listener.evaluate(&mention("hello"), &resp).is_match());
    }

    #[test]
    fn test_captures_carried_through() {
        let listener = Listener::new("l", Matcher::regex_text(r"deploy (\w+)").unwrap())
            .matcher(Matcher::event_type("app_mention"));
        let outcome = listener.evaluate(&mention("deploy web"), &Response::pending());
        assert_eq!(
            outcome,
            MatchOutcome::Matched {
                captures: Some(vec!["web".into()])
            }
        );
    }

    #[test]
    fn test_builder_is_copy_on_write() {
        let base = Listener::new("l", Matcher::command("/a"));
        let extended = base.clone().auto_ack(false).lazy("later", |_req| async { Ok(()) });

        assert!(base.is_auto_ack());
        assert!(base.lazy_functions().is_empty());
        assert!(!extended.is_auto_ack());
        assert_eq!(extended.lazy_functions()[0].name(), "later");
    }
}
