//! The inbound request envelope.

use std::sync::OnceLock;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::body::{Body, decode_body};
use super::context::Context;
use super::headers::{Headers, QueryParams};

/// Marker header set on requests rebuilt for deferred execution.
pub const LAZY_ONLY_HEADER: &str = "x-conduit-lazy-only";

/// Marker header naming the lazy function a deferred request must run.
pub const LAZY_FUNCTION_HEADER: &str = "x-conduit-lazy-function-name";

/// Marker header naming the listener that declared that function.
pub const LAZY_LISTENER_HEADER: &str = "x-conduit-lazy-listener-name";

/// Prefix shared by every lazy marker header.
pub const LAZY_MARKER_PREFIX: &str = "x-conduit-lazy-";

/// Whether `name` is one of the lazy marker headers.
///
/// Transports drop these from inbound traffic; only deferred payloads carry them.
pub fn is_lazy_marker(name: &str) -> bool {
    name.get(..LAZY_MARKER_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(LAZY_MARKER_PREFIX))
}

/// How the event reached the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Webhook delivered over HTTP.
    #[default]
    Http,
    /// Envelope pushed over a persistent socket connection.
    Socket,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Socket => "socket",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound event.
///
/// The raw body is kept verbatim; [`body`](Self::body) decodes it on first
/// access and returns the same tree afterwards.
///
/// # Example
///
/// ```rust,ignore
/// let req = Request::new(r#"{"type":"event_callback"}"#)
///     .with_headers(Headers::new().with("Content-Type", "application/json"))
///     .with_mode(Mode::Http);
///
/// assert_eq!(req.body()["type"], "event_callback");
/// ```
pub struct Request {
    raw_body: Bytes,
    body: OnceLock<Body>,
    headers: Headers,
    query: QueryParams,
    context: Context,
    mode: Mode,
    lazy_only: bool,
    lazy_listener_name: Option<String>,
    lazy_function_name: Option<String>,
}

impl Request {
    /// Creates a request from its raw body.
    pub fn new(raw_body: impl Into<Bytes>) -> Self {
        Self {
            raw_body: raw_body.into(),
            body: OnceLock::new(),
            headers: Headers::new(),
            query: QueryParams::new(),
            context: Context::new(),
            mode: Mode::Http,
            lazy_only: false,
            lazy_listener_name: None,
            lazy_function_name: None,
        }
    }

    /// Creates a socket-mode request from an already decoded payload.
    pub fn from_json(payload: Value) -> Self {
        let raw = serde_json::to_vec(&payload).unwrap_or_default();
        let req = Self::new(raw).with_mode(Mode::Socket);
        if let Value::Object(map) = payload {
            let _ = req.body.set(map);
        }
        req
    }

    /// Replaces the headers.
    ///
    /// Lazy marker headers are kept as plain headers; they never make the
    /// request lazy-only.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        // content-type may have changed
        if self.mode == Mode::Http {
            self.body = OnceLock::new();
        }
        self
    }

    pub fn with_query(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Tags the request for deferred execution of one lazy function.
    pub(crate) fn mark_lazy_only(&mut self, listener: Option<String>, function: String) {
        self.lazy_only = true;
        self.lazy_listener_name = listener;
        self.lazy_function_name = Some(function);
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    /// The decoded body; decoded on first access, memoized afterwards.
    ///
    /// Malformed bodies decode to an empty tree.
    pub fn body(&self) -> &Body {
        self.body
            .get_or_init(|| decode_body(&self.raw_body, self.content_type()))
    }

    /// Media type of the body, without parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .first("content-type")
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether this request was rebuilt for deferred execution.
    pub fn is_lazy_only(&self) -> bool {
        self.lazy_only
    }

    /// The lazy function a deferred request targets.
    pub fn lazy_function_name(&self) -> Option<&str> {
        self.lazy_function_name.as_deref()
    }

    /// The listener that declared [`lazy_function_name`](Self::lazy_function_name).
    pub fn lazy_listener_name(&self) -> Option<&str> {
        self.lazy_listener_name.as_deref()
    }

    /// The top-level `type` of the body, if any.
    pub fn payload_type(&self) -> Option<&str> {
        self.body().get("type").and_then(Value::as_str)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("mode", &self.mode)
            .field("raw_body_len", &self.raw_body.len())
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("lazy_only", &self.lazy_only)
            .field("lazy_listener_name", &self.lazy_listener_name)
            .field("lazy_function_name", &self.lazy_function_name)
            .field("context", &self.context)
            .finish()
    }
}
