//! Per-request context.
//!
//! [`Context`] is the mutable bag attached to exactly one [`Request`](crate::Request).
//! The dispatcher seeds it (request id, logger span, client) before the first
//! middleware runs; middleware and matchers extend it. It is owned by the
//! request and never shared across requests, so no locking is involved.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::Span;

use super::body::Body;
use super::extract;
use crate::client::BoxedClient;

/// Reserved key under which matchers store capture groups.
pub const MATCHES_KEY: &str = "matches";

/// The context object carried by each request.
///
/// Well-known fields have typed accessors; anything else lives in a string
/// keyed value map or a type keyed extension map.
///
/// # Example
///
/// ```rust,ignore
/// ctx.set("deploy_target", "prod");
/// ctx.insert_extension(MyTenant { id: 7 });
///
/// let user = ctx.user_id().unwrap_or("unknown");
/// let tenant = ctx.extension::<MyTenant>();
/// ```
pub struct Context {
    request_id: String,
    logger: Span,
    client: Option<BoxedClient>,
    token: Option<String>,
    enterprise_id: Option<String>,
    team_id: Option<String>,
    user_id: Option<String>,
    channel_id: Option<String>,
    response_url: Option<String>,
    is_enterprise_install: bool,
    values: Map<String, Value>,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates an empty, unseeded context.
    pub fn new() -> Self {
        Self {
            request_id: String::new(),
            logger: Span::none(),
            client: None,
            token: None,
            enterprise_id: None,
            team_id: None,
            user_id: None,
            channel_id: None,
            response_url: None,
            is_enterprise_install: false,
            values: Map::new(),
            extensions: HashMap::new(),
        }
    }

    /// Fills the routing identifiers from a decoded body.
    ///
    /// Fields already set are left untouched.
    pub fn derive_from_body(&mut self, body: &Body) {
        self.is_enterprise_install |= extract::is_enterprise_install(body);
        if self.enterprise_id.is_none() {
            self.enterprise_id = extract::enterprise_id(body);
        }
        if self.team_id.is_none() {
            self.team_id = extract::team_id(body);
        }
        if self.user_id.is_none() {
            self.user_id = extract::user_id(body);
        }
        if self.channel_id.is_none() {
            self.channel_id = extract::channel_id(body);
        }
        if self.response_url.is_none() {
            self.response_url = extract::response_url(body);
        }
    }

    // ─── Seeded fields ────────────────────────────────────────────────────────

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn set_request_id(&mut self, id: impl Into<String>) {
        self.request_id = id.into();
    }

    /// The span every log line for this request is recorded under.
    pub fn logger(&self) -> &Span {
        &self.logger
    }

    pub fn set_logger(&mut self, span: Span) {
        self.logger = span;
    }

    pub fn client(&self) -> Option<&BoxedClient> {
        self.client.as_ref()
    }

    pub fn set_client(&mut self, client: BoxedClient) {
        self.client = Some(client);
    }

    /// Bot token, falling back to the client's token.
    pub fn token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .or_else(|| self.client.as_ref().and_then(|c| c.token()))
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    // ─── Derived fields ───────────────────────────────────────────────────────

    pub fn enterprise_id(&self) -> Option<&str> {
        self.enterprise_id.as_deref()
    }

    pub fn team_id(&self) -> Option<&str> {
        self.team_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn response_url(&self) -> Option<&str> {
        self.response_url.as_deref()
    }

    pub fn is_enterprise_install(&self) -> bool {
        self.is_enterprise_install
    }

    // ─── Match artifacts ──────────────────────────────────────────────────────

    /// Capture groups written by the matcher that selected the listener.
    pub fn matches(&self) -> Vec<String> {
        match self.values.get(MATCHES_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn set_matches(&mut self, matches: Vec<String>) {
        self.values.insert(
            MATCHES_KEY.to_owned(),
            Value::Array(matches.into_iter().map(Value::String).collect()),
        );
    }

    // ─── Free-form values ─────────────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Stores a JSON value under `key`, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    // ─── Typed extensions ─────────────────────────────────────────────────────

    /// Stores a typed value. Only one value per type; later calls overwrite.
    pub fn insert_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn extension<T: 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn extension_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Removes and returns a typed value.
    pub fn take_extension<T: 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("has_client", &self.client.is_some())
            .field("team_id", &self.team_id)
            .field("user_id", &self.user_id)
            .field("channel_id", &self.channel_id)
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}
