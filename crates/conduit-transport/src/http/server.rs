//! Inbound HTTP transport.
//!
//! Serves two routes over one [`Dispatcher`]:
//!
//! - the events path, where the platform posts webhooks
//! - the optional deferred path, where a remote lazy runner posts
//!   serialized invocations back for execution
//!
//! Deferred invocations skip request verification, so the deferred path is
//! only mounted together with a bearer token and refuses anything else. The
//! events path drops lazy marker headers before dispatch.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header::AUTHORIZATION},
    response::{IntoResponse, Response as HttpResponse},
    routing::post,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use conduit_core::{Headers, QueryParams, Request, Response, is_lazy_marker};
use conduit_framework::{Dispatcher, constant_time_eq};

use crate::error::{TransportError, TransportResult};

/// Where and on which paths the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventServerConfig {
    /// Socket address to bind, e.g. `0.0.0.0:3000`.
    pub addr: String,
    /// Path receiving platform events.
    pub path: String,
    /// Path receiving deferred invocations, if any.
    pub lazy_path: Option<String>,
    /// Bearer token deferred invocations must present.
    pub lazy_token: Option<String>,
}

impl Default for EventServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:3000".into(),
            path: "/slack/events".into(),
            lazy_path: None,
            lazy_token: None,
        }
    }
}

impl EventServerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn lazy_path(mut self, path: impl Into<String>) -> Self {
        self.lazy_path = Some(path.into());
        self
    }

    pub fn lazy_token(mut self, token: impl Into<String>) -> Self {
        self.lazy_token = Some(token.into());
        self
    }
}

struct ServerState {
    dispatcher: Dispatcher,
    lazy_token: Option<String>,
}

fn normalize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Builds the axum router without binding, for embedding in a larger app.
///
/// The deferred route is left out when no lazy token is configured.
pub fn router(dispatcher: Dispatcher, config: &EventServerConfig) -> Router {
    let lazy_token = config.lazy_token.clone().filter(|t| !t.is_empty());
    let mut router = Router::new().route(&normalize(&config.path), post(events_handler));
    match (&config.lazy_path, &lazy_token) {
        (Some(lazy_path), Some(_)) => {
            router = router.route(&normalize(lazy_path), post(deferred_handler));
        }
        (Some(lazy_path), None) => {
            warn!(lazy_path = %lazy_path, "No lazy token configured, deferred route disabled");
        }
        (None, _) => {}
    }
    router.with_state(Arc::new(ServerState {
        dispatcher,
        lazy_token,
    }))
}

/// A running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address actually bound (useful with port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for the server task.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "HTTP server task ended abnormally");
        }
    }

    /// Resolves when the server stops on its own.
    pub async fn wait(&mut self) {
        let _ = (&mut self.task).await;
    }
}

/// Binds `config.addr` and serves until the handle is shut down.
pub async fn serve(dispatcher: Dispatcher, config: EventServerConfig) -> TransportResult<ServerHandle> {
    let router = router(dispatcher, &config);

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: config.addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr()?;

    info!(
        addr = %local_addr,
        path = %normalize(&config.path),
        lazy_path = config.lazy_path.as_deref().unwrap_or("-"),
        "HTTP server listening"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        match server.await {
            Ok(()) => info!("HTTP server shut down"),
            Err(e) => error!(error = %e, "HTTP server error"),
        }
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

// ============================================================================
// Handlers
// ============================================================================

fn to_request(uri: &Uri, headers: &HeaderMap, body: Bytes) -> Request {
    let mut converted = Headers::new();
    for (name, value) in headers {
        if is_lazy_marker(name.as_str()) {
            debug!(header = %name, "Dropping lazy marker header");
            continue;
        }
        match value.to_str() {
            Ok(v) => converted.append(name.as_str(), v),
            Err(_) => debug!(header = %name, "Dropping non-ASCII header value"),
        }
    }
    let query = uri.query().map(QueryParams::parse).unwrap_or_default();
    Request::new(body).with_headers(converted).with_query(query)
}

fn to_http(resp: Response) -> HttpResponse {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = (status, Body::from(resp.body)).into_response();
    let headers = out.headers_mut();
    for (name, values) in resp.headers.iter() {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!(header = %name, "Skipping invalid response header name");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => warn!(header = %name, "Skipping invalid response header value"),
            }
        }
    }
    out
}

/// Whether `headers` carry `Authorization: Bearer <expected>`.
fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| constant_time_eq(token.trim().as_bytes(), expected.as_bytes()))
}

async fn events_handler(
    State(state): State<Arc<ServerState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let request = to_request(&uri, &headers, body);
    match state.dispatcher.clone().oneshot(request).await {
        Ok(resp) => to_http(resp),
        Err(e) => {
            error!(error = %e, "Failed to build acknowledgment");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn deferred_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let authorized = state
        .lazy_token
        .as_deref()
        .is_some_and(|expected| bearer_matches(&headers, expected));
    if !authorized {
        warn!("Rejecting deferred invocation without a valid bearer token");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.dispatcher.dispatch_deferred(&body).await {
        Ok(resp) => to_http(resp),
        Err(e) => {
            warn!(error = %e, "Rejecting deferred invocation");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}
