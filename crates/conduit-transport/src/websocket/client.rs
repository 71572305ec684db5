//! Socket-mode client.
//!
//! Holds one outbound WebSocket connection, turns every envelope the server
//! pushes into a socket-mode [`Request`], dispatches it and acknowledges the
//! envelope on the same socket.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use conduit_core::{Request, Response, RetryConfig};
use conduit_framework::Dispatcher;

use crate::error::{TransportError, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection settings for socket mode.
#[derive(Debug, Clone)]
pub struct SocketModeConfig {
    /// `ws://` or `wss://` endpoint to connect to.
    pub url: String,
    /// Sent as a bearer token on the upgrade request.
    pub app_token: Option<String>,
    pub auto_reconnect: bool,
    pub retry: RetryConfig,
}

impl SocketModeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            app_token: None,
            auto_reconnect: true,
            retry: RetryConfig {
                max_retries: 10,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
            },
        }
    }

    pub fn app_token(mut self, token: impl Into<String>) -> Self {
        self.app_token = Some(token.into());
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// One envelope pushed by the server.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    accepts_response_payload: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Builds the acknowledgment frame for `envelope_id`.
///
/// The response body rides along only for a `200` with a body the server
/// said it accepts.
fn ack_message(envelope_id: &str, response: Option<&Response>, accepts_payload: bool) -> String {
    let payload = response
        .filter(|r| accepts_payload && r.status == 200 && !r.body.is_empty())
        .map(|r| serde_json::from_str::<Value>(&r.body).unwrap_or_else(|_| Value::String(r.body.clone())));

    match payload {
        Some(payload) => json!({ "envelope_id": envelope_id, "payload": payload }),
        None => json!({ "envelope_id": envelope_id }),
    }
    .to_string()
}

/// Socket-mode client bound to a dispatcher.
pub struct SocketModeClient {
    dispatcher: Dispatcher,
    config: SocketModeConfig,
}

impl SocketModeClient {
    pub fn new(dispatcher: Dispatcher, config: SocketModeConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Opens the first connection and spawns the receive loop.
    ///
    /// Fails only if that first connection cannot be established; later
    /// drops are handled by reconnecting.
    pub async fn connect(self) -> TransportResult<SocketModeHandle> {
        info!(url = %self.config.url, "Connecting to socket-mode endpoint");
        let (sink, source) = open(&self.config).await?;
        info!(url = %self.config.url, "Socket-mode client connected");

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_client_loop(
            sink,
            source,
            self.dispatcher,
            self.config,
            shutdown.clone(),
        ));

        Ok(SocketModeHandle { shutdown, task })
    }
}

/// Controls a running socket-mode client.
#[derive(Debug)]
pub struct SocketModeHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl SocketModeHandle {
    /// Token that stops the client when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops reading, flushes acknowledgments for in-flight envelopes and
    /// closes the socket.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Socket-mode task ended abnormally");
        }
    }

    /// Resolves when the client stops on its own.
    pub async fn wait(&mut self) {
        let _ = (&mut self.task).await;
    }
}

async fn open(config: &SocketModeConfig) -> TransportResult<(WsSink, WsSource)> {
    let failed = |reason: String| TransportError::ConnectionFailed {
        url: config.url.clone(),
        reason,
    };

    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| failed(e.to_string()))?;
    if let Some(token) = &config.app_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| failed(format!("invalid app token: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| failed(format!("WebSocket connection failed: {}", e)))?;
    Ok(stream.split())
}

enum Frame {
    Continue,
    Reconnect(&'static str),
}

fn on_text(
    text: &str,
    dispatcher: &Dispatcher,
    tasks: &TaskTracker,
    ack_tx: &mpsc::UnboundedSender<String>,
) -> Frame {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed socket-mode frame");
            return Frame::Continue;
        }
    };

    match envelope.kind.as_str() {
        "hello" => {
            debug!("Socket-mode server said hello");
            Frame::Continue
        }
        "disconnect" => {
            info!(reason = envelope.reason.as_deref().unwrap_or("-"), "Server requested disconnect");
            Frame::Reconnect("server requested disconnect")
        }
        kind => {
            let Some(envelope_id) = envelope.envelope_id else {
                debug!(kind, "Envelope without id, nothing to acknowledge");
                return Frame::Continue;
            };
            trace!(kind, envelope_id = %envelope_id, "Received envelope");

            let dispatcher = dispatcher.clone();
            let ack_tx = ack_tx.clone();
            let accepts_payload = envelope.accepts_response_payload;
            let request = Request::from_json(envelope.payload);
            tasks.spawn(async move {
                let ack = match dispatcher.dispatch(request).await {
                    Ok(resp) => ack_message(&envelope_id, Some(&resp), accepts_payload),
                    Err(e) => {
                        error!(envelope_id = %envelope_id, error = %e, "Failed to build acknowledgment");
                        ack_message(&envelope_id, None, accepts_payload)
                    }
                };
                let _ = ack_tx.send(ack);
            });
            Frame::Continue
        }
    }
}

async fn run_client_loop(
    sink: WsSink,
    source: WsSource,
    dispatcher: Dispatcher,
    config: SocketModeConfig,
    shutdown: CancellationToken,
) {
    let mut current_sink = sink;
    let mut current_source = source;
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<String>();
    let tasks = TaskTracker::new();

    loop {
        let reason = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Socket-mode client shutting down");
                break;
            }

            Some(ack) = ack_rx.recv() => {
                if let Err(e) = current_sink.send(Message::Text(ack.into())).await {
                    warn!(error = %e, "Failed to send acknowledgment");
                }
                continue;
            }

            msg = current_source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match on_text(text.as_str(), &dispatcher, &tasks, &ack_tx) {
                        Frame::Continue => continue,
                        Frame::Reconnect(reason) => reason,
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    trace!("Received ping, sending pong");
                    let _ = current_sink.send(Message::Pong(data)).await;
                    continue;
                }
                Some(Ok(Message::Close(_))) => "server closed connection",
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    "websocket error"
                }
                None => "stream ended",
            },
        };

        info!(reason, "Socket-mode connection lost");
        if !config.auto_reconnect {
            break;
        }
        match try_reconnect(&config, &shutdown).await {
            Some((sink, source)) => {
                current_sink = sink;
                current_source = source;
            }
            None => break,
        }
    }

    tasks.close();
    tasks.wait().await;
    while let Ok(ack) = ack_rx.try_recv() {
        if let Err(e) = current_sink.send(Message::Text(ack.into())).await {
            warn!(error = %e, "Failed to flush acknowledgment");
            break;
        }
    }
    let _ = current_sink.close().await;
}

/// Reconnects with exponential backoff.
///
/// Returns `None` once retries run out or shutdown is requested.
async fn try_reconnect(
    config: &SocketModeConfig,
    shutdown: &CancellationToken,
) -> Option<(WsSink, WsSource)> {
    let mut delay = config.retry.initial_delay;
    for attempt in 1..=config.retry.max_retries {
        warn!(attempt, delay = ?delay, "Reconnecting...");
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        match open(config).await {
            Ok(conn) => {
                info!(url = %config.url, "Reconnected successfully");
                return Some(conn);
            }
            Err(e) => {
                warn!(attempt, error = %e, "Reconnection failed");
                delay = config.retry.next_delay(delay);
            }
        }
    }
    error!(url = %config.url, "Max retries reached, giving up");
    None
}
