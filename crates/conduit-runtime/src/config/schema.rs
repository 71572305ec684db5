//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConduitConfig {
    /// Application identity, credentials and dispatcher switches.
    #[serde(default)]
    pub app: AppConfig,

    /// Where lazy functions run.
    #[serde(default)]
    pub lazy: LazyConfig,

    /// Inbound HTTP server.
    #[serde(default)]
    pub server: ServerConfig,

    /// Socket-mode connection; absent means HTTP only.
    #[serde(default)]
    pub socket_mode: Option<SocketModeConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// App
// =============================================================================

/// Application settings that shape the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Secret used to verify request signatures.
    #[serde(default)]
    pub signing_secret: Option<String>,

    /// Bot token placed into every request context.
    #[serde(default)]
    pub token: Option<String>,

    /// Legacy token checked by the SSL check step.
    #[serde(default)]
    pub verification_token: Option<String>,

    /// Defaults to on whenever a signing secret is present.
    #[serde(default)]
    pub request_verification: Option<bool>,

    #[serde(default = "default_true")]
    pub ssl_check: bool,

    #[serde(default = "default_true")]
    pub url_verification: bool,

    #[serde(default)]
    pub raise_error_for_unhandled_request: bool,

    /// Maximum age of a signed request.
    #[serde(default = "default_timestamp_tolerance_secs")]
    pub timestamp_tolerance_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            signing_secret: None,
            token: None,
            verification_token: None,
            request_verification: None,
            ssl_check: true,
            url_verification: true,
            raise_error_for_unhandled_request: false,
            timestamp_tolerance_secs: default_timestamp_tolerance_secs(),
        }
    }
}

impl AppConfig {
    /// Whether signatures are checked, resolving the secret-based default.
    pub fn request_verification_enabled(&self) -> bool {
        self.request_verification
            .unwrap_or(self.signing_secret.is_some())
    }
}

fn default_app_name() -> String {
    "conduit-app".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timestamp_tolerance_secs() -> u64 {
    300
}

// =============================================================================
// Lazy execution
// =============================================================================

/// Which runner executes lazy functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LazyRunnerKind {
    /// A tokio task on the current runtime.
    #[default]
    Task,
    /// A bounded pool of OS threads, sized by `lazy.threads`.
    Thread,
    /// A serialized invocation posted to another deployment.
    Remote,
}

impl LazyRunnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Thread => "thread",
            Self::Remote => "remote",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LazyConfig {
    #[serde(default)]
    pub runner: LazyRunnerKind,

    /// Worker limit for the `thread` runner; defaults to the core count.
    #[serde(default)]
    pub threads: Option<usize>,

    /// Required when `runner` is `remote`.
    #[serde(default)]
    pub remote: Option<RemoteLazyConfig>,
}

/// Target for the remote runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteLazyConfig {
    /// Deferred endpoint of the deployment that runs the functions.
    pub url: String,

    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Per-submission timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timeout_ms() -> u64 {
    10000
}

// =============================================================================
// Retry
// =============================================================================

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Converts to core retry config.
    pub fn to_core_retry(&self) -> conduit_core::RetryConfig {
        conduit_core::RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// =============================================================================
// Transports
// =============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Path receiving platform events.
    #[serde(default = "default_events_path")]
    pub path: String,

    /// Path receiving deferred invocations from a remote runner.
    #[serde(default)]
    pub lazy_path: Option<String>,

    /// Bearer token the deferred path requires; mandatory with `lazy_path`.
    #[serde(default)]
    pub lazy_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            path: default_events_path(),
            lazy_path: None,
            lazy_token: None,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_events_path() -> String {
    "/slack/events".to_string()
}

/// Socket-mode client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocketModeConfig {
    /// WebSocket URL to connect to.
    pub url: String,

    /// App-level token sent on the upgrade request.
    #[serde(default)]
    pub app_token: Option<String>,

    /// Auto-reconnect on disconnection.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    #[serde(default)]
    pub retry: RetryConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log level names accepted in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` without it.
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Required when `output` is `file`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Per-target levels, e.g. `conduit_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of each event.
    #[serde(default)]
    pub file_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            filters: HashMap::new(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_verification_follows_secret() {
        let mut app = AppConfig::default();
        assert!(!app.request_verification_enabled());

        app.signing_secret = Some("s3cr3t".into());
        assert!(app.request_verification_enabled());

        app.request_verification = Some(false);
        assert!(!app.request_verification_enabled());
    }

    #[test]
    fn test_retry_to_core() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 3.0,
        }
        .to_core_retry();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(100));
        assert_eq!(retry.next_delay(Duration::from_millis(500)), Duration::from_millis(1000));
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let config: ConduitConfig = serde_json::from_value(serde_json::json!({
            "app": {"name": "bot", "signing_secret": "x"},
            "lazy": {"runner": "remote", "remote": {"url": "https://w.example.com/lazy"}},
            "logging": {"level": "debug", "filters": {"hyper": "warn"}}
        }))
        .unwrap();

        assert_eq!(config.app.name, "bot");
        assert!(config.app.ssl_check);
        assert_eq!(config.lazy.runner, LazyRunnerKind::Remote);
        assert_eq!(config.lazy.remote.as_ref().unwrap().timeout_ms, 10000);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.filters["hyper"], LogLevel::Warn);
        assert!(config.socket_mode.is_none());
    }
}
