//! Process orchestration: configuration in, running transports out.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use conduit_runtime::ConduitRuntime;
//!
//! let runtime = ConduitRuntime::builder()
//!     .config_file("conduit.toml")
//!     .build()?
//!     .listener(mention_listener);
//!
//! // Serves until Ctrl+C or SIGTERM, then drains lazy work.
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::signal;
use tracing::{debug, info, warn};

use conduit_core::BoxedClient;
use conduit_framework::{
    BoxedCompletionHandler, BoxedErrorHandler, BoxedLazyRunner, BoxedMiddleware,
    CompletionHandler, Dispatcher, ErrorHandler, LazyRunner, Listener, TaskLazyRunner,
    ThreadLazyRunner,
};

use crate::config::{ConduitConfig, ConfigLoader, LazyConfig, LazyRunnerKind, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Owns the configuration and the app's listeners, and runs the transports
/// the configuration asks for.
pub struct ConduitRuntime {
    config: ConduitConfig,
    listeners: Vec<Listener>,
    middleware: Vec<BoxedMiddleware>,
    completion: Option<BoxedCompletionHandler>,
    error_handler: Option<BoxedErrorHandler>,
    client: Option<BoxedClient>,
    lazy_runner: Option<BoxedLazyRunner>,
}

impl ConduitRuntime {
    /// Loads configuration from the current directory and environment.
    ///
    /// Falls back to defaults, with a warning, if loading fails.
    pub fn new() -> Self {
        match ConfigLoader::new().with_current_dir().load() {
            Ok(config) => Self::from_config(&config),
            Err(e) => {
                let runtime = Self::from_config(&ConduitConfig::default());
                warn!(error = %e, "Failed to load config, using defaults");
                runtime
            }
        }
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration and installs
    /// logging from its `logging` section.
    pub fn from_config(config: &ConduitConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            app = %config.app.name,
            log_level = %config.logging.level,
            lazy_runner = config.lazy.runner.as_str(),
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            listeners: Vec::new(),
            middleware: Vec::new(),
            completion: None,
            error_handler: None,
            client: None,
            lazy_runner: None,
        }
    }

    pub fn config(&self) -> &ConduitConfig {
        &self.config
    }

    // ==================== Registration ====================

    /// Registers a listener after those already registered.
    pub fn listener(mut self, listener: Listener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Appends a global middleware, run after the built-ins.
    pub fn middleware(mut self, middleware: BoxedMiddleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn completion_handler(mut self, handler: impl CompletionHandler) -> Self {
        self.completion = Some(Arc::new(handler));
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn client(mut self, client: BoxedClient) -> Self {
        self.client = Some(client);
        self
    }

    /// Uses `runner` instead of the one named in `lazy.runner`.
    pub fn lazy_runner(mut self, runner: impl LazyRunner) -> Self {
        self.lazy_runner = Some(Arc::new(runner));
        self
    }

    // ==================== Assembly ====================

    /// Builds the dispatcher described by the configuration and registrations.
    pub fn dispatcher(&self) -> RuntimeResult<Dispatcher> {
        let app = &self.config.app;
        let lazy_runner = match &self.lazy_runner {
            Some(runner) => Arc::clone(runner),
            None => lazy_runner_from_config(&self.config.lazy)?,
        };

        let mut builder = Dispatcher::builder()
            .request_verification(app.request_verification_enabled())
            .timestamp_tolerance_secs(app.timestamp_tolerance_secs)
            .ssl_check(app.ssl_check)
            .url_verification(app.url_verification)
            .raise_error_for_unhandled_request(app.raise_error_for_unhandled_request)
            .lazy_runner_arc(lazy_runner);

        if let Some(secret) = &app.signing_secret {
            builder = builder.signing_secret(secret.clone());
        }
        if let Some(token) = &app.verification_token {
            builder = builder.verification_token(token.clone());
        }
        if let Some(token) = &app.token {
            builder = builder.token(token.clone());
        }
        if let Some(client) = &self.client {
            builder = builder.client(Arc::clone(client));
        }
        if let Some(handler) = &self.completion {
            builder = builder.completion_handler_arc(Arc::clone(handler));
        }
        if let Some(handler) = &self.error_handler {
            builder = builder.error_handler_arc(Arc::clone(handler));
        }
        for middleware in &self.middleware {
            builder = builder.middleware(Arc::clone(middleware));
        }
        for listener in &self.listeners {
            builder = builder.listener(listener.clone());
        }

        Ok(builder.build())
    }

    // ==================== Lifecycle ====================

    /// Serves until Ctrl+C or SIGTERM.
    pub async fn run(self) -> RuntimeResult<()> {
        let dispatcher = self.dispatcher()?;
        let transports = self.start(&dispatcher).await?;

        info!("Conduit runtime is now running. Press Ctrl+C to stop.");
        let waited = wait_for_shutdown().await;

        self.stop(&dispatcher, transports).await;
        waited
    }

    /// Serves until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let dispatcher = self.dispatcher()?;
        let transports = self.start(&dispatcher).await?;

        shutdown.await;

        self.stop(&dispatcher, transports).await;
        Ok(())
    }

    async fn start(&self, dispatcher: &Dispatcher) -> RuntimeResult<Transports> {
        let mut transports = Transports::default();

        if self.config.server.enabled {
            #[cfg(feature = "http-server")]
            {
                use conduit_transport::http::{EventServerConfig, serve};

                let server = &self.config.server;
                let mut server_config =
                    EventServerConfig::new(server.bind_addr()).path(server.path.clone());
                if let Some(lazy_path) = &server.lazy_path {
                    server_config = server_config.lazy_path(lazy_path.clone());
                }
                if let Some(token) = &server.lazy_token {
                    server_config = server_config.lazy_token(token.clone());
                }
                transports.server = Some(serve(dispatcher.clone(), server_config).await?);
            }
            #[cfg(not(feature = "http-server"))]
            warn!("server.enabled is set but this build has no `http-server` feature");
        }

        if let Some(socket_mode) = &self.config.socket_mode {
            #[cfg(feature = "ws-client")]
            {
                use conduit_transport::websocket::{SocketModeClient, SocketModeConfig};

                let mut client_config = SocketModeConfig::new(socket_mode.url.clone())
                    .auto_reconnect(socket_mode.auto_reconnect)
                    .retry(socket_mode.retry.to_core_retry());
                if let Some(token) = &socket_mode.app_token {
                    client_config = client_config.app_token(token.clone());
                }
                let handle = SocketModeClient::new(dispatcher.clone(), client_config)
                    .connect()
                    .await;
                match handle {
                    Ok(handle) => transports.socket = Some(handle),
                    Err(e) => {
                        transports.stop().await;
                        return Err(e.into());
                    }
                }
            }
            #[cfg(not(feature = "ws-client"))]
            {
                let _ = socket_mode;
                return Err(RuntimeError::FeatureDisabled {
                    feature: "ws-client",
                    needed_for: "socket_mode",
                });
            }
        }

        info!(
            listeners = dispatcher.registry().len(),
            middleware = dispatcher.middleware_count(),
            lazy_runner = dispatcher.lazy_runner().name(),
            "Runtime started"
        );
        Ok(transports)
    }

    async fn stop(&self, dispatcher: &Dispatcher, transports: Transports) {
        info!("Stopping Conduit runtime");
        transports.stop().await;

        debug!("Draining lazy work");
        dispatcher.shutdown().await;

        info!("Runtime stopped");
    }
}

impl Default for ConduitRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Picks the lazy runner named by the configuration.
pub fn lazy_runner_from_config(lazy: &LazyConfig) -> RuntimeResult<BoxedLazyRunner> {
    match lazy.runner {
        LazyRunnerKind::Task => Ok(Arc::new(TaskLazyRunner::new())),
        LazyRunnerKind::Thread => Ok(Arc::new(match lazy.threads {
            Some(threads) => ThreadLazyRunner::with_max_threads(threads),
            None => ThreadLazyRunner::new(),
        })),
        #[cfg(feature = "http-client")]
        LazyRunnerKind::Remote => {
            use conduit_framework::RemoteLazyRunner;
            use conduit_transport::http::HttpInvoker;
            use std::time::Duration;

            let remote = lazy.remote.as_ref().ok_or_else(|| {
                RuntimeError::Config(crate::config::ConfigError::missing_field("lazy.remote.url"))
            })?;
            let mut invoker =
                HttpInvoker::new(remote.url.clone(), Duration::from_millis(remote.timeout_ms))?;
            if let Some(token) = &remote.bearer_token {
                invoker = invoker.bearer_token(token.clone());
            }
            Ok(Arc::new(
                RemoteLazyRunner::new(invoker).retry(remote.retry.to_core_retry()),
            ))
        }
        #[cfg(not(feature = "http-client"))]
        LazyRunnerKind::Remote => Err(RuntimeError::FeatureDisabled {
            feature: "http-client",
            needed_for: "lazy.runner = \"remote\"",
        }),
    }
}

/// Transports started for one run.
#[derive(Default)]
struct Transports {
    #[cfg(feature = "http-server")]
    server: Option<conduit_transport::http::ServerHandle>,
    #[cfg(feature = "ws-client")]
    socket: Option<conduit_transport::websocket::SocketModeHandle>,
}

impl Transports {
    async fn stop(self) {
        #[cfg(feature = "http-server")]
        if let Some(server) = self.server {
            server.shutdown().await;
        }
        #[cfg(feature = "ws-client")]
        if let Some(socket) = self.socket {
            socket.shutdown().await;
        }
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(RuntimeError::Signal)?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.map_err(RuntimeError::Signal)?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map_err(RuntimeError::Signal)?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Loads and validates configuration, then creates a [`ConduitRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Base configuration below files and environment.
    pub fn merge(mut self, config: ConduitConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Overrides one dotted key above every other source.
    pub fn set<T: serde::Serialize>(mut self, key: &str, value: T) -> Self {
        self.config_loader = self.config_loader.set(key, value);
        self
    }

    pub fn build(self) -> RuntimeResult<ConduitRuntime> {
        let config = self.config_loader.load()?;
        validate_config(&config)?;
        Ok(ConduitRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::Request;
    use conduit_framework::{Matcher, completion_fn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quiet_config() -> ConduitConfig {
        let mut config = ConduitConfig::default();
        config.server.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_dispatcher_enforces_signing_secret() {
        let mut config = quiet_config();
        config.app.signing_secret = Some("s3cr3t".into());

        let dispatcher = ConduitRuntime::from_config(&config).dispatcher().unwrap();
        let resp = dispatcher
            .dispatch(Request::new(r#"{"type":"event_callback"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status, 401);
    }

    #[tokio::test]
    async fn test_dispatcher_uses_configured_runner() {
        let mut config = quiet_config();
        config.lazy.runner = LazyRunnerKind::Thread;

        let dispatcher = ConduitRuntime::from_config(&config).dispatcher().unwrap();
        assert_eq!(dispatcher.lazy_runner().name(), "thread");

        let dispatcher = ConduitRuntime::from_config(&config)
            .lazy_runner(TaskLazyRunner::new())
            .dispatcher()
            .unwrap();
        assert_eq!(dispatcher.lazy_runner().name(), "task");
    }

    #[cfg(not(feature = "http-client"))]
    #[test]
    fn test_remote_runner_needs_http_client() {
        let lazy = LazyConfig {
            runner: LazyRunnerKind::Remote,
            threads: None,
            remote: None,
        };
        assert!(matches!(
            lazy_runner_from_config(&lazy),
            Err(RuntimeError::FeatureDisabled { feature: "http-client", .. })
        ));
    }

    #[tokio::test]
    async fn test_run_until_drains_lazy_work() {
        let lazy_runs = Arc::new(AtomicUsize::new(0));
        let completions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&completions);
        let counter = Arc::clone(&lazy_runs);

        let runtime = ConduitRuntime::from_config(&quiet_config())
            .completion_handler(completion_fn(move |_req, _resp| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .listener(Listener::new("slow", Matcher::command("/slow")).lazy(
                "slow",
                move |_req| {
                    let counter = Arc::clone(&counter);
                    async move {
                        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            ));

        let dispatcher = runtime.dispatcher().unwrap();
        let resp = dispatcher.dispatch(Request::new("command=%2Fslow")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        // the runtime's own dispatcher is separate; drain this one directly
        dispatcher.shutdown().await;
        assert_eq!(lazy_runs.load(Ordering::SeqCst), 1);

        runtime.run_until(async {}).await.unwrap();
    }
}
