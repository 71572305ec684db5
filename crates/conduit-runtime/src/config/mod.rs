//! Configuration for Conduit apps.
//!
//! Layered loading through figment (defaults, files, `CONDUIT_*` environment
//! variables, programmatic overrides) and validation of the result.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    AppConfig, ConduitConfig, LazyConfig, LazyRunnerKind, LogFormat, LogLevel, LogOutput,
    LogRotation, LoggingConfig, RemoteLazyConfig, RetryConfig, ServerConfig, SocketModeConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
