//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running a [`ConduitRuntime`](crate::ConduitRuntime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] conduit_transport::TransportError),

    /// The configuration asks for something this build was compiled without.
    #[error("{needed_for} requires the `{feature}` feature")]
    FeatureDisabled {
        feature: &'static str,
        needed_for: &'static str,
    },

    /// Installing a signal handler failed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[source] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
