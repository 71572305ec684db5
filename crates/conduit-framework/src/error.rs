//! Error types for the Conduit framework.

use thiserror::Error;

/// Failure handing a deferred payload to a remote target.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The payload could not be serialized.
    #[error("failed to serialize deferred payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The target answered, but refused the payload.
    #[error("remote target rejected payload with status {status}")]
    Rejected {
        /// Status reported by the target.
        status: u16,
    },

    /// The target could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The in-memory queue has no consumer any more.
    #[error("deferred queue is closed")]
    Closed,
}

impl InvokeError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether retrying the same payload can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status } => *status >= 500 || *status == 429,
            Self::Serialize(_) | Self::Closed => false,
        }
    }
}

/// Result type for remote invocations.
pub type InvokeResult<T = ()> = Result<T, InvokeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(InvokeError::transport("reset").is_retryable());
        assert!(InvokeError::Rejected { status: 503 }.is_retryable());
        assert!(InvokeError::Rejected { status: 429 }.is_retryable());
        assert!(!InvokeError::Rejected { status: 400 }.is_retryable());
        assert!(!InvokeError::Closed.is_retryable());
    }
}
