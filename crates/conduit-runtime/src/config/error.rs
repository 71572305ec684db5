//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("config file {} does not exist", path.display())]
    FileNotFound { path: PathBuf },

    /// The file extension names no format this build can read.
    #[error("cannot read .{extension} config files (is the matching `*-config` feature on?)")]
    UnsupportedFormat { extension: String },

    /// A source failed to parse, or the merged tree does not fit the schema.
    #[error(transparent)]
    Extract(#[from] Box<figment::Error>),

    #[error("invalid config: {message}")]
    Invalid { message: String },

    #[error("`{field}` is required")]
    MissingField { field: String },

    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("port {0} cannot be bound")]
    InvalidPort(u16),
}

impl ConfigError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Extract(Box::new(err))
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
