//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    AppConfig, ConduitConfig, LazyConfig, LazyRunnerKind, LogOutput, LoggingConfig, RetryConfig,
    ServerConfig, SocketModeConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &ConduitConfig) -> ConfigResult<()> {
    validate_app_config(&config.app)?;
    validate_lazy_config(&config.lazy)?;
    if config.server.enabled {
        validate_server_config(&config.server)?;
    }
    if let Some(socket_mode) = &config.socket_mode {
        validate_socket_mode_config(socket_mode)?;
    }
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_app_config(app: &AppConfig) -> ConfigResult<()> {
    if app.name.trim().is_empty() {
        return Err(ConfigError::missing_field("app.name"));
    }

    if app.request_verification == Some(true)
        && app.signing_secret.as_deref().is_none_or(str::is_empty)
    {
        return Err(ConfigError::validation(
            "Request verification is enabled but app.signing_secret is not set",
        ));
    }

    if app.timestamp_tolerance_secs == 0 {
        return Err(ConfigError::validation(
            "Timestamp tolerance must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_lazy_config(lazy: &LazyConfig) -> ConfigResult<()> {
    if lazy.threads == Some(0) {
        return Err(ConfigError::validation("lazy.threads must be at least 1"));
    }
    match (&lazy.runner, &lazy.remote) {
        (LazyRunnerKind::Remote, None) => Err(ConfigError::missing_field("lazy.remote.url")),
        (_, Some(remote)) => {
            validate_url(&remote.url, "http")?;
            if remote.timeout_ms == 0 {
                return Err(ConfigError::validation("Timeout must be greater than 0"));
            }
            validate_retry_config(&remote.retry)
        }
        (_, None) => Ok(()),
    }
}

fn validate_server_config(server: &ServerConfig) -> ConfigResult<()> {
    validate_port(server.port)?;
    validate_path(&server.path)?;
    if let Some(lazy_path) = &server.lazy_path {
        validate_path(lazy_path)?;
        if lazy_path == &server.path {
            return Err(ConfigError::validation(
                "server.lazy_path must differ from server.path",
            ));
        }
        if server.lazy_token.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::missing_field("server.lazy_token"));
        }
    }
    Ok(())
}

fn validate_socket_mode_config(socket_mode: &SocketModeConfig) -> ConfigResult<()> {
    validate_url(&socket_mode.url, "ws")?;
    validate_retry_config(&socket_mode.retry)
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    if let Some(target) = logging.filters.keys().find(|t| t.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid log filter target: {:?}",
            target
        )));
    }
    Ok(())
}

/// Validates retry configuration.
fn validate_retry_config(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    Ok(())
}

/// Validates a URL.
fn validate_url(url: &str, expected_scheme: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("url"));
    }

    let valid_schemes = match expected_scheme {
        "ws" => ["ws://", "wss://"],
        "http" => ["http://", "https://"],
        _ => return Err(ConfigError::validation("Unknown URL scheme type")),
    };

    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {:?}", valid_schemes),
        ));
    }

    Ok(())
}

fn validate_port(port: u16) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }
    Ok(())
}

fn validate_path(path: &str) -> ConfigResult<()> {
    if !path.starts_with('/') {
        return Err(ConfigError::validation("Path must start with '/'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RemoteLazyConfig;

    fn remote(url: &str) -> RemoteLazyConfig {
        RemoteLazyConfig {
            url: url.to_string(),
            bearer_token: None,
            timeout_ms: 1000,
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&ConduitConfig::default()).is_ok());
    }

    #[test]
    fn test_remote_runner_needs_url() {
        let mut config = ConduitConfig::default();
        config.lazy.runner = LazyRunnerKind::Remote;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.lazy.remote = Some(remote("ftp://worker"));
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidUrl { .. })
        ));

        config.lazy.remote = Some(remote("https://worker.example.com/lazy"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_server_checks() {
        let mut config = ConduitConfig::default();
        config.server.port = 0;
        assert!(matches!(validate_config(&config), Err(ConfigError::InvalidPort(0))));

        config.server.enabled = false;
        assert!(validate_config(&config).is_ok());

        let mut config = ConduitConfig::default();
        config.server.path = "events".into();
        assert!(validate_config(&config).is_err());

        let mut config = ConduitConfig::default();
        config.server.lazy_path = Some(config.server.path.clone());
        config.server.lazy_token = Some("t".into());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_lazy_threads_rejected() {
        let mut config = ConduitConfig::default();
        config.lazy.threads = Some(0);
        assert!(validate_config(&config).is_err());

        config.lazy.threads = Some(2);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_lazy_path_needs_token() {
        let mut config = ConduitConfig::default();
        config.server.lazy_path = Some("/slack/lazy".into());
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "server.lazy_token"
        ));

        config.server.lazy_token = Some(String::new());
        assert!(validate_config(&config).is_err());

        config.server.lazy_token = Some("lazy-secret".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_bad_retry_settings() {
        let mut config = ConduitConfig::default();
        config.socket_mode = Some(SocketModeConfig {
            url: "wss://socket.example.com".into(),
            app_token: None,
            auto_reconnect: true,
            retry: RetryConfig {
                backoff_multiplier: 0.5,
                ..Default::default()
            },
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_forced_verification_without_secret() {
        let mut config = ConduitConfig::default();
        config.app.request_verification = Some(true);
        assert!(validate_config(&config).is_err());

        config.app.signing_secret = Some("s3cr3t".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = ConduitConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());
    }
}
