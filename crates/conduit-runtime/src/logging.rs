//! Logging setup on `tracing-subscriber`.
//!
//! Every dispatch runs inside a `dispatch` span carrying `request_id` and
//! `mode`, and lazy executions inside a `lazy` span. Turning on span events
//! makes those lifecycles visible:
//!
//! ```rust,ignore
//! use conduit_runtime::logging::{LoggingBuilder, SpanEvents};
//!
//! LoggingBuilder::new()
//!     .directive("conduit_framework=debug")
//!     .span_events(SpanEvents::LIFECYCLE)
//!     .init();
//! ```
//!
//! `RUST_LOG`, when set, replaces the configured base level; directives are
//! added on top of it.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};

/// Span lifecycle events to log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// Creation and close; close events carry the span's busy/idle time,
    /// which for a `dispatch` span is the time to acknowledge.
    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn to_fmt_span(self) -> FmtSpan {
        [
            (self.new, FmtSpan::NEW),
            (self.enter, FmtSpan::ENTER),
            (self.exit, FmtSpan::EXIT),
            (self.close, FmtSpan::CLOSE),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .fold(FmtSpan::NONE, |acc, (_, flag)| acc | flag)
    }
}

impl From<&SpanEventConfig> for SpanEvents {
    fn from(config: &SpanEventConfig) -> Self {
        Self {
            new: config.new,
            enter: config.enter,
            exit: config.exit,
            close: config.close,
        }
    }
}

/// Installs the global subscriber described by `config`.
///
/// Does nothing if a subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// Builder for the global subscriber.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: tracing::Level,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    file_path: Option<PathBuf>,
    rotation: LogRotation,
    with_target: bool,
    with_thread_ids: bool,
    with_file_location: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self {
            directives: Vec::new(),
            level: tracing::Level::INFO,
            span_events: SpanEvents::NONE,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            with_target: true,
            with_thread_ids: false,
            with_file_location: false,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self {
            level: config.level.to_tracing_level(),
            span_events: SpanEvents::from(&config.span_events),
            format: config.format,
            output: config.output,
            file_path: config.file_path.clone(),
            rotation: config.rotation,
            with_thread_ids: config.thread_ids,
            with_file_location: config.file_location,
            ..Self::new()
        };

        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort_by(|a, b| a.0.cmp(b.0));
        for (target, level) in filters {
            builder.directives.push(format!("{}={}", target, level.as_str()));
        }
        builder
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = level;
        self
    }

    /// Adds a filter directive such as `conduit_transport=trace`.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    pub fn with_file_location(mut self, enabled: bool) -> Self {
        self.with_file_location = enabled;
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let base = self.level.to_string().to_lowercase();
        let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&base));
        for directive in &self.directives {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        filter
    }

    /// Writer for the configured output; file output without a path falls
    /// back to stdout.
    fn make_writer(&self) -> (BoxMakeWriter, Option<&'static str>) {
        match (&self.output, &self.file_path) {
            (LogOutput::Stdout, _) => (BoxMakeWriter::new(std::io::stdout), None),
            (LogOutput::Stderr, _) => (BoxMakeWriter::new(std::io::stderr), None),
            (LogOutput::File, Some(path)) => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let name = path.file_name().unwrap_or_else(|| OsStr::new("conduit.log"));
                let appender = match self.rotation {
                    LogRotation::Never => tracing_appender::rolling::never(dir, name),
                    LogRotation::Hourly => tracing_appender::rolling::hourly(dir, name),
                    LogRotation::Daily => tracing_appender::rolling::daily(dir, name),
                };
                (BoxMakeWriter::new(appender), None)
            }
            (LogOutput::File, None) => (
                BoxMakeWriter::new(std::io::stdout),
                Some("File output requested but no file path configured, falling back to stdout"),
            ),
        }
    }

    fn build_layer(&self, writer: BoxMakeWriter) -> Box<dyn Layer<Registry> + Send + Sync> {
        let span_events = self.span_events.to_fmt_span();
        let base = fmt::layer()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_target(self.with_target)
            .with_thread_ids(self.with_thread_ids)
            .with_file(self.with_file_location)
            .with_line_number(self.with_file_location);

        match self.format {
            LogFormat::Compact => base.compact().boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => base.json().boxed(),
            #[cfg(not(feature = "json-log"))]
            LogFormat::Json => base.boxed(),
            LogFormat::Full => base.boxed(),
        }
    }

    /// Installs the subscriber, ignoring failure.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber; fails if one is already installed.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let filter = self.build_filter();
        let (writer, fallback) = self.make_writer();
        let layer = self.build_layer(writer);

        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()?;

        if let Some(message) = fallback {
            tracing::warn!("{}", message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_span_events_to_fmt_span() {
        assert_eq!(SpanEvents::NONE.to_fmt_span(), FmtSpan::NONE);
        assert_eq!(SpanEvents::LIFECYCLE.to_fmt_span(), FmtSpan::NEW | FmtSpan::CLOSE);
        assert_eq!(SpanEvents::FULL.to_fmt_span(), FmtSpan::FULL);
    }

    #[test]
    fn test_from_config_orders_directives() {
        let mut config = LoggingConfig {
            level: LogLevel::Debug,
            ..Default::default()
        };
        config.filters.insert("hyper".into(), LogLevel::Warn);
        config.filters.insert("conduit_framework".into(), LogLevel::Trace);

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, tracing::Level::DEBUG);
        assert_eq!(builder.directives, vec!["conduit_framework=trace", "hyper=warn"]);
    }

    #[test]
    fn test_file_output_without_path_falls_back() {
        let builder = LoggingBuilder::new().output(LogOutput::File);
        let (_writer, fallback) = builder.make_writer();
        assert!(fallback.is_some());
    }
}
