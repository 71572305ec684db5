//! Layered configuration loading on figment.
//!
//! Layers, lowest first:
//!
//! 1. [`ConduitConfig::default`]
//! 2. a base config passed to [`ConfigLoader::merge`]
//! 3. `conduit.{profile}.toml` (or `.yaml`/`.yml`)
//! 4. `conduit.toml` (or `.yaml`/`.yml`)
//! 5. `CONDUIT_*` environment variables, `__` separating path segments
//!    (`CONDUIT_LAZY__REMOTE__URL` sets `lazy.remote.url`)
//! 6. single keys passed to [`ConfigLoader::set`]
//!
//! File formats follow the `toml-config` and `yaml-config` features. The
//! first directory on the search path that holds a main file wins.
//! `CONDUIT_PROFILE` picks the profile and never reaches the config tree.
//!
//! ```rust,ignore
//! use conduit_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .set("server.port", 8080)
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Serialized};
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::ConduitConfig;

const ENV_PREFIX: &str = "CONDUIT_";
const PROFILE_ENV: &str = "CONDUIT_PROFILE";
const FILE_STEM: &str = "conduit";

/// Selects the profile-specific file layered under the main file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Reads `CONDUIT_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_ENV)
            .map(|name| Self::parse(&name))
            .unwrap_or_default()
    }

    /// Accepts the usual short forms (`dev`, `prod`).
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            _ => Self::Custom(name.to_string()),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A config file format compiled into this build.
#[derive(Debug, Clone, Copy)]
enum FileFormat {
    #[cfg(feature = "toml-config")]
    Toml,
    #[cfg(feature = "yaml-config")]
    Yaml,
}

impl FileFormat {
    const ENABLED: &'static [FileFormat] = &[
        #[cfg(feature = "toml-config")]
        FileFormat::Toml,
        #[cfg(feature = "yaml-config")]
        FileFormat::Yaml,
    ];

    fn extensions(self) -> &'static [&'static str] {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => &["toml"],
            #[cfg(feature = "yaml-config")]
            Self::Yaml => &["yaml", "yml"],
        }
    }

    fn for_path(path: &Path) -> ConfigResult<Self> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        Self::ENABLED
            .iter()
            .copied()
            .find(|format| format.extensions().contains(&extension))
            .ok_or_else(|| ConfigError::UnsupportedFormat {
                extension: extension.to_string(),
            })
    }

    fn layer(self, figment: Figment, path: &Path) -> Figment {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => figment.merge(figment::providers::Toml::file(path)),
            #[cfg(feature = "yaml-config")]
            Self::Yaml => figment.merge(figment::providers::Yaml::file(path)),
        }
    }
}

/// Builder over the configuration sources.
pub struct ConfigLoader {
    base: Figment,
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            base: Figment::new(),
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Appends a directory to search for config files.
    ///
    /// With no search paths set, the current directory and
    /// `<user config dir>/conduit` are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join(FILE_STEM)),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching; it must exist.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Layers a whole config just above the defaults.
    pub fn merge(mut self, config: ConduitConfig) -> Self {
        self.base = self.base.merge(Serialized::defaults(config));
        self
    }

    /// Overrides one dotted key above every other source.
    ///
    /// ```rust,ignore
    /// let config = ConfigLoader::new().set("lazy.runner", "thread").load()?;
    /// ```
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    pub fn load(self) -> ConfigResult<ConduitConfig> {
        let profile = self.profile.clone();
        let config: ConduitConfig = self.figment()?.extract()?;

        debug!(
            profile = %profile,
            app = %config.app.name,
            lazy_runner = config.lazy.runner.as_str(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn figment(self) -> ConfigResult<Figment> {
        let mut figment =
            Figment::from(Serialized::defaults(ConduitConfig::default())).merge(self.base.clone());

        match &self.config_file {
            Some(path) if !path.exists() => {
                return Err(ConfigError::FileNotFound { path: path.clone() });
            }
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                figment = FileFormat::for_path(path)?.layer(figment, path);
            }
            None => {
                let files = self.discover();
                if files.is_empty() {
                    warn!("No configuration file found, using defaults");
                }
                for (format, path) in files {
                    info!(path = %path.display(), "Loading configuration file");
                    figment = format.layer(figment, &path);
                }
            }
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Layering environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["profile"]).split("__"));
        }

        Ok(figment.merge(self.overrides))
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join(FILE_STEM)))
            .collect()
    }

    /// Files to layer, lowest first: per format, the profile file then the
    /// main file from the first directory that has a main file.
    fn discover(&self) -> Vec<(FileFormat, PathBuf)> {
        let dirs = self.search_dirs();
        let mut files = Vec::new();

        for &format in FileFormat::ENABLED {
            let found = dirs.iter().find_map(|dir| {
                format.extensions().iter().find_map(|ext| {
                    let main = dir.join(format!("{FILE_STEM}.{ext}"));
                    main.exists().then(|| {
                        let profiled =
                            dir.join(format!("{FILE_STEM}.{}.{ext}", self.profile.as_str()));
                        (profiled, main)
                    })
                })
            });

            if let Some((profiled, main)) = found {
                if profiled.exists() {
                    debug!(path = %profiled.display(), "Found profile-specific config");
                    files.push((format, profiled));
                }
                files.push((format, main));
            }
        }
        files
    }
}

/// Loads from the default locations with environment overrides.
pub fn load_config() -> ConfigResult<ConduitConfig> {
    ConfigLoader::new().load()
}

/// Loads one specific file plus environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<ConduitConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LazyRunnerKind, LogLevel};
    use figment::Jail;

    #[test]
    fn test_defaults_without_files_or_env() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.logging.level.as_str(), "info");
            assert_eq!(config.server.path, "/slack/events");
            assert!(config.socket_mode.is_none());
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("CONDUIT_SERVER__PORT", "8080");
            jail.set_env("CONDUIT_LAZY__RUNNER", "thread");
            jail.set_env("CONDUIT_APP__SIGNING_SECRET", "s3cr3t");
            jail.set_env("CONDUIT_PROFILE", "production");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 8080);
            assert_eq!(config.lazy.runner, LazyRunnerKind::Thread);
            assert_eq!(config.app.signing_secret.as_deref(), Some("s3cr3t"));
            Ok(())
        });
    }

    #[test]
    fn test_set_beats_env() {
        Jail::expect_with(|jail| {
            jail.set_env("CONDUIT_LOGGING__LEVEL", "warn");
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .set("logging.level", "trace")
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.logging.level, LogLevel::Trace);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|_jail| {
            let err = ConfigLoader::new().file("nope.toml").load().unwrap_err();
            assert!(matches!(err, ConfigError::FileNotFound { .. }));
            Ok(())
        });
    }

    #[test]
    fn test_unknown_extension() {
        Jail::expect_with(|jail| {
            jail.create_file("conduit.ini", "name = x")?;
            let err = ConfigLoader::new().file("conduit.ini").load().unwrap_err();
            assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_profile_file_under_main_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "conduit.toml",
                r#"
                [app]
                name = "main"

                [server]
                path = "/events"
                "#,
            )?;
            jail.create_file(
                "conduit.staging.toml",
                r#"
                [app]
                name = "staging"

                [server]
                port = 4000
                "#,
            )?;

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .profile("staging")
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.app.name, "main");
            assert_eq!(config.server.port, 4000);
            assert_eq!(config.server.path, "/events");
            Ok(())
        });
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!(Profile::parse("PROD"), Profile::Production);
        assert_eq!(Profile::parse("dev"), Profile::Development);
        assert_eq!(Profile::parse("staging").as_str(), "staging");

        Jail::expect_with(|jail| {
            jail.set_env("CONDUIT_PROFILE", "prod");
            assert_eq!(Profile::from_env(), Profile::Production);
            Ok(())
        });
    }
}
