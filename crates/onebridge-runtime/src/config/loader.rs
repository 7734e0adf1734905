//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: `onebridge.toml`
//! - `yaml-config`: `onebridge.yaml`, `onebridge.yml`
//!
//! Both can be enabled; each enabled format is searched.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Profile-specific file (`onebridge.{profile}.toml`)
//! 3. Main file (`onebridge.toml` / `onebridge.yaml`)
//! 4. Environment variables (`ONEBRIDGE_*`)
//! 5. Programmatic overrides ([`ConfigLoader::merge`], [`ConfigLoader::set`])
//!
//! # Environment Variable Mapping
//!
//! The `ONEBRIDGE_` prefix is stripped and `__` separates nested keys:
//!
//! - `ONEBRIDGE_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `ONEBRIDGE_ONEBOT__MODE=client` → `onebot.mode = "client"`
//! - `ONEBRIDGE_ONEBOT__CLIENT__URL=ws://host:3001` → `onebot.client.url`
//!
//! # Example
//!
//! ```rust,ignore
//! use onebridge_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .set("onebot.api_timeout_secs", 10)
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::BridgeConfig;

const ENV_PREFIX: &str = "ONEBRIDGE_";
const PROFILE_VAR: &str = "ONEBRIDGE_PROFILE";
const FILE_STEM: &str = "onebridge";

/// Configuration profile for environment-specific files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name, accepting the `dev` and `prod` short forms.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `ONEBRIDGE_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    /// Programmatic overrides, merged last.
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader with the profile taken from the environment.
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a search path for configuration files.
    ///
    /// Once any path is added, the default paths are no longer searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Overrides every field with `config`.
    pub fn merge(mut self, config: BridgeConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Overrides one value by dotted key path, e.g. `"onebot.mode"`.
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<BridgeConfig> {
        let profile = self.profile.clone();
        let config: BridgeConfig = self.build_figment()?.extract()?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            mode = %config.onebot.mode,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(BridgeConfig::default()));

        if let Some(path) = self.config_file.take() {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = Self::merge_config_file(figment, &path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&["PROFILE"])
                    .split("__"),
            );
        }

        Ok(figment.merge(self.overrides))
    }

    /// Merges a single config file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join(FILE_STEM));
        }
        paths
    }

    /// Searches `search_paths × extensions`. The first base file found wins;
    /// its profile-specific sibling is merged underneath it.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        extensions: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for ext in extensions {
                let profile_path =
                    search_path.join(format!("{FILE_STEM}.{}.{ext}", self.profile.as_str()));
                let base_path = search_path.join(format!("{FILE_STEM}.{ext}"));

                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    return (merge_fn(figment, &base_path), true);
                }
            }
        }
        (figment, false)
    }

    #[allow(unused_mut)]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) =
                self.load_format_files(figment, &search_paths, &["toml"], |fig, path| {
                    fig.merge(Toml::file(path))
                });
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) =
                self.load_format_files(figment, &search_paths, &["yaml", "yml"], |fig, path| {
                    fig.merge(Yaml::file(path))
                });
            figment = f;
            found |= ok;
        }

        if !found {
            warn!("No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads configuration from the default locations and the environment.
pub fn load_config() -> ConfigResult<BridgeConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from one file plus the environment.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<BridgeConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(all(test, feature = "toml-config"))]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use figment::Jail;
    use onebridge_adapter_onebot::Mode;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config, BridgeConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_then_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "onebridge.toml",
                r#"
                [logging]
                level = "debug"

                [onebot]
                mode = "client"
                api_timeout_secs = 12

                [onebot.client]
                url = "ws://127.0.0.1:3001"
                "#,
            )?;
            jail.set_env("ONEBRIDGE_ONEBOT__CLIENT__URL", "ws://10.0.0.2:3001");
            jail.set_env("ONEBRIDGE_LOGGING__LEVEL", "warn");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .set("onebot.api_timeout_secs", 5)
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.onebot.mode, Mode::Client);
            assert_eq!(config.onebot.client.url, "ws://10.0.0.2:3001");
            assert_eq!(config.logging.level, LogLevel::Warn);
            assert_eq!(config.onebot.api_timeout_secs, 5);
            // Untouched fields keep their defaults.
            assert_eq!(config.onebot.retry_interval_secs, 30);
            Ok(())
        });
    }

    #[test]
    fn test_profile_file_is_overridden_by_base_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "onebridge.production.toml",
                "[onebot.server]\nport = 9000\npath = \"/prod\"\n",
            )?;
            jail.create_file("onebridge.toml", "[onebot.server]\nport = 8081\n")?;

            let config = ConfigLoader::new()
                .profile("prod")
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.onebot.server.port, 8081);
            assert_eq!(config.onebot.server.path, "/prod");
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_must_exist() {
        Jail::expect_with(|jail| {
            let missing = jail.directory().join("missing.toml");
            let result = ConfigLoader::new().file(&missing).without_env().load();
            assert!(matches!(result, Err(ConfigError::FileNotFound(path)) if path == missing));
            Ok(())
        });
    }

    #[test]
    fn test_unknown_mode_is_a_parse_error() {
        Jail::expect_with(|jail| {
            jail.create_file("onebridge.toml", "[onebot]\nmode = \"http\"\n")?;
            let result = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load();
            assert!(matches!(result, Err(ConfigError::ParseError(_))));
            Ok(())
        });
    }

    #[test]
    fn test_profile_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env(PROFILE_VAR, "production");
            assert_eq!(Profile::from_env(), Profile::Production);
            jail.set_env(PROFILE_VAR, "staging");
            assert_eq!(Profile::from_env(), Profile::Custom("staging".to_string()));
            Ok(())
        });
    }
}
