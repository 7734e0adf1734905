//! Configuration module for the onebridge runtime.
//!
//! Layered loading (defaults, file, environment, overrides) and validation
//! of the logging and OneBot adapter settings.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BridgeConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, SpanEventConfig,
};
pub use validation::validate_config;
