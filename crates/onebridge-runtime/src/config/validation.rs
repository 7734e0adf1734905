//! Configuration validation utilities.

use onebridge_adapter_onebot::{Mode, OneBotConfig};

use super::error::{ConfigError, ConfigResult};
use super::schema::{BridgeConfig, LoggingConfig};

const VALID_LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Validates the entire configuration.
pub fn validate_config(config: &BridgeConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_onebot_config(&config.onebot)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    for (module, level) in &logging.filters {
        if module.is_empty() {
            return Err(ConfigError::validation("Log filter module cannot be empty"));
        }
        if !VALID_LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
            return Err(ConfigError::validation(format!(
                "Invalid log level for {module}: {level}. Valid values are: {VALID_LOG_LEVELS:?}"
            )));
        }
    }
    Ok(())
}

fn validate_onebot_config(onebot: &OneBotConfig) -> ConfigResult<()> {
    if onebot.api_timeout_secs == 0 {
        return Err(ConfigError::validation("API timeout must be greater than 0"));
    }
    if onebot.retry_interval_secs == 0 {
        return Err(ConfigError::validation(
            "Retry interval must be greater than 0",
        ));
    }

    match onebot.mode {
        Mode::Client => validate_ws_url(&onebot.client.url),
        Mode::Server => validate_path(&onebot.server.path),
    }
}

fn validate_ws_url(url: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("onebot.client.url"));
    }

    let valid_schemes = ["ws://", "wss://"];
    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {valid_schemes:?}"),
        ));
    }
    Ok(())
}

fn validate_path(path: &str) -> ConfigResult<()> {
    if !path.starts_with('/') {
        return Err(ConfigError::validation("Server path must start with '/'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_config(url: &str) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.onebot.mode = Mode::Client;
        config.onebot.client.url = url.to_string();
        config
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&BridgeConfig::default()).is_ok());
    }

    #[test]
    fn test_client_url_scheme() {
        assert!(validate_config(&client_config("ws://127.0.0.1:3001")).is_ok());
        assert!(validate_config(&client_config("wss://bot.example.com/ws")).is_ok());
        assert!(matches!(
            validate_config(&client_config("http://127.0.0.1:3001")),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            validate_config(&client_config("")),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_zero_durations_rejected() {
        let mut config = BridgeConfig::default();
        config.onebot.api_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = BridgeConfig::default();
        config.onebot.retry_interval_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_filter_levels() {
        let mut config = BridgeConfig::default();
        config
            .logging
            .filters
            .insert("onebridge_transport".to_string(), "DEBUG".to_string());
        assert!(validate_config(&config).is_ok());

        config
            .logging
            .filters
            .insert("axum".to_string(), "loud".to_string());
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_server_path_needs_leading_slash() {
        let mut config = BridgeConfig::default();
        config.onebot.server.path = "ws".to_string();
        assert!(validate_config(&config).is_err());
    }
}
