//! Configuration types for the OneBot adapter.
//!
//! Loaded under the `onebot` key of the global configuration file.
//!
//! # Example Configuration
//!
//! ```yaml
//! onebot:
//!   # Accept a reverse WebSocket from the OneBot implementation
//!   mode: server
//!   server:
//!     host: 0.0.0.0
//!     port: 8080
//!     path: /onebot/v11/ws
//!     token: s3cret
//!
//!   # Or dial out to it
//!   # mode: client
//!   # client:
//!   #   url: ws://127.0.0.1:3001
//!   #   token: secret
//!
//!   api_timeout_secs: 30
//!   retry_interval_secs: 30
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which side of the WebSocket this adapter plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Listen for a reverse connection.
    #[default]
    Server,
    /// Connect out to the implementation.
    Client,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// OneBot adapter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneBotConfig {
    /// Connection mode.
    pub mode: Mode,

    /// Settings used in server mode.
    pub server: ServerConfig,

    /// Settings used in client mode.
    pub client: ClientConfig,

    /// Seconds to wait for an API reply.
    pub api_timeout_secs: u64,

    /// Seconds between connect or bind attempts.
    pub retry_interval_secs: u64,
}

impl Default for OneBotConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            api_timeout_secs: 30,
            retry_interval_secs: 30,
        }
    }
}

impl OneBotConfig {
    /// API reply timeout.
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    /// Delay between connect or bind attempts.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// WebSocket server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (default: "127.0.0.1").
    pub host: String,

    /// Listen port (default: 8080, 0 for an ephemeral port).
    pub port: u16,

    /// WebSocket path (default: "/").
    pub path: String,

    /// Access token peers must present; empty disables the check.
    pub token: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            path: "/".to_string(),
            token: String::new(),
        }
    }
}

/// WebSocket client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL to connect to.
    pub url: String,

    /// Access token sent as a bearer header; empty sends none.
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OneBotConfig::default();
        assert_eq!(config.mode, Mode::Server);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.path, "/");
        assert!(config.server.token.is_empty());
        assert_eq!(config.api_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_deserialize_client_config() {
        let yaml = r#"
mode: client
client:
  url: ws://127.0.0.1:3001
  token: secret
api_timeout_secs: 10
"#;

        let config: OneBotConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mode, Mode::Client);
        assert_eq!(config.client.url, "ws://127.0.0.1:3001");
        assert_eq!(config.client.token, "secret");
        assert_eq!(config.api_timeout_secs, 10);
        // Untouched sections keep their defaults.
        assert_eq!(config.retry_interval_secs, 30);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_partial_server_section() {
        let yaml = r#"
server:
  port: 9000
  path: /onebot/v11/ws
"#;

        let config: OneBotConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mode, Mode::Server);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.path, "/onebot/v11/ws");
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let result: Result<OneBotConfig, _> = serde_yaml::from_str("mode: http");
        assert!(result.is_err());
    }
}
