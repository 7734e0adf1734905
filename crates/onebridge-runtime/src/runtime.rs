//! Process-level orchestration: configuration, logging, adapter lifecycle
//! and shutdown signals.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use onebridge_runtime::BridgeRuntime;
//! use onebridge_core::{EventCategory, trigger_fn};
//!
//! // Loads onebridge.toml from the working directory, then ONEBRIDGE_* vars
//! BridgeRuntime::new()?
//!     .on(EventCategory::Message, trigger_fn(|event, _bot| async move {
//!         tracing::info!(raw = %event.raw(), "message");
//!         Ok(())
//!     }))
//!     .run()
//!     .await?;
//! ```

use std::future::Future;
use std::path::Path;

use serde::Serialize;
use tokio::signal;
use tracing::{error, info};

use onebridge_adapter_onebot::{OneBotAdapter, StopReason};
use onebridge_core::{AdapterError, Categories, Trigger, TriggerRegistry};

use crate::config::{BridgeConfig, ConfigLoader, validate_config};
use crate::error::RuntimeResult;
use crate::logging;

/// Runs one OneBot adapter until Ctrl+C, SIGTERM or an adapter-initiated stop.
pub struct BridgeRuntime {
    config: BridgeConfig,
    triggers: TriggerRegistry,
}

impl BridgeRuntime {
    /// Loads and validates configuration from the default locations.
    pub fn new() -> RuntimeResult<Self> {
        Self::builder().build()
    }

    /// Creates a runtime builder for custom configuration sources.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration.
    ///
    /// Initializes logging unless a subscriber is already installed.
    pub fn from_config(config: BridgeConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            mode = %config.onebot.mode,
            "Runtime initialized from configuration"
        );

        Self {
            config,
            triggers: TriggerRegistry::new(),
        }
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Registers a trigger for one or more event categories.
    pub fn on<T>(mut self, categories: impl Into<Categories>, trigger: T) -> Self
    where
        T: Trigger + 'static,
    {
        self.triggers.register(categories, trigger);
        self
    }

    /// Number of trigger registrations, counted once per category.
    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Runs until Ctrl+C or SIGTERM, or until the adapter stops itself.
    pub async fn run(self) -> RuntimeResult<()> {
        let signals = shutdown_signal()?;
        self.run_until(signals).await
    }

    /// Runs until `shutdown` resolves, or until the adapter stops itself.
    ///
    /// A stop caused by rejected credentials is returned as
    /// [`AdapterError::AuthRejected`].
    pub async fn run_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let adapter = OneBotAdapter::builder()
            .config(self.config.onebot)
            .triggers(self.triggers)
            .build();
        tokio::pin!(shutdown);

        info!("Starting onebridge runtime");
        let started = tokio::select! {
            result = adapter.start() => result,
            _ = &mut shutdown => {
                info!("Shutdown requested during start");
                adapter.shutdown().await;
                return Ok(());
            }
        };

        let reason = match started {
            Ok(()) => {
                info!("onebridge runtime is now running. Press Ctrl+C to stop.");
                tokio::select! {
                    _ = &mut shutdown => StopReason::Requested,
                    reason = adapter.stopped() => reason,
                }
            }
            // Stopped while starting; the stop reason says why.
            Err(AdapterError::Shutdown) => adapter.stopped().await,
            Err(e) => {
                error!(error = %e, "Adapter failed to start");
                adapter.shutdown().await;
                return Err(e.into());
            }
        };

        adapter.shutdown().await;
        if let StopReason::AuthRejected { retcode, message } = &reason {
            error!(retcode, message = %message, "Stopped: authentication rejected");
        }
        reason.into_result()?;
        info!("onebridge runtime stopped");
        Ok(())
    }
}

#[cfg(unix)]
fn shutdown_signal() -> RuntimeResult<impl Future<Output = ()>> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            result = signal::ctrl_c() => on_ctrl_c(result),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> RuntimeResult<impl Future<Output = ()>> {
    Ok(async { on_ctrl_c(signal::ctrl_c().await) })
}

fn on_ctrl_c(result: std::io::Result<()>) {
    match result {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

/// Builder for a [`BridgeRuntime`] with custom configuration sources.
///
/// ```rust,ignore
/// let runtime = BridgeRuntime::builder()
///     .config_file("config/onebridge.yaml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Overrides one value by dotted key path.
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.config_loader = self.config_loader.set(key, value);
        self
    }

    /// Loads, validates and builds the runtime.
    pub fn build(self) -> RuntimeResult<BridgeRuntime> {
        let config = self.config_loader.load()?;
        validate_config(&config)?;
        Ok(BridgeRuntime::from_config(config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeError;
    use crate::config::ConfigError;
    use futures::SinkExt;
    use onebridge_adapter_onebot::Mode;
    use onebridge_core::{EventCategory, trigger_fn};
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    fn server_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.onebot.server.port = 0;
        config
    }

    #[test]
    fn test_trigger_count_spans_categories() {
        let runtime = BridgeRuntime::from_config(server_config())
            .on(
                EventCategory::Message,
                trigger_fn(|_event, _bot| async { Ok(()) }),
            )
            .on(
                [EventCategory::Notice, EventCategory::Request],
                trigger_fn(|_event, _bot| async { Ok(()) }),
            );
        assert_eq!(runtime.trigger_count(), 3);
    }

    #[tokio::test]
    async fn test_run_until_returns_on_request() {
        let runtime = BridgeRuntime::from_config(server_config()).on(
            EventCategory::Message,
            trigger_fn(|_event, _bot| async { Ok(()) }),
        );
        assert_eq!(runtime.trigger_count(), 1);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(runtime.run_until(async move {
            let _ = rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(());

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_auth_rejection_ends_run_with_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let frame = json!({"status": "failed", "retcode": 1401, "message": "missing token", "data": null});
            ws.send(Message::Text(frame.to_string().into())).await.unwrap();
            // Keep the peer open until the runtime hangs up.
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut config = BridgeConfig::default();
        config.onebot.mode = Mode::Client;
        config.onebot.client.url = url;

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            BridgeRuntime::from_config(config).run_until(std::future::pending()),
        )
        .await
        .unwrap();

        assert!(matches!(
            result,
            Err(RuntimeError::Adapter(AdapterError::AuthRejected { retcode: 1401, .. }))
        ));
    }

    #[test]
    fn test_builder_validates() {
        let result = BridgeRuntime::builder()
            .search_path(env!("CARGO_MANIFEST_DIR"))
            .without_env()
            .set("onebot.retry_interval_secs", 0)
            .build();
        assert!(matches!(
            result,
            Err(RuntimeError::Config(ConfigError::ValidationError { .. }))
        ));
    }
}
