//! The OneBot adapter facade.
//!
//! # Configuration-Based Usage (Recommended)
//!
//! ```rust,ignore
//! use onebridge_adapter_onebot::{OneBotAdapter, OneBotConfig};
//! use onebridge_core::{EventCategory, trigger_fn};
//!
//! let adapter = OneBotAdapter::builder()
//!     .config(config)
//!     .on(EventCategory::Message, trigger_fn(|event, bot| async move {
//!         tracing::info!(raw = %event.raw(), "got message");
//!         Ok(())
//!     }))
//!     .build();
//!
//! adapter.start().await?;
//! adapter.send_to(Target::Group(123456)).text("online");
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

use onebridge_core::{AdapterResult, BoxedBot, BoxedTrigger, Categories, Trigger, TriggerRegistry};

use crate::config::OneBotConfig;
use crate::manager::{ConnectionManager, LinkState, ManagerState, StopReason};
use crate::sender::{MessageSender, Target};

/// The OneBot v11 adapter.
///
/// Cheap to clone; clones share one connection manager.
#[derive(Clone)]
pub struct OneBotAdapter {
    manager: Arc<ConnectionManager>,
}

impl OneBotAdapter {
    /// Creates an adapter builder.
    pub fn builder() -> OneBotAdapterBuilder {
        OneBotAdapterBuilder::default()
    }

    /// Creates an adapter with no triggers.
    pub fn from_config(config: OneBotConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Returns the adapter configuration.
    pub fn config(&self) -> &OneBotConfig {
        self.manager.config()
    }

    /// Connects or starts listening, depending on the configured mode.
    pub async fn start(&self) -> AdapterResult<()> {
        self.manager.start().await
    }

    /// Stops the adapter. Idempotent.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }

    /// Resolves once a stop has been requested, by anyone.
    pub async fn stopped(&self) -> StopReason {
        self.manager.stopped().await
    }

    /// A bot that routes calls to whichever session is current.
    pub fn bot(&self) -> BoxedBot {
        self.manager.clone()
    }

    /// A sender for `target` through the current session.
    pub fn send_to(&self, target: Target) -> MessageSender {
        MessageSender::new(self.bot(), target)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ManagerState {
        self.manager.state()
    }

    /// Subscribes to lifecycle changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ManagerState> {
        self.manager.subscribe_state()
    }

    /// Current link state.
    pub fn link_state(&self) -> LinkState {
        self.manager.link_state()
    }

    /// Subscribes to link changes.
    pub fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.manager.subscribe_link()
    }

    /// The bound listener address (server mode, after start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.manager.local_addr()
    }

    /// The underlying connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }
}

impl std::fmt::Debug for OneBotAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneBotAdapter")
            .field("manager", &self.manager)
            .finish()
    }
}

/// Builder for [`OneBotAdapter`].
#[derive(Default)]
pub struct OneBotAdapterBuilder {
    config: Option<OneBotConfig>,
    triggers: TriggerRegistry,
}

impl OneBotAdapterBuilder {
    /// Sets the configuration.
    pub fn config(mut self, config: OneBotConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Registers a trigger for one or more categories.
    pub fn on<T>(mut self, categories: impl Into<Categories>, trigger: T) -> Self
    where
        T: Trigger + 'static,
    {
        self.triggers.register(categories, trigger);
        self
    }

    /// Registers an already shared trigger.
    pub fn on_arc(mut self, categories: impl Into<Categories>, trigger: BoxedTrigger) -> Self {
        self.triggers.register_arc(categories, trigger);
        self
    }

    /// Registers every trigger of an existing registry, keeping its order.
    pub fn triggers(mut self, triggers: TriggerRegistry) -> Self {
        self.triggers = triggers;
        self
    }

    /// Freezes the trigger registry and builds the adapter.
    pub fn build(self) -> OneBotAdapter {
        let config = self.config.unwrap_or_else(|| {
            warn!("No OneBot configuration provided, using defaults");
            OneBotConfig::default()
        });
        OneBotAdapter {
            manager: Arc::new(ConnectionManager::new(config, Arc::new(self.triggers))),
        }
    }
}
