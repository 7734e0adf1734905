//! # onebridge
//!
//! Connects a OneBot v11 implementation to async Rust triggers over a single
//! WebSocket, in either direction.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  ws   ┌───────────────────┐      ┌──────────────────┐
//! │   OneBot     │◀─────▶│ ConnectionManager │─────▶│ TriggerRegistry  │──▶ triggers
//! │implementation│       │  Session + echo   │◀─────│  (by post_type)  │
//! └──────────────┘       │   correlation     │ call └──────────────────┘
//!                        └───────────────────┘
//! ```
//!
//! - **Runtime**: configuration, logging, signals
//! - **Adapter**: one live session, client or server mode
//! - **Triggers**: async handlers bound to event categories
//! - **Bot**: `call_api` and the send helpers built on it
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use onebridge::prelude::*;
//!
//! async fn ping(event: EventFrame, bot: BoxedBot) -> anyhow::Result<()> {
//!     if event.str_field("raw_message") == Some("/ping")
//!         && let Some(user_id) = event.i64_field("user_id")
//!     {
//!         MessageSender::new(bot, Target::User(user_id)).text("pong");
//!     }
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     BridgeRuntime::new()?
//!         .on(EventCategory::Message, trigger_fn(ping))
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: `onebridge.toml`
//! - `yaml-config`: `onebridge.yaml`
//! - `json-log`: JSON log lines

pub use onebridge_adapter_onebot as onebot;
pub use onebridge_core as core;
pub use onebridge_runtime as runtime;
pub use onebridge_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use onebridge::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use onebridge_runtime::{BridgeConfig, BridgeRuntime, LoggingBuilder, SpanEvents};

    // Triggers and events
    pub use onebridge_core::{
        BoxedTrigger, Categories, EventCategory, EventFrame, Trigger, trigger_fn,
    };

    // Bot calls
    pub use onebridge_core::{ApiError, ApiResult, Bot, BoxedBot};

    // OneBot adapter and send helpers
    pub use onebridge_adapter_onebot::{
        MessageSender, Mode, OneBotAdapter, OneBotConfig, Segment, Target,
    };
}
