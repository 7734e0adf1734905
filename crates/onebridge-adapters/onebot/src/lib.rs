//! # OneBridge Adapter for OneBot v11
//!
//! Bridges onebridge triggers to a OneBot v11 implementation over a single
//! WebSocket, in either direction.
//!
//! ## Overview
//!
//! - **Client mode**: dial the implementation's forward WebSocket, reconnect
//!   when the link drops
//! - **Server mode**: accept the implementation's reverse WebSocket, with an
//!   optional access token check
//! - **API calls**: `{"action", "params", "echo"}` frames matched to their
//!   replies by echo, with a per-call timeout
//! - **Events**: routed to triggers by `post_type` category
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use onebridge_adapter_onebot::{OneBotAdapter, OneBotConfig, Target};
//! use onebridge_core::{EventCategory, trigger_fn};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let adapter = OneBotAdapter::builder()
//!         .config(OneBotConfig::default())
//!         .on(EventCategory::Request, trigger_fn(|event, _bot| async move {
//!             tracing::info!(request = %event.raw(), "request received");
//!             Ok(())
//!         }))
//!         .build();
//!
//!     adapter.start().await?;
//!     adapter.stopped().await.into_result()?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod cq;
pub mod manager;
pub mod sender;
pub mod session;

pub use adapter::{OneBotAdapter, OneBotAdapterBuilder};
pub use config::{ClientConfig, Mode, OneBotConfig, ServerConfig};
pub use cq::{Segment, encode_segments, escape_cq_text, escape_cq_value};
pub use manager::{ConnectionManager, LinkState, ManagerState, StopReason};
pub use sender::{MessageSender, Target};
pub use session::{LoopExit, Session, SessionState};
