//! # OneBridge Core
//!
//! Protocol-level building blocks shared by every onebridge crate.
//!
//! - **Frames**: classification of inbound text into replies, events and
//!   auth failures ([`InboundFrame`])
//! - **Correlation**: echo-tagged request/reply matching ([`CallCorrelator`])
//! - **Dispatch**: category-keyed trigger lists ([`TriggerRegistry`])
//! - **Connections**: transport-neutral handles ([`ConnectionHandle`])
//! - **Auth**: token checks for inbound peers ([`TokenGuard`])
//!
//! ```text
//! ┌───────────┐  frames  ┌──────────────┐  Reply  ┌────────────────┐
//! │ Transport │─────────▶│ InboundFrame │────────▶│ CallCorrelator │
//! └───────────┘          └──────────────┘         └────────────────┘
//!                               │ Event
//!                               ▼
//!                       ┌─────────────────┐
//!                       │ TriggerRegistry │──▶ Trigger, Trigger, ...
//!                       └─────────────────┘
//! ```

pub mod bot;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod frame;
pub mod guard;
pub mod trigger;

pub use bot::{Bot, BoxedBot};
pub use connection::{Connection, ConnectionHandle, ConnectionInfo, FrameStream};
pub use correlator::{CallCorrelator, PendingReply};
pub use error::{
    AdapterError, AdapterResult, ApiError, ApiResult, FrameError, TransportError,
    TransportResult,
};
pub use frame::{AUTH_FAILURE_RETCODES, EventCategory, EventFrame, InboundFrame, ReplyFrame};
pub use guard::{TokenGuard, presented_token};
pub use trigger::{BoxedTrigger, Categories, FnTrigger, Trigger, TriggerRegistry, trigger_fn};
