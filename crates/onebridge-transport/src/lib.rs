//! # OneBridge Transport
//!
//! WebSocket transports for onebridge. Both sides produce the same
//! [`Connection`](onebridge_core::Connection) so the adapter does not care
//! which way the socket was opened.
//!
//! ## Features
//!
//! - `ws-client`: dial out to a OneBot implementation ([`client::connect`])
//! - `ws-server`: accept reverse connections ([`server::listen`])
//! - `full`: both
//!
//! ```text
//! ┌──────────────────────┐
//! │  onebridge-adapter   │  sessions, correlation, dispatch
//! ├──────────────────────┤
//! │  onebridge-transport │  <- this crate (socket pumps)
//! ├──────────────────────┤
//! │  WebSocket (TCP/TLS) │
//! └──────────────────────┘
//! ```

#[cfg(feature = "ws-client")]
pub mod client;

#[cfg(feature = "ws-server")]
pub mod server;

/// Capacity of the per-connection outbound queue.
pub const OUTBOUND_QUEUE: usize = 256;

/// Capacity of the per-connection inbound queue.
pub const INBOUND_QUEUE: usize = 256;

use futures::StreamExt;
use onebridge_core::{FrameStream, TransportResult};
use tokio::sync::mpsc;

/// Turns the pump's inbound channel into a [`FrameStream`].
pub(crate) fn frame_stream(rx: mpsc::Receiver<TransportResult<String>>) -> FrameStream {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    })
    .boxed()
}
