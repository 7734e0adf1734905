//! Connection handles shared between transports and the adapter.
//!
//! A transport turns a WebSocket into a [`Connection`]: a cloneable
//! [`ConnectionHandle`] for writing and closing, plus a [`FrameStream`] of
//! inbound text frames that ends when the peer goes away or the handle is
//! closed.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::BoxStream;
use tokio::sync::{mpsc, watch};

use crate::error::{TransportError, TransportResult};

/// Inbound text frames of one connection.
pub type FrameStream = BoxStream<'static, TransportResult<String>>;

/// Information about a connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Remote address (if available).
    pub remote_addr: Option<String>,
    /// Connection protocol, e.g. `ws-client` or `ws-server`.
    pub protocol: String,
    /// Additional metadata, such as request headers.
    pub metadata: HashMap<String, String>,
}

impl ConnectionInfo {
    /// Creates new connection info.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            remote_addr: None,
            protocol: protocol.into(),
            metadata: HashMap::new(),
        }
    }

    /// Sets the remote address.
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Adds metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Writing side of a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    message_tx: mpsc::Sender<String>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    /// Creates a handle from the transport's outbound queue and close signal.
    pub fn new(message_tx: mpsc::Sender<String>, shutdown_tx: watch::Sender<bool>) -> Self {
        Self {
            message_tx,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Queues a text frame for sending.
    pub async fn send_text(&self, text: String) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed {
                reason: "connection closed locally".to_string(),
            });
        }
        self.message_tx
            .send(text)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Asks the transport to close the socket. Idempotent.
    pub fn close(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Subscribes to the close signal.
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Resolves once the connection has been closed locally.
    pub async fn closed(&self) {
        let mut rx = self.close_signal();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// A freshly established connection.
pub struct Connection {
    /// Writing side.
    pub handle: ConnectionHandle,
    /// Reading side.
    pub frames: FrameStream,
    /// Peer information.
    pub info: ConnectionInfo,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_sends() {
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, _) = watch::channel(false);
        let handle = ConnectionHandle::new(tx, shutdown_tx);

        handle.send_text("first".into()).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("first"));

        handle.close();
        handle.close();
        assert!(handle.is_closed());
        handle.closed().await;

        assert!(matches!(
            handle.send_text("second".into()).await,
            Err(TransportError::ConnectionClosed { .. })
        ));
    }
}
