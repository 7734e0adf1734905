//! A single live connection to the OneBot implementation.
//!
//! The session owns the writing side of the socket and runs the receive
//! loop for its reading side. Replies resolve pending calls on the shared
//! correlator; events are dispatched to the shared trigger registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, error, info, trace, warn};

use onebridge_core::{
    ApiError, ApiResult, Bot, BoxedBot, CallCorrelator, ConnectionHandle, ConnectionInfo,
    EventCategory, FrameError, FrameStream, InboundFrame, TransportError, TriggerRegistry,
};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Frames flow both ways.
    Connected,
    /// Close requested; the receive loop has not finished yet.
    Closing,
    /// The receive loop has finished.
    Closed,
}

/// Why a receive loop ended.
#[derive(Debug, Clone)]
pub enum LoopExit {
    /// The frame stream ended: peer closed, or the session was closed locally.
    Closed,
    /// The transport failed.
    Errored(TransportError),
    /// The remote reported that our token was rejected.
    AuthRejected {
        /// Return code of the failure report.
        retcode: i64,
        /// Failure message of the report.
        message: String,
    },
}

/// One live connection.
pub struct Session {
    id: String,
    info: ConnectionInfo,
    handle: ConnectionHandle,
    correlator: Arc<CallCorrelator>,
    triggers: Arc<TriggerRegistry>,
    api_timeout: Duration,
    state: Mutex<SessionState>,
}

impl Session {
    /// Creates a connected session.
    pub fn new(
        handle: ConnectionHandle,
        info: ConnectionInfo,
        correlator: Arc<CallCorrelator>,
        triggers: Arc<TriggerRegistry>,
        api_timeout: Duration,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            info,
            handle,
            correlator,
            triggers,
            api_timeout,
            state: Mutex::new(SessionState::Connected),
        }
    }

    /// Peer information.
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether frames can still be sent.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Closes the connection. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if *state == SessionState::Connected {
            *state = SessionState::Closing;
            debug!(session = %self.id, "Closing session");
            self.handle.close();
        }
    }

    /// Reads frames until the stream ends, the transport fails, or the
    /// remote rejects our credentials.
    pub async fn receive_loop(self: Arc<Self>, mut frames: FrameStream) -> LoopExit {
        let bot: BoxedBot = self.clone();
        info!(
            session = %self.id,
            remote_addr = self.info.remote_addr.as_deref().unwrap_or("-"),
            protocol = %self.info.protocol,
            "Session started"
        );

        let exit = loop {
            match frames.next().await {
                Some(Ok(text)) => {
                    if let Some(exit) = self.handle_frame(&text, &bot).await {
                        break exit;
                    }
                }
                Some(Err(e)) => break LoopExit::Errored(e),
                None => break LoopExit::Closed,
            }
        };

        self.close();
        *self.state.lock() = SessionState::Closed;
        debug!(session = %self.id, exit = ?exit, "Session ended");
        exit
    }

    async fn handle_frame(&self, text: &str, bot: &BoxedBot) -> Option<LoopExit> {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(FrameError::Malformed(e)) => {
                warn!(session = %self.id, error = %e, "Dropping malformed frame");
                return None;
            }
            Err(FrameError::Unrecognized) => {
                debug!(session = %self.id, frame = %text, "Dropping unrecognized frame");
                return None;
            }
        };

        match frame {
            InboundFrame::AuthFailure { retcode, message } => {
                error!(session = %self.id, retcode, message = %message, "Access token rejected by remote");
                Some(LoopExit::AuthRejected { retcode, message })
            }
            InboundFrame::Reply(reply) => {
                let echo = reply.echo.clone();
                self.correlator.resolve(&echo, reply);
                None
            }
            InboundFrame::Event(event) => {
                let category = event.category();
                if category == EventCategory::MetaEvent {
                    trace!(session = %self.id, event = %event.raw(), "Received meta event");
                } else {
                    debug!(
                        session = %self.id,
                        category = %category,
                        post_type = event.post_type().unwrap_or("-"),
                        "Received event"
                    );
                }
                self.triggers.dispatch(category, &event, bot).await;
                None
            }
        }
    }
}

#[async_trait]
impl Bot for Session {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value> {
        if !self.is_connected() {
            return Err(ApiError::NotConnected);
        }

        let params = match params {
            Value::Null => json!({}),
            other => other,
        };
        let pending = self.correlator.register(action);
        let request = json!({
            "action": action,
            "params": params,
            "echo": pending.echo(),
        });

        trace!(session = %self.id, action = %action, echo = %pending.echo(), "Calling API");
        self.send_raw(request.to_string()).await?;

        pending.wait(self.api_timeout).await?.into_result()
    }

    async fn send_raw(&self, frame: String) -> ApiResult<()> {
        if !self.is_connected() {
            return Err(ApiError::NotConnected);
        }
        self.handle.send_text(frame).await.map_err(|e| {
            debug!(session = %self.id, error = %e, "Send failed");
            ApiError::NotConnected
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("protocol", &self.info.protocol)
            .field("state", &self.state())
            .finish()
    }
}
