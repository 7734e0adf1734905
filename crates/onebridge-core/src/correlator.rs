//! Echo-based call correlation.
//!
//! Every outbound call is tagged with a numeric echo drawn from a counter.
//! The matching reply arrives later on the shared receive loop and is routed
//! to the waiting caller through a one-shot slot:
//!
//! ```text
//! register("send_msg") ──▶ pending["17"] = slot ──▶ {"echo": "17", ...} sent
//!                                                        │
//! resolve("17", reply) ◀── {"echo": "17", "data": ...} ◀─┘
//! ```
//!
//! A [`PendingReply`] removes its own entry when dropped, so a call that
//! times out, fails to send, or is cancelled never leaves a slot behind.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{ApiError, ApiResult};
use crate::frame::ReplyFrame;

type Slot = oneshot::Sender<ApiResult<ReplyFrame>>;

struct PendingCall {
    action: String,
    created_at: Instant,
    slot: Slot,
}

/// Maps echo ids to the callers waiting on them.
pub struct CallCorrelator {
    /// Monotonically increasing echo counter.
    next_echo: AtomicU64,
    /// Pending call map: echo → waiting slot.
    pending: Mutex<HashMap<String, PendingCall>>,
}

impl Default for CallCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl CallCorrelator {
    /// Creates an empty correlator.
    pub fn new() -> Self {
        Self {
            next_echo: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new pending call and returns its receiving half.
    ///
    /// The slot is inserted before the caller sends anything, so a reply can
    /// never arrive ahead of its registration.
    pub fn register(self: &Arc<Self>, action: &str) -> PendingReply {
        let echo = self.next_echo.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();

        self.pending.lock().insert(
            echo.clone(),
            PendingCall {
                action: action.to_string(),
                created_at: Instant::now(),
                slot: tx,
            },
        );
        trace!(echo = %echo, action = %action, "Registered pending call");

        PendingReply {
            echo,
            action: action.to_string(),
            rx,
            owner: Arc::clone(self),
        }
    }

    /// Delivers a reply to the caller waiting on `echo`.
    ///
    /// Returns `false` if no call with that echo is pending, either because it
    /// never existed, was already resolved, or already timed out.
    pub fn resolve(&self, echo: &str, reply: ReplyFrame) -> bool {
        let Some(call) = self.pending.lock().remove(echo) else {
            warn!(echo = %echo, "Received reply for unknown echo (timed out?)");
            return false;
        };

        debug!(
            echo = %echo,
            action = %call.action,
            elapsed = ?call.created_at.elapsed(),
            "Resolved pending call"
        );
        call.slot.send(Ok(reply)).is_ok()
    }

    /// Waits for `pending` to be resolved, giving up after `limit`.
    ///
    /// On timeout the slot is discarded, so a late reply is ignored.
    pub async fn await_result(pending: PendingReply, limit: Duration) -> ApiResult<ReplyFrame> {
        pending.wait(limit).await
    }

    /// Fails every pending call with `error` and empties the map.
    ///
    /// Returns the number of calls that were failed.
    pub fn fail_all(&self, error: ApiError) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        if count > 0 {
            debug!(count = count, error = %error, "Failing pending calls");
        }
        for (_, call) in drained {
            let _ = call.slot.send(Err(error.clone()));
        }
        count
    }

    /// Returns the number of calls still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether a call with this echo is still waiting.
    pub fn is_pending(&self, echo: &str) -> bool {
        self.pending.lock().contains_key(echo)
    }

    fn discard(&self, echo: &str) {
        if self.pending.lock().remove(echo).is_some() {
            trace!(echo = %echo, "Discarded pending call");
        }
    }
}

impl std::fmt::Debug for CallCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCorrelator")
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Receiving half of a registered call.
///
/// Dropping it removes the pending entry.
pub struct PendingReply {
    echo: String,
    action: String,
    rx: oneshot::Receiver<ApiResult<ReplyFrame>>,
    owner: Arc<CallCorrelator>,
}

impl PendingReply {
    /// The echo id to put on the outbound frame.
    pub fn echo(&self) -> &str {
        &self.echo
    }

    /// The action this call was registered for.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Waits for the reply, giving up after `limit`.
    pub async fn wait(mut self, limit: Duration) -> ApiResult<ReplyFrame> {
        match timeout(limit, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            // Slot dropped without an answer: the correlator went away.
            Ok(Err(_)) => Err(ApiError::NotConnected),
            Err(_) => {
                warn!(echo = %self.echo, action = %self.action, "API call timed out");
                Err(ApiError::Timeout {
                    action: self.action.clone(),
                })
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.owner.discard(&self.echo);
    }
}
