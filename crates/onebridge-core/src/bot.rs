//! Bot trait.
//!
//! A [`Bot`] is anything that can carry outbound calls to the remote side:
//! a single live session, or the adapter handle that routes to whichever
//! session is current.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiResult;

/// Outbound side of a connection, as seen by triggers and send helpers.
#[async_trait]
pub trait Bot: Send + Sync {
    /// Identifier used in logs.
    fn id(&self) -> &str;

    /// Calls a protocol action and waits for its reply payload.
    async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value>;

    /// Writes an already serialized text frame.
    async fn send_raw(&self, frame: String) -> ApiResult<()>;
}

/// Shared, type-erased bot.
pub type BoxedBot = Arc<dyn Bot>;
