//! Message send helpers.
//!
//! Every helper spawns its call and returns the [`JoinHandle`], so triggers
//! can fire and forget without blocking the receive loop that will read the
//! reply.
//!
//! ```rust,ignore
//! let sender = MessageSender::new(bot, Target::Group(123456));
//! sender.text("hello");
//! let sent = sender.image("https://example.com/cat.png").await??;
//! sender.recall(sent["message_id"].as_i64().unwrap_or_default());
//! ```

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::debug;

use onebridge_core::{ApiResult, BoxedBot};

use crate::cq::{Segment, encode_segments, escape_cq_text};

/// Where a message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A private chat with a user.
    User(i64),
    /// A group chat.
    Group(i64),
}

impl Target {
    /// The OneBot `message_type` for this target.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::User(_) => "private",
            Self::Group(_) => "group",
        }
    }

    /// `send_msg` parameters addressing this target.
    pub fn send_params(&self, message: String) -> Value {
        match *self {
            Self::User(user_id) => json!({
                "message_type": "private",
                "user_id": user_id,
                "message": message,
            }),
            Self::Group(group_id) => json!({
                "message_type": "group",
                "group_id": group_id,
                "message": message,
            }),
        }
    }
}

/// Sends messages to one target.
#[derive(Clone)]
pub struct MessageSender {
    bot: BoxedBot,
    target: Target,
}

impl MessageSender {
    /// Creates a sender for `target`.
    pub fn new(bot: BoxedBot, target: Target) -> Self {
        Self { bot, target }
    }

    /// The target of this sender.
    pub fn target(&self) -> Target {
        self.target
    }

    /// Sends plain text. CQ special characters are escaped so the text is
    /// shown literally.
    pub fn text(&self, text: impl AsRef<str>) -> JoinHandle<ApiResult<Value>> {
        self.encoded(escape_cq_text(text.as_ref()))
    }

    /// Sends an image.
    pub fn image(&self, file: impl Into<String>) -> JoinHandle<ApiResult<Value>> {
        self.raw(&[Segment::file("image", file)])
    }

    /// Sends a voice message.
    pub fn voice(&self, file: impl Into<String>) -> JoinHandle<ApiResult<Value>> {
        self.raw(&[Segment::file("record", file)])
    }

    /// Sends a video.
    pub fn video(&self, file: impl Into<String>) -> JoinHandle<ApiResult<Value>> {
        self.raw(&[Segment::file("video", file)])
    }

    /// Sends a segment list, encoded as one CQ-code string.
    pub fn raw(&self, segments: &[Segment]) -> JoinHandle<ApiResult<Value>> {
        self.encoded(encode_segments(segments))
    }

    /// Sends an already encoded message string as is.
    pub fn encoded(&self, message: impl Into<String>) -> JoinHandle<ApiResult<Value>> {
        let bot = self.bot.clone();
        let params = self.target.send_params(message.into());
        tokio::spawn(async move { bot.call_api("send_msg", params).await })
    }

    /// Recalls a sent message.
    pub fn recall(&self, message_id: i64) -> JoinHandle<ApiResult<Value>> {
        let bot = self.bot.clone();
        tokio::spawn(async move {
            bot.call_api("delete_msg", json!({ "message_id": message_id }))
                .await
        })
    }

    /// Replaces a message: recalls it, then sends `new_text`.
    ///
    /// The new text is only sent if the recall succeeded.
    pub fn edit(&self, message_id: i64, new_text: impl AsRef<str>) -> JoinHandle<ApiResult<Value>> {
        let bot = self.bot.clone();
        let params = self.target.send_params(escape_cq_text(new_text.as_ref()));
        tokio::spawn(async move {
            bot.call_api("delete_msg", json!({ "message_id": message_id }))
                .await?;
            bot.call_api("send_msg", params).await
        })
    }

    /// Sends the same text to many targets, one spawned call each.
    ///
    /// Not transactional: each handle reports its own outcome.
    pub fn batch(
        bot: &BoxedBot,
        targets: impl IntoIterator<Item = Target>,
        text: impl AsRef<str>,
    ) -> Vec<JoinHandle<ApiResult<Value>>> {
        let handles: Vec<_> = targets
            .into_iter()
            .map(|target| MessageSender::new(bot.clone(), target).text(text.as_ref()))
            .collect();
        debug!(count = handles.len(), "Spawned batch send");
        handles
    }
}

impl std::fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSender")
            .field("bot", &self.bot.id())
            .field("target", &self.target)
            .finish()
    }
}
