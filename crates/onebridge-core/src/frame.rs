//! Inbound frame classification.
//!
//! Every text frame received from the remote side is one of three disjoint
//! shapes:
//!
//! ```text
//! {"status": "failed", "retcode": 1403, ...}  -> InboundFrame::AuthFailure
//! {"echo": "17", "data": {...}, ...}          -> InboundFrame::Reply
//! {"post_type": "message", ...}               -> InboundFrame::Event
//! ```
//!
//! Anything else is a [`FrameError`] and is dropped by the receive loop.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult, FrameError};

/// Return codes the remote uses to report a rejected access token.
pub const AUTH_FAILURE_RETCODES: [i64; 2] = [1401, 1403];

// =============================================================================
// Event Category
// =============================================================================

/// Internal event category, derived from a frame's `post_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Chat messages.
    Message,
    /// Group/friend notices.
    Notice,
    /// Friend and group join requests.
    Request,
    /// Lifecycle and heartbeat events.
    MetaEvent,
    /// Any `post_type` outside the table above.
    Unknown,
}

impl EventCategory {
    /// All categories, in table order.
    pub const ALL: [EventCategory; 5] = [
        Self::Message,
        Self::Notice,
        Self::Request,
        Self::MetaEvent,
        Self::Unknown,
    ];

    /// Maps a wire `post_type` onto a category.
    pub fn from_post_type(post_type: &str) -> Self {
        match post_type {
            "message" => Self::Message,
            "notice" => Self::Notice,
            "request" => Self::Request,
            "meta_event" => Self::MetaEvent,
            _ => Self::Unknown,
        }
    }

    /// Returns the category name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Notice => "notice",
            Self::Request => "request",
            Self::MetaEvent => "meta_event",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Reply Frame
// =============================================================================

/// A reply to an earlier outbound call, matched by its `echo`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyFrame {
    /// Correlation id, normalized to a string.
    pub echo: String,
    /// `"ok"`, `"async"` or `"failed"` when present.
    pub status: Option<String>,
    /// Protocol return code; `0` on success.
    pub retcode: Option<i64>,
    /// Human-readable failure description.
    pub message: Option<String>,
    /// Result payload; `Null` when absent.
    pub data: Value,
}

impl ReplyFrame {
    /// Builds a successful reply carrying `data`.
    pub fn ok(echo: impl Into<String>, data: Value) -> Self {
        Self {
            echo: echo.into(),
            status: Some("ok".to_string()),
            retcode: Some(0),
            message: None,
            data,
        }
    }

    fn from_object(echo: String, object: &mut Map<String, Value>) -> Self {
        Self {
            echo,
            status: object
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string),
            retcode: object.get("retcode").and_then(Value::as_i64),
            message: failure_message(object),
            data: object.remove("data").unwrap_or(Value::Null),
        }
    }

    /// Whether the remote reported this call as failed.
    pub fn is_failed(&self) -> bool {
        self.status.as_deref() == Some("failed") || self.retcode.is_some_and(|code| code != 0)
    }

    /// Converts the reply into the caller-facing result.
    pub fn into_result(self) -> ApiResult<Value> {
        if self.is_failed() {
            return Err(ApiError::ApiFailed {
                retcode: self.retcode.unwrap_or(-1),
                message: self
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            });
        }
        Ok(self.data)
    }
}

// =============================================================================
// Event Frame
// =============================================================================

/// A protocol event, passed to triggers as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    category: EventCategory,
    raw: Value,
}

impl EventFrame {
    /// Wraps a raw event object, deriving its category from `post_type`.
    pub fn new(raw: Value) -> Self {
        let category = raw
            .get("post_type")
            .and_then(Value::as_str)
            .map_or(EventCategory::Unknown, EventCategory::from_post_type);
        Self { category, raw }
    }

    /// The mapped internal category.
    pub fn category(&self) -> EventCategory {
        self.category
    }

    /// The wire `post_type`, if it is a string.
    pub fn post_type(&self) -> Option<&str> {
        self.raw.get("post_type").and_then(Value::as_str)
    }

    /// Looks up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    /// Looks up a top-level string field.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Looks up a top-level integer field.
    pub fn i64_field(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// The bot account the event was delivered to.
    pub fn self_id(&self) -> Option<i64> {
        self.i64_field("self_id")
    }

    /// The full event object.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Consumes the frame, returning the event object.
    pub fn into_raw(self) -> Value {
        self.raw
    }
}

// =============================================================================
// Inbound Frame
// =============================================================================

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// The remote rejected our credentials; the adapter must stop.
    AuthFailure { retcode: i64, message: String },
    /// A reply carrying a correlation id.
    Reply(ReplyFrame),
    /// An event carrying a `post_type`.
    Event(EventFrame),
}

impl InboundFrame {
    /// Parses and classifies a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Classifies an already decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        let Value::Object(mut object) = value else {
            return Err(FrameError::Unrecognized);
        };

        if is_auth_failure(&object) {
            return Ok(Self::AuthFailure {
                retcode: object.get("retcode").and_then(Value::as_i64).unwrap_or(-1),
                message: failure_message(&object).unwrap_or_default(),
            });
        }

        if let Some(echo) = object.get("echo").and_then(echo_to_string) {
            return Ok(Self::Reply(ReplyFrame::from_object(echo, &mut object)));
        }

        if object.contains_key("post_type") {
            return Ok(Self::Event(EventFrame::new(Value::Object(object))));
        }

        Err(FrameError::Unrecognized)
    }
}

fn is_auth_failure(object: &Map<String, Value>) -> bool {
    let failed = object.get("status").and_then(Value::as_str) == Some("failed");
    let retcode = object.get("retcode").and_then(Value::as_i64);
    failed && retcode.is_some_and(|code| AUTH_FAILURE_RETCODES.contains(&code))
}

/// Echo ids are sent as strings but some implementations echo numbers back.
fn echo_to_string(echo: &Value) -> Option<String> {
    match echo {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn failure_message(object: &Map<String, Value>) -> Option<String> {
    ["message", "wording", "msg"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
