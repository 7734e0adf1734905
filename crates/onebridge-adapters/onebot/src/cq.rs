//! CQ code encoding.
//!
//! OneBot v11 accepts messages as a single string where non-text content is
//! embedded as `[CQ:type,key=value,...]` markers:
//!
//! - text → escaped in place
//! - `image` → `[CQ:image,file=xxx]`
//! - `record` → `[CQ:record,file=xxx]`

use std::fmt::Write;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single message segment in array form: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment type, e.g. `text`, `image`, `at`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Segment parameters.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Segment {
    /// Creates a segment with no parameters.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: Map::new(),
        }
    }

    /// Adds a parameter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// A plain text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new("text").with("text", text.into())
    }

    /// A media segment referencing `file`.
    pub fn file(kind: impl Into<String>, file: impl Into<String>) -> Self {
        Self::new(kind).with("file", file.into())
    }

    /// Encodes this segment as CQ code.
    ///
    /// Text segments become their escaped text; everything else becomes a
    /// `[CQ:...]` marker with parameters in key order.
    pub fn to_cq_code(&self) -> String {
        if self.kind == "text" {
            let text = self.data.get("text").map(value_to_string).unwrap_or_default();
            return escape_cq_text(&text);
        }

        let mut cq = format!("[CQ:{}", self.kind);
        for (key, value) in &self.data {
            let _ = write!(cq, ",{}={}", key, escape_cq_value(&value_to_string(value)));
        }
        cq.push(']');
        cq
    }
}

/// Encodes a segment list as one CQ-code string.
pub fn encode_segments(segments: &[Segment]) -> String {
    segments.iter().map(Segment::to_cq_code).collect()
}

/// Escapes CQ code special characters in plain text.
///
/// Escapes: `&` → `&amp;`, `[` → `&#91;`, `]` → `&#93;`
pub fn escape_cq_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
}

/// Escapes special characters in CQ code parameter values.
///
/// Escapes: `&` → `&amp;`, `[` → `&#91;`, `]` → `&#93;`, `,` → `&#44;`
pub fn escape_cq_value(value: &str) -> String {
    escape_cq_text(value).replace(',', "&#44;")
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_media_segment() {
        let image = Segment::file("image", "https://example.com/a.png");
        assert_eq!(image.to_cq_code(), "[CQ:image,file=https://example.com/a.png]");
    }

    #[test]
    fn test_value_escaping() {
        let seg = Segment::new("share")
            .with("url", "https://x.y/?a=1&b=2")
            .with("title", "[hi], there");
        assert_eq!(
            seg.to_cq_code(),
            "[CQ:share,title=&#91;hi&#93;&#44; there,url=https://x.y/?a=1&amp;b=2]"
        );
    }

    #[test]
    fn test_encode_mixed_segments() {
        let segments: Vec<Segment> = serde_json::from_value(json!([
            {"type": "at", "data": {"qq": 10001}},
            {"type": "text", "data": {"text": " see [this]"}},
            {"type": "face", "data": {"id": "14"}},
            {"type": "shake"}
        ]))
        .unwrap();

        assert_eq!(
            encode_segments(&segments),
            "[CQ:at,qq=10001] see &#91;this&#93;[CQ:face,id=14][CQ:shake]"
        );
    }
}
