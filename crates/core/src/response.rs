//! Normalized response documents returned to callers.

use serde::{Deserialize, Serialize};

/// One participant's answer for a turn.
///
/// Every field is optional and serialized only when present, so a
/// participant that produced no citations or intent yields a minimal body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(
        rename = "assistant-id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub assistant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ResponseItem {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_assistant(mut self, assistant_id: impl Into<String>) -> Self {
        self.assistant_id = Some(assistant_id.into());
        self
    }

    /// True when the participant produced non-empty message text.
    pub fn has_answer(&self) -> bool {
        self.message.as_deref().is_some_and(|m| !m.trim().is_empty())
    }
}

/// A source reference attached to a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "content", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,

    #[serde(
        rename = "replace_part",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub replace_part: Option<String>,
}

impl Citation {
    /// Build a citation from a loosely-shaped backend document.
    ///
    /// Each field degrades independently; `url` falls back to `filepath`
    /// and `id` falls back to `chunk_id`.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let text = |key: &str| value.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let num = |key: &str| value.get(key).and_then(|v| v.as_u64());
        Self {
            id: text("id").or_else(|| text("chunk_id")),
            text: text("content"),
            url: text("url").or_else(|| text("filepath")),
            title: text("title"),
            start: num("start"),
            end: num("end"),
            replace_part: text("replace_part"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_item_uses_wire_keys() {
        let item = ResponseItem::message("hello").with_assistant("interpreter");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value, json!({"assistant-id": "interpreter", "message": "hello"}));
    }

    #[test]
    fn citation_falls_back_to_filepath() {
        let c = Citation::from_value(&json!({
            "content": "Shampoo A is gentle",
            "filepath": "products/a.md",
            "chunk_id": "3"
        }));
        assert_eq!(c.url.as_deref(), Some("products/a.md"));
        assert_eq!(c.id.as_deref(), Some("3"));
        assert!(c.title.is_none());
        let value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["content"], "Shampoo A is gentle");
        assert!(value.get("title").is_none());
    }

    #[test]
    fn blank_message_is_not_an_answer() {
        assert!(!ResponseItem::message("  ").has_answer());
        assert!(!ResponseItem::default().has_answer());
        assert!(ResponseItem::message("yes").has_answer());
    }
}
