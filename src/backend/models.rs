//! Wire types for the chat backend endpoints

use crate::chat::Thread;
use serde::{Deserialize, Deserializer, Serialize};

/// A conversation turn as stored by the backend, before normalization.
///
/// The backend's agent framework persists turns as `{type, content}` while
/// the chat API uses `{role, content}`; both are accepted. `content` may be a
/// plain string or a list of content parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(alias = "type")]
    pub role: String,
    #[serde(default, deserialize_with = "content_as_text")]
    pub content: String,
}

impl RawMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

fn content_as_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_to_text(&value))
}

fn value_to_text(value: &serde_json::Value) -> String {
    use serde_json::Value;
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::Object(map) => map
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| part.to_string()),
                other => value_to_text(other),
            })
            .collect::<Vec<_>>()
            .join(""),
        other => other.to_string(),
    }
}

/// `POST /threads` body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateThreadBody<'a> {
    pub title: &'a str,
    pub assistant_type: &'a str,
}

/// `PATCH /threads` body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RenameThreadBody<'a> {
    pub thread_id: &'a str,
    pub title: &'a str,
}

/// `DELETE /threads` body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteThreadBody<'a> {
    pub thread_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ThreadEnvelope {
    pub thread: Thread,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ThreadListEnvelope {
    #[serde(default)]
    pub threads: Vec<Thread>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageListEnvelope {
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_message_accepts_type_alias() {
        let m: RawMessage = serde_json::from_value(json!({"type": "ai", "content": "Hi"})).unwrap();
        assert_eq!(m, RawMessage::new("ai", "Hi"));
    }

    #[test]
    fn test_raw_message_content_parts() {
        let m: RawMessage = serde_json::from_value(json!({
            "role": "assistant",
            "content": [{"type": "text", "text": "Hello "}, {"type": "text", "text": "there"}]
        }))
        .unwrap();
        assert_eq!(m.content, "Hello there");
    }

    #[test]
    fn test_raw_message_missing_or_null_content() {
        let m: RawMessage = serde_json::from_value(json!({"role": "user"})).unwrap();
        assert_eq!(m.content, "");
        let m: RawMessage =
            serde_json::from_value(json!({"role": "user", "content": null})).unwrap();
        assert_eq!(m.content, "");
    }

    #[test]
    fn test_raw_message_object_content_kept_as_json() {
        let m: RawMessage = serde_json::from_value(json!({
            "role": "ai",
            "content": {"pageContent": "chunk"}
        }))
        .unwrap();
        assert_eq!(m.content, r#"{"pageContent":"chunk"}"#);
    }

    #[test]
    fn test_message_list_envelope_ignores_extra_fields() {
        let env: MessageListEnvelope = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "Hello", "id": 7, "created_at": "x"}]
        }))
        .unwrap();
        assert_eq!(env.messages.len(), 1);
    }
}
