//! Common types for chat transcripts and completion requests

use serde::{Deserialize, Deserializer, Serialize};

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// True for an assistant message that has not received any content yet
    pub fn is_pending_assistant(&self) -> bool {
        self.role == MessageRole::Assistant && self.content.is_empty()
    }
}

/// Wire shape accepted when reading stored transcripts.
///
/// Older rows were written as `{user, ai}` / `{text}` pairs, so role and
/// content are both optional here and resolved in `From`.
#[derive(Deserialize)]
struct StoredMessage {
    role: Option<MessageRole>,
    content: Option<String>,
    text: Option<String>,
    user: Option<serde_json::Value>,
}

impl From<StoredMessage> for ChatMessage {
    fn from(raw: StoredMessage) -> Self {
        let role = raw.role.unwrap_or(if raw.user.is_some() {
            MessageRole::User
        } else {
            MessageRole::Assistant
        });
        let content = raw
            .content
            .filter(|c| !c.is_empty())
            .or(raw.text)
            .unwrap_or_default();

        Self { role, content }
    }
}

impl<'de> Deserialize<'de> for ChatMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        StoredMessage::deserialize(deserializer).map(ChatMessage::from)
    }
}

/// An ordered conversation
pub type Transcript = Vec<ChatMessage>;

/// Body of a streaming chat completion request
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub stream: bool,
}

impl CompletionRequest {
    /// Build a streaming request carrying the whole transcript as context
    pub fn streaming(model: impl Into<String>, messages: &[ChatMessage], temperature: f32) -> Self {
        Self {
            model: model.into(),
            messages: messages.to_vec(),
            temperature,
            stream: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serializes_role_lowercase() {
        let value = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_legacy_message_shapes() {
        let user: ChatMessage = serde_json::from_value(json!({"user": "x", "text": "hello"})).unwrap();
        assert_eq!(user, ChatMessage::user("hello"));

        let bot: ChatMessage = serde_json::from_value(json!({"text": "reply"})).unwrap();
        assert_eq!(bot, ChatMessage::assistant("reply"));

        let empty: ChatMessage = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, ChatMessage::assistant(""));
    }

    #[test]
    fn test_streaming_request_body() {
        let messages = vec![ChatMessage::user("ping")];
        let request = CompletionRequest::streaming("QwQ", &messages, 0.7);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["model"], "QwQ");
        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][0]["content"], "ping");
        assert!((value["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }
}
