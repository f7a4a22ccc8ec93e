//! Chat session model

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::llm::ChatMessage;

/// Identifier assigned by the session store
pub type SessionId = i64;

/// Title given to sessions created implicitly by the first message
pub const DEFAULT_TITLE: &str = "New chat";

/// A stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    #[serde(default, deserialize_with = "title_or_default")]
    pub title: String,
    #[serde(default, deserialize_with = "messages_or_empty")]
    pub messages: Vec<ChatMessage>,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Most recent activity, used to order session lists
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }
}

/// Payload for creating a session
#[derive(Debug, Clone, Serialize)]
pub struct NewSession {
    pub title: String,
    pub messages: Vec<ChatMessage>,
}

impl NewSession {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            messages: Vec::new(),
        }
    }
}

impl Default for NewSession {
    fn default() -> Self {
        Self::titled(DEFAULT_TITLE)
    }
}

/// Partial update; absent fields are left untouched by the store
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            updated_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages: Some(messages),
            updated_at: Some(Utc::now()),
            ..Default::default()
        }
    }
}

fn title_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let title = Option::<String>::deserialize(deserializer)?;
    Ok(title.filter(|t| !t.is_empty()).unwrap_or_else(|| DEFAULT_TITLE.to_string()))
}

fn messages_or_empty<'de, D>(deserializer: D) -> Result<Vec<ChatMessage>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ChatMessage>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Timestamps arrive either as RFC 3339 or as the backend's naive
/// `YYYY-MM-DD HH:MM:SS.ffffff`; naive values are taken as UTC. Anything
/// unparseable reads as absent rather than failing the whole session.
pub mod timestamp {
    use super::*;
    use serde::Serializer;

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(time) => serializer.serialize_str(&time.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(|v| v.as_str()).and_then(parse))
    }
}
