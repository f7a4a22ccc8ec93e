//! Application events emitted while chatting

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// Events that can occur in the application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// A new session was created
    SessionCreated { session_id: SessionId },

    /// A session was written to the store
    SessionSaved { session_id: SessionId },

    /// A session was deleted
    SessionDeleted { session_id: SessionId },

    /// A streaming response started
    StreamStarted {
        session_id: SessionId,
        message_id: String,
    },

    /// A streaming response chunk was received
    StreamChunk {
        session_id: SessionId,
        message_id: String,
        chunk: String,
    },

    /// A streaming response ended normally
    StreamEnded {
        session_id: SessionId,
        message_id: String,
    },

    /// A streaming response was cancelled; the partial reply was kept
    StreamCancelled {
        session_id: SessionId,
        message_id: String,
    },

    /// An error occurred
    Error {
        session_id: Option<SessionId>,
        error: String,
    },
}

impl AppEvent {
    /// Get the session ID associated with this event, if any
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            AppEvent::SessionCreated { session_id }
            | AppEvent::SessionSaved { session_id }
            | AppEvent::SessionDeleted { session_id }
            | AppEvent::StreamStarted { session_id, .. }
            | AppEvent::StreamChunk { session_id, .. }
            | AppEvent::StreamEnded { session_id, .. }
            | AppEvent::StreamCancelled { session_id, .. } => Some(*session_id),
            AppEvent::Error { session_id, .. } => *session_id,
        }
    }

    /// Check if this event is related to streaming
    pub fn is_streaming_event(&self) -> bool {
        matches!(
            self,
            AppEvent::StreamStarted { .. }
                | AppEvent::StreamChunk { .. }
                | AppEvent::StreamEnded { .. }
                | AppEvent::StreamCancelled { .. }
        )
    }

    /// Check if this event is an error
    pub fn is_error(&self) -> bool {
        matches!(self, AppEvent::Error { .. })
    }
}
