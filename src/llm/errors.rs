//! Error types for streaming chat exchanges

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("a response is already in progress for this session")]
    Busy,

    #[error("transport error{}: {message}", http_status_suffix(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("no model endpoint available: {0}")]
    NoEndpoint(String),
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        ChatError::Transport {
            status: None,
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        ChatError::Transport {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

fn http_status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_display_includes_status() {
        let err = ChatError::status(502, "bad gateway");
        assert_eq!(err.to_string(), "transport error (HTTP 502): bad gateway");

        let err = ChatError::transport("connection reset");
        assert_eq!(err.to_string(), "transport error: connection reset");
    }
}
