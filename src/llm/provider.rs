//! Completion client trait and shared helpers

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{pin::Pin, time::Duration};

use crate::llm::{errors::ChatResult, types::CompletionRequest};

/// Raw response body of a streaming completion, chunked as it arrives
pub type ByteStream = Pin<Box<dyn Stream<Item = ChatResult<Bytes>> + Send>>;

/// Trait for model endpoints that stream chat completions
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Open a streaming completion against `endpoint` (the service base URL).
    ///
    /// Resolves once response headers arrive; a non-success status is an
    /// error and no body stream is returned.
    async fn open_stream(&self, endpoint: &str, request: &CompletionRequest) -> ChatResult<ByteStream>;

    /// Get the client name
    fn name(&self) -> &str;
}

/// Client options for the model endpoint
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("streamchat/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Utility functions for client implementations
pub mod utils {
    /// Join a base URL and an absolute path without doubling the slash
    pub fn join_url(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// Extract error message from HTTP response
    pub async fn extract_error_message(response: reqwest::Response) -> String {
        let status = response.status();
        match response.text().await {
            Ok(text) => {
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
                    let message = json
                        .get("error")
                        .and_then(|error| error.get("message").or(Some(error)))
                        .or_else(|| json.get("message"))
                        .and_then(|value| value.as_str());
                    if let Some(message) = message {
                        return format!("{}: {}", status, message);
                    }
                }
                format!("{}: {}", status, text)
            }
            Err(_) => format!("{}: Failed to read error response", status),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_join_url() {
            assert_eq!(join_url("http://h:1/", "/v1/x"), "http://h:1/v1/x");
            assert_eq!(join_url("http://h:1", "v1/x"), "http://h:1/v1/x");
        }
    }
}
