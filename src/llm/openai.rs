//! OpenAI-compatible streaming completion client

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE},
    Client,
};
use tracing::debug;

use crate::llm::{
    errors::{ChatError, ChatResult},
    provider::{utils, ByteStream, ClientOptions, CompletionClient},
    types::CompletionRequest,
};

const COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Client for `/v1/chat/completions` on self-hosted model services
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
}

impl OpenAiCompatibleClient {
    /// Create a new client.
    ///
    /// Only the connect phase is bounded; a stream may run as long as the
    /// server keeps it open.
    pub fn new(options: ClientOptions) -> ChatResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(options.connect_timeout)
            .user_agent(&options.user_agent)
            .build()
            .map_err(|e| ChatError::transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleClient {
    async fn open_stream(&self, endpoint: &str, request: &CompletionRequest) -> ChatResult<ByteStream> {
        let url = utils::join_url(endpoint, COMPLETIONS_PATH);
        debug!("Opening completion stream at {} ({} messages)", url, request.messages.len());

        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_msg = utils::extract_error_message(response).await;
            return Err(ChatError::status(status, error_msg));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::from));

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn request() -> CompletionRequest {
        CompletionRequest::streaming("QwQ", &[ChatMessage::user("hi")], 0.7)
    }

    #[tokio::test]
    async fn test_streams_body_bytes() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"hey\"}}]}\n\ndata: [DONE]\n";
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("accept", "text/event-stream"))
            .and(body_partial_json(serde_json::json!({
                "model": "QwQ",
                "stream": true,
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = OpenAiCompatibleClient::new(ClientOptions::default()).unwrap();
        let mut stream = client.open_stream(&server.uri(), &request()).await.unwrap();

        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(String::from_utf8(received).unwrap(), body);
    }

    #[tokio::test]
    async fn test_non_success_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(serde_json::json!({"error": {"message": "loading"}})),
            )
            .mount(&server)
            .await;

        let client = OpenAiCompatibleClient::new(ClientOptions::default()).unwrap();
        match client.open_stream(&server.uri(), &request()).await {
            Err(ChatError::Transport { status, message }) => {
                assert_eq!(status, Some(503));
                assert!(message.contains("loading"));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an error"),
        }
    }
}
