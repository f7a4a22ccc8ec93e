//! Usage agreement shown to new users

use reqwest::Method;
use serde::Deserialize;

use super::client::{ApiClient, ApiResult, Auth};

#[derive(Debug, Deserialize)]
struct Agreement {
    #[serde(default)]
    content: String,
}

impl ApiClient {
    /// The current agreement text; readable without signing in
    pub async fn agreement(&self) -> ApiResult<String> {
        let agreement: Agreement = self.get_with("/api/agreement", Auth::None).await?;
        Ok(agreement.content)
    }

    /// Replace the agreement text (admins only)
    pub async fn update_agreement(&self, content: &str) -> ApiResult<()> {
        let body = serde_json::json!({ "content": content });
        self.send::<_, serde_json::Value>(Method::POST, "/api/agreement", &body, Auth::Required)
            .await?;
        Ok(())
    }
}
