//! Account endpoints: sign-in, registration, profile

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::client::{ApiClient, ApiError, ApiResult, Auth};

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub username: String,
}

/// Registration form
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl Registration {
    /// Reject incomplete forms and mismatched passwords before any request
    pub fn validate(&self) -> ApiResult<()> {
        if [&self.username, &self.email, &self.password, &self.confirm_password]
            .iter()
            .any(|field| field.trim().is_empty())
        {
            return Err(ApiError::Validation("all fields are required".to_string()));
        }
        if self.password != self.confirm_password {
            return Err(ApiError::Validation("passwords do not match".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub current_model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    message: String,
}

impl ApiClient {
    /// Sign in and store the token under this client's credential key
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<LoginResponse> {
        let body = serde_json::json!({ "username": username, "password": password });
        let response: LoginResponse = self.send(Method::POST, "/api/login", &body, Auth::None).await?;

        self.credentials().set(&response.access_token).await?;
        info!("Signed in as {}", response.username);
        Ok(response)
    }

    pub async fn register(&self, registration: &Registration) -> ApiResult<String> {
        registration.validate()?;
        let response: MessageResponse = self
            .send(Method::POST, "/api/register", registration, Auth::None)
            .await?;
        Ok(response.message)
    }

    /// Drop the stored credential; the backend keeps no session to end
    pub async fn logout(&self) -> ApiResult<()> {
        self.credentials().clear().await?;
        Ok(())
    }

    pub async fn profile(&self) -> ApiResult<UserProfile> {
        self.get("/api/user").await
    }

    pub async fn update_profile(&self, profile: &UserProfile) -> ApiResult<UserProfile> {
        if profile.username.trim().is_empty() || profile.email.trim().is_empty() {
            return Err(ApiError::Validation("username and email are required".to_string()));
        }
        self.send(Method::PUT, "/api/user", profile, Auth::Required).await
    }
}
