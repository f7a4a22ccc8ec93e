//! Authenticated client for the backend REST API

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{auth::ScopedCredentials, llm::provider::utils};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("not signed in; run `streamchat login` first")]
    MissingCredential,

    #[error("credential was rejected by the server; signed out")]
    Unauthorized,

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Unauthorized => Some(StatusCode::UNAUTHORIZED.as_u16()),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Whether a request must carry the bearer credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Required,
    None,
}

/// Client for the backend API, bound to one credential key
pub struct ApiClient {
    client: Client,
    base_url: String,
    credentials: ScopedCredentials,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, credentials: ScopedCredentials, timeout: Duration) -> ApiResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            credentials,
        })
    }

    pub fn credentials(&self) -> &ScopedCredentials {
        &self.credentials
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, method: Method, path: &str, auth: Auth) -> ApiResult<RequestBuilder> {
        let url = utils::join_url(&self.base_url, path);
        debug!("{} {}", method, url);

        let builder = self.client.request(method, url);
        if auth == Auth::None {
            return Ok(builder);
        }

        let token = self.credentials.token().await?.ok_or(ApiError::MissingCredential)?;
        Ok(builder.bearer_auth(token))
    }

    /// Map a response to a result; a 401 on an authenticated call signs out
    async fn handle<T: DeserializeOwned>(&self, response: Response, auth: Auth) -> ApiResult<T> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED && auth == Auth::Required {
            warn!("Credential for {} rejected, signing out", self.credentials.key());
            self.credentials.clear().await?;
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            let message = utils::extract_error_message(response).await;
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<T>().await?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.get_with(path, Auth::Required).await
    }

    pub async fn get_with<T: DeserializeOwned>(&self, path: &str, auth: Auth) -> ApiResult<T> {
        let response = self.request(Method::GET, path, auth).await?.send().await?;
        self.handle(response, auth).await
    }

    pub async fn send<B, T>(&self, method: Method, path: &str, body: &B, auth: Auth) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.request(method, path, auth).await?.json(body).send().await?;
        self.handle(response, auth).await
    }

    pub async fn delete(&self, path: &str) -> ApiResult<()> {
        let response = self.request(Method::DELETE, path, Auth::Required).await?.send().await?;
        self.handle::<serde_json::Value>(response, Auth::Required).await?;
        Ok(())
    }
}
