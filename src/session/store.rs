//! Session store abstraction

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    api::ApiError,
    session::session::{NewSession, Session, SessionId, SessionUpdate},
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("credential rejected by the session store")]
    Unauthorized,

    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("session store request failed: {0}")]
    Api(ApiError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ApiError> for StoreError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => StoreError::Unauthorized,
            other => StoreError::Api(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// CRUD over the sessions owned by the current account
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session; the store assigns its id
    async fn create(&self, session: &NewSession) -> StoreResult<Session>;

    /// Apply a partial update and return the stored session
    async fn update(&self, id: SessionId, update: &SessionUpdate) -> StoreResult<Session>;

    async fn delete(&self, id: SessionId) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Vec<Session>>;
}
