//! Session store backed by the backend REST API

use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;

use crate::{
    api::{ApiClient, ApiError, Auth},
    session::{
        session::{NewSession, Session, SessionId, SessionUpdate},
        store::{SessionStore, StoreError, StoreResult},
    },
};

const SESSIONS_PATH: &str = "/api/chat/sessions";

pub struct RemoteSessionStore {
    api: Arc<ApiClient>,
}

impl RemoteSessionStore {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    fn session_path(id: SessionId) -> String {
        format!("{}/{}", SESSIONS_PATH, id)
    }
}

fn not_found_as(id: SessionId) -> impl FnOnce(ApiError) -> StoreError {
    move |err| match err.status_code() {
        Some(404) => StoreError::NotFound(id),
        _ => StoreError::from(err),
    }
}

#[async_trait]
impl SessionStore for RemoteSessionStore {
    async fn create(&self, session: &NewSession) -> StoreResult<Session> {
        Ok(self.api.send(Method::POST, SESSIONS_PATH, session, Auth::Required).await?)
    }

    async fn update(&self, id: SessionId, update: &SessionUpdate) -> StoreResult<Session> {
        self.api
            .send(Method::PUT, &Self::session_path(id), update, Auth::Required)
            .await
            .map_err(not_found_as(id))
    }

    async fn delete(&self, id: SessionId) -> StoreResult<()> {
        self.api
            .delete(&Self::session_path(id))
            .await
            .map_err(not_found_as(id))
    }

    async fn list(&self) -> StoreResult<Vec<Session>> {
        Ok(self.api.get(SESSIONS_PATH).await?)
    }
}
