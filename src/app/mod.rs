//! Core application wiring
//!
//! `App` builds the stores, API client and model clients from the
//! configuration and hands out `StreamingChat`s bound to them.

mod events;

pub use events::*;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::{
    api::ApiClient,
    auth::{ScopedCredentials, SqliteCredentialStore},
    config::{Config, StoreKind},
    llm::{
        openai::OpenAiCompatibleClient,
        status::{ModelInfo, ModelStatusClient, ModelStatusPoller},
        ChatError, ClientOptions, CompletionClient,
    },
    session::{
        ChatOptions, Database, ModelTarget, RemoteSessionStore, Session, SessionManager, SessionStore,
        SqliteSessionStore, StreamingChat,
    },
};

/// Credential scope used when none is configured
pub const DEFAULT_TAB_KEY: &str = "tab_default";

/// Main application structure
pub struct App {
    config: Config,
    database: Arc<Database>,
    api: Arc<ApiClient>,
    session_manager: Arc<SessionManager>,
    completion: Arc<dyn CompletionClient>,
    model_status: Arc<ModelStatusClient>,
    event_tx: mpsc::UnboundedSender<AppEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<AppEvent>>>,
}

impl App {
    /// Create a new application instance
    pub async fn new(config: Config) -> Result<Self> {
        debug!("Creating new App instance");

        let database = Arc::new(
            Database::new(config.database_path())
                .await
                .with_context(|| format!("Failed to open {}", config.database_path().display()))?,
        );

        let tab_key = config.tab_key.clone().unwrap_or_else(|| DEFAULT_TAB_KEY.to_string());
        let credentials = ScopedCredentials::new(Arc::new(SqliteCredentialStore::new(database.clone())), tab_key);
        Self::with_parts(config, database, credentials)
    }

    /// Build the application around an already opened database and a
    /// credential scope
    pub fn with_parts(config: Config, database: Arc<Database>, credentials: ScopedCredentials) -> Result<Self> {
        let api = Arc::new(ApiClient::new(
            config.api_base_url.clone(),
            credentials,
            config.request_timeout,
        )?);

        let store: Arc<dyn SessionStore> = match config.store {
            StoreKind::Remote => Arc::new(RemoteSessionStore::new(api.clone())),
            StoreKind::Local => Arc::new(SqliteSessionStore::new(database.clone())),
        };
        info!("Using {:?} session store", config.store);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let session_manager = Arc::new(SessionManager::new(store, Some(event_tx.clone())));

        let completion: Arc<dyn CompletionClient> = Arc::new(OpenAiCompatibleClient::new(ClientOptions::default())?);
        let model_status = Arc::new(
            ModelStatusClient::new(config.model_service_url.clone(), config.models.clone())
                .context("Failed to create model status client")?,
        );

        Ok(App {
            config,
            database,
            api,
            session_manager,
            completion,
            model_status,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    /// Get the session manager
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    /// Take the receiving end of the event channel; only the first caller
    /// gets it
    pub async fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<AppEvent>> {
        self.event_rx.lock().await.take()
    }

    /// The usage agreement, when this tab has not accepted its current text
    pub async fn pending_agreement(&self) -> Result<Option<String>> {
        let content = self.api.agreement().await.context("Failed to fetch the usage agreement")?;
        if content.trim().is_empty() {
            return Ok(None);
        }

        let accepted = self.database.accepted_agreement(self.api.credentials().key()).await?;
        if accepted.as_deref() == Some(content.as_str()) {
            return Ok(None);
        }
        Ok(Some(content))
    }

    /// Record that this tab accepted `content`
    pub async fn accept_agreement(&self, content: &str) -> Result<()> {
        let key = self.api.credentials().key();
        self.database.accept_agreement(key, content).await?;
        info!("Usage agreement accepted for {}", key);
        Ok(())
    }

    /// Current status of every configured model
    pub async fn model_status(&self) -> Result<Vec<ModelInfo>> {
        self.model_status
            .fetch()
            .await
            .with_context(|| format!("Failed to reach model status service at {}", self.config.model_service_url))
    }

    /// Keep model status fresh in the background
    pub fn watch_models(&self) -> ModelStatusPoller {
        ModelStatusPoller::spawn(self.model_status.clone(), self.config.status_poll_interval)
    }

    /// Find where `model` is served right now
    pub async fn resolve_target(&self, model: &str) -> Result<ModelTarget> {
        if !self.config.models.iter().any(|m| m == model) {
            anyhow::bail!(
                "Unknown model '{}'; configured models are {}",
                model,
                self.config.models.join(", ")
            );
        }

        let models = self.model_status().await?;
        let endpoint = models
            .into_iter()
            .find(|info| info.name == model && info.running)
            .and_then(|info| info.api)
            .ok_or_else(|| ChatError::NoEndpoint(model.to_string()))?;

        debug!("Model {} is served at {}", model, endpoint);
        Ok(ModelTarget {
            model: model.to_string(),
            endpoint,
        })
    }

    /// Start a chat on `session`; stored snapshots flow back into the
    /// session manager
    pub fn start_chat(&self, session: &Session) -> StreamingChat {
        let options = ChatOptions {
            temperature: self.config.temperature,
            persist: self.config.persist_policy(),
            events: Some(self.event_tx.clone()),
            saved: Some(self.session_manager.track_saves()),
        };
        StreamingChat::new(session, self.completion.clone(), self.session_manager.store(), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    async fn local_app(server: &MockServer) -> (TempDir, App) {
        let dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            store: StoreKind::Local,
            api_base_url: server.uri(),
            model_service_url: server.uri(),
            ..Config::default()
        };
        let database = Arc::new(Database::new(config.database_path()).await.unwrap());
        let credentials = ScopedCredentials::new(Arc::new(MemoryCredentialStore::new()), "tab_test");
        (dir, App::with_parts(config, database, credentials).unwrap())
    }

    async fn mount_services(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/check-service"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "running": true,
                "count": 1,
                "services": [{"job_id": "77", "job_name": "QwQ", "node": "gpu-3", "api": "http://gpu-3:8000"}]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_resolve_target_uses_running_service() {
        let server = MockServer::start().await;
        mount_services(&server).await;
        let (_dir, app) = local_app(&server).await;

        let target = app.resolve_target("QwQ").await.unwrap();
        assert_eq!(target.endpoint, "http://gpu-3:8000");

        let err = app.resolve_target("DS-R1").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ChatError>(), Some(ChatError::NoEndpoint(_))));

        assert!(app.resolve_target("GPT-9").await.is_err());
    }

    #[tokio::test]
    async fn test_local_store_and_events_are_wired() {
        let server = MockServer::start().await;
        let (_dir, app) = local_app(&server).await;
        let mut events = app.take_event_receiver().await.unwrap();
        assert!(app.take_event_receiver().await.is_none());

        let session = app.session_manager().ensure_current().await.unwrap();
        let listed = app.session_manager().refresh().await.unwrap();
        assert_eq!(listed[0].id, session.id);

        let chat = app.start_chat(&session);
        assert_eq!(chat.session_id(), session.id);
        assert_eq!(
            events.recv().await,
            Some(AppEvent::SessionCreated { session_id: session.id })
        );
    }

    #[tokio::test]
    async fn test_agreement_pending_until_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agreement"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": "No abuse."})))
            .mount(&server)
            .await;
        let (_dir, app) = local_app(&server).await;

        let pending = app.pending_agreement().await.unwrap();
        assert_eq!(pending.as_deref(), Some("No abuse."));

        app.accept_agreement("No abuse.").await.unwrap();
        assert_eq!(app.pending_agreement().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_changed_agreement_needs_new_acceptance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agreement"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": "Revised terms"})))
            .mount(&server)
            .await;
        let (_dir, app) = local_app(&server).await;

        app.accept_agreement("Original terms").await.unwrap();
        assert_eq!(app.pending_agreement().await.unwrap().as_deref(), Some("Revised terms"));
    }
}
