//! Model service status
//!
//! The status service lists the model services currently running. Each
//! configured model name is resolved against that list; a name that is not
//! listed is reported as not deployed.

use reqwest::Client;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use crate::llm::provider::utils;

const CHECK_SERVICE_PATH: &str = "/api/check-service";

/// Node label used for models that are not running
pub const NOT_DEPLOYED: &str = "not deployed";

/// One running service as reported by the status service
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RunningService {
    #[serde(default)]
    pub job_id: String,
    pub job_name: String,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub api: String,
}

#[derive(Debug, Deserialize)]
struct CheckServiceResponse {
    #[serde(default)]
    services: Vec<RunningService>,
}

/// Resolved state of a configured model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub api: Option<String>,
    pub node: String,
    pub running: bool,
}

impl ModelInfo {
    fn not_deployed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            api: None,
            node: NOT_DEPLOYED.to_string(),
            running: false,
        }
    }
}

/// Map configured model names onto the running services
pub fn resolve_models(names: &[String], services: &[RunningService]) -> Vec<ModelInfo> {
    names
        .iter()
        .map(|name| match services.iter().find(|s| &s.job_name == name) {
            Some(service) => ModelInfo {
                name: name.clone(),
                api: Some(service.api.clone()).filter(|api| !api.is_empty()),
                node: service.node.clone(),
                running: true,
            },
            None => ModelInfo::not_deployed(name),
        })
        .collect()
}

/// Client for the model status service
#[derive(Debug, Clone)]
pub struct ModelStatusClient {
    client: Client,
    base_url: String,
    model_names: Vec<String>,
}

impl ModelStatusClient {
    pub fn new(base_url: impl Into<String>, model_names: Vec<String>) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model_names,
        })
    }

    /// Fetch the running services and resolve every configured model
    pub async fn fetch(&self) -> reqwest::Result<Vec<ModelInfo>> {
        let url = utils::join_url(&self.base_url, CHECK_SERVICE_PATH);
        let response: CheckServiceResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("Status service reports {} running services", response.services.len());
        Ok(resolve_models(&self.model_names, &response.services))
    }

    /// Every configured model marked as not deployed
    pub fn unknown(&self) -> Vec<ModelInfo> {
        resolve_models(&self.model_names, &[])
    }
}

/// Periodically refreshes model status into a watch channel
pub struct ModelStatusPoller {
    rx: watch::Receiver<Vec<ModelInfo>>,
    handle: JoinHandle<()>,
}

impl ModelStatusPoller {
    /// Start polling; the first fetch happens immediately
    pub fn spawn(client: Arc<ModelStatusClient>, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(client.unknown());

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match client.fetch().await {
                    Ok(models) => {
                        if tx.send(models).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to fetch model status: {}", e),
                }
            }
        });

        Self { rx, handle }
    }

    /// Read-only view of the latest model status
    pub fn subscribe(&self) -> watch::Receiver<Vec<ModelInfo>> {
        self.rx.clone()
    }

    pub fn latest(&self) -> Vec<ModelInfo> {
        self.rx.borrow().clone()
    }
}

impl Drop for ModelStatusPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
