use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};
use tracing::debug;

use crate::session::PersistPolicy;

const ENV_PREFIX: &str = "STREAMCHAT_";

/// Where chat sessions are stored
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// The backend REST API
    Remote,
    /// A SQLite file in the data directory
    Local,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(StoreKind::Remote),
            "local" => Ok(StoreKind::Local),
            other => Err(anyhow::anyhow!("unknown store '{}', expected 'remote' or 'local'", other)),
        }
    }
}

/// Application configuration
#[derive(Clone, Debug, Serialize)]
pub struct Config {
    /// Current working directory
    pub cwd: PathBuf,

    /// Base URL of the backend REST API
    pub api_base_url: String,

    /// Base URL of the model status service
    pub model_service_url: String,

    /// Model names offered for selection
    pub models: Vec<String>,

    pub default_model: String,

    /// Temperature for sampling
    pub temperature: f32,

    /// Data directory for the local database
    pub data_dir: PathBuf,

    pub store: StoreKind,

    /// Credential scope; generated per process when unset
    pub tab_key: Option<String>,

    #[serde(with = "duration_str")]
    pub persist_debounce: Duration,

    #[serde(with = "duration_str")]
    pub persist_max_wait: Duration,

    pub persist_retries: u32,

    #[serde(with = "duration_str")]
    pub status_poll_interval: Duration,

    /// Timeout for backend API requests
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            api_base_url: "http://localhost:50000".to_string(),
            model_service_url: "http://localhost:30000".to_string(),
            models: vec!["QwQ".to_string(), "Qwen2.5".to_string(), "DS-R1".to_string()],
            default_model: "QwQ".to_string(),
            temperature: 0.7,
            data_dir: dirs::data_dir()
                .map(|dir| dir.join("streamchat"))
                .unwrap_or_else(|| PathBuf::from("./data")),
            store: StoreKind::Remote,
            tab_key: None,
            persist_debounce: Duration::from_secs(1),
            persist_max_wait: Duration::from_secs(2),
            persist_retries: 3,
            status_poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Contents of a configuration file; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub api_base_url: Option<String>,
    pub model_service_url: Option<String>,
    pub models: Option<Vec<String>>,
    pub default_model: Option<String>,
    pub temperature: Option<f32>,
    pub data_dir: Option<PathBuf>,
    pub store: Option<StoreKind>,
    pub tab_key: Option<String>,
    #[serde(default, with = "duration_str::option")]
    pub persist_debounce: Option<Duration>,
    #[serde(default, with = "duration_str::option")]
    pub persist_max_wait: Option<Duration>,
    pub persist_retries: Option<u32>,
    #[serde(default, with = "duration_str::option")]
    pub status_poll_interval: Option<Duration>,
    #[serde(default, with = "duration_str::option")]
    pub request_timeout: Option<Duration>,
}

impl Config {
    /// Initialize configuration from various sources
    pub async fn init() -> Result<Self> {
        debug!("Initializing configuration");

        let mut config = Self::default();

        // Load from environment variables
        config.load_from_env(|key| std::env::var(key).ok())?;

        // Try to load from configuration files
        if let Some(file_config) = Self::load_from_file().await? {
            config.merge_with(file_config);
        }

        config.validate()?;

        // Ensure data directory exists
        if !config.data_dir.exists() {
            std::fs::create_dir_all(&config.data_dir)
                .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;
        }

        Ok(config)
    }

    /// Apply `STREAMCHAT_*` variables read through `lookup`
    pub fn load_from_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = var("MODEL_SERVICE_URL") {
            self.model_service_url = url;
        }
        if let Some(models) = var("MODELS") {
            self.models = models
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
        }
        if let Some(model) = var("DEFAULT_MODEL") {
            self.default_model = model;
        }
        if let Some(temperature) = var("TEMPERATURE") {
            self.temperature = temperature
                .parse()
                .with_context(|| format!("Invalid {}TEMPERATURE '{}'", ENV_PREFIX, temperature))?;
        }
        if let Some(data_dir) = var("DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }
        if let Some(store) = var("STORE") {
            self.store = store.parse()?;
        }
        if let Some(key) = var("TAB_KEY") {
            self.tab_key = Some(key);
        }
        if let Some(retries) = var("PERSIST_RETRIES") {
            self.persist_retries = retries
                .parse()
                .with_context(|| format!("Invalid {}PERSIST_RETRIES '{}'", ENV_PREFIX, retries))?;
        }

        for (name, slot) in [
            ("PERSIST_DEBOUNCE", &mut self.persist_debounce),
            ("PERSIST_MAX_WAIT", &mut self.persist_max_wait),
            ("STATUS_POLL_INTERVAL", &mut self.status_poll_interval),
            ("REQUEST_TIMEOUT", &mut self.request_timeout),
        ] {
            if let Some(raw) = var(name) {
                *slot = humantime::parse_duration(raw.trim())
                    .with_context(|| format!("Invalid {}{} '{}'", ENV_PREFIX, name, raw))?;
            }
        }

        Ok(())
    }

    /// Load the first configuration file found.
    ///
    /// Looked up in order: `./.streamchat.json`, `./streamchat.json`,
    /// `$CONFIG_DIR/streamchat/streamchat.json`.
    pub async fn load_from_file() -> Result<Option<FileConfig>> {
        let mut config_paths = vec![
            PathBuf::from("./.streamchat.json"),
            PathBuf::from("./streamchat.json"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            config_paths.push(config_dir.join("streamchat").join("streamchat.json"));
        }

        for path in config_paths {
            if path.exists() {
                debug!("Loading configuration from: {}", path.display());
                let content = tokio::fs::read_to_string(&path).await?;
                let config = serde_json::from_str(&content)
                    .with_context(|| format!("Invalid configuration file {}", path.display()))?;
                return Ok(Some(config));
            }
        }

        Ok(None)
    }

    /// Merge a configuration file into this one
    pub fn merge_with(&mut self, other: FileConfig) {
        let FileConfig {
            api_base_url,
            model_service_url,
            models,
            default_model,
            temperature,
            data_dir,
            store,
            tab_key,
            persist_debounce,
            persist_max_wait,
            persist_retries,
            status_poll_interval,
            request_timeout,
        } = other;

        if let Some(v) = api_base_url {
            self.api_base_url = v;
        }
        if let Some(v) = model_service_url {
            self.model_service_url = v;
        }
        if let Some(v) = models {
            self.models = v;
        }
        if let Some(v) = default_model {
            self.default_model = v;
        }
        if let Some(v) = temperature {
            self.temperature = v;
        }
        if let Some(v) = data_dir {
            self.data_dir = v;
        }
        if let Some(v) = store {
            self.store = v;
        }
        if tab_key.is_some() {
            self.tab_key = tab_key;
        }
        if let Some(v) = persist_debounce {
            self.persist_debounce = v;
        }
        if let Some(v) = persist_max_wait {
            self.persist_max_wait = v;
        }
        if let Some(v) = persist_retries {
            self.persist_retries = v;
        }
        if let Some(v) = status_poll_interval {
            self.status_poll_interval = v;
        }
        if let Some(v) = request_timeout {
            self.request_timeout = v;
        }
    }

    /// Path of the SQLite file holding local sessions and credentials
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("streamchat.db")
    }

    pub fn persist_policy(&self) -> PersistPolicy {
        PersistPolicy {
            debounce: self.persist_debounce,
            max_wait: self.persist_max_wait,
            max_retries: self.persist_retries,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("api_base_url is required"));
        }

        if self.models.is_empty() {
            return Err(anyhow::anyhow!("At least one model name is required"));
        }

        if !self.models.contains(&self.default_model) {
            return Err(anyhow::anyhow!(
                "default_model '{}' is not one of the configured models ({})",
                self.default_model,
                self.models.join(", ")
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow::anyhow!("temperature must be between 0.0 and 2.0"));
        }

        if self.persist_debounce.is_zero() || self.persist_max_wait < self.persist_debounce {
            return Err(anyhow::anyhow!(
                "persist_max_wait must be at least persist_debounce, and both greater than zero"
            ));
        }

        if self.status_poll_interval.is_zero() {
            return Err(anyhow::anyhow!("status_poll_interval must be greater than zero"));
        }

        Ok(())
    }
}

/// Durations as humantime strings (`"1s"`, `"500ms"`)
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
