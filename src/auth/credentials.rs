//! Keyed credential storage
//!
//! Bearer tokens are stored under an opaque client-generated key, so
//! several terminals (or scripts) can stay signed in as different accounts
//! against the same data directory.

use async_trait::async_trait;
use rand::{distributions::Uniform, Rng};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::session::Database;

const KEY_PREFIX: &str = "tab_";
const KEY_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a fresh credential key, e.g. `tab_k3x9q0z1m`
pub fn generate_key() -> String {
    let mut rng = rand::thread_rng();
    let dist = Uniform::from(0..BASE36.len());
    let suffix: String = (0..KEY_LEN).map(|_| BASE36[rng.sample(dist)] as char).collect();
    format!("{}{}", KEY_PREFIX, suffix)
}

/// Storage of bearer tokens by key
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, token: &str) -> anyhow::Result<()>;

    async fn clear(&self, key: &str) -> anyhow::Result<()>;
}

/// Credentials persisted in the local database
pub struct SqliteCredentialStore {
    db: Arc<Database>,
}

impl SqliteCredentialStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.db.get_credential(key).await?)
    }

    async fn set(&self, key: &str, token: &str) -> anyhow::Result<()> {
        Ok(self.db.set_credential(key, token).await?)
    }

    async fn clear(&self, key: &str) -> anyhow::Result<()> {
        Ok(self.db.clear_credential(key).await?)
    }
}

/// Process-local credentials
#[derive(Default)]
pub struct MemoryCredentialStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.tokens.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, token: &str) -> anyhow::Result<()> {
        self.tokens.write().await.insert(key.to_string(), token.to_string());
        Ok(())
    }

    async fn clear(&self, key: &str) -> anyhow::Result<()> {
        self.tokens.write().await.remove(key);
        Ok(())
    }
}

/// A credential store bound to one key
#[derive(Clone)]
pub struct ScopedCredentials {
    store: Arc<dyn CredentialStore>,
    key: String,
}

impl ScopedCredentials {
    pub fn new(store: Arc<dyn CredentialStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn token(&self) -> anyhow::Result<Option<String>> {
        self.store.get(&self.key).await
    }

    pub async fn set(&self, token: &str) -> anyhow::Result<()> {
        debug!("Storing credential for {}", self.key);
        self.store.set(&self.key, token).await
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        debug!("Clearing credential for {}", self.key);
        self.store.clear(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys() {
        let key = generate_key();
        assert!(key.starts_with("tab_"));
        assert_eq!(key.len(), KEY_PREFIX.len() + KEY_LEN);
        assert!(key[KEY_PREFIX.len()..].bytes().all(|b| BASE36.contains(&b)));
        assert_ne!(generate_key(), generate_key());
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let first = ScopedCredentials::new(store.clone(), "tab_one");
        let second = ScopedCredentials::new(store.clone(), "tab_two");

        first.set("alpha").await.unwrap();
        second.set("beta").await.unwrap();
        assert_eq!(first.token().await.unwrap().as_deref(), Some("alpha"));
        assert_eq!(second.token().await.unwrap().as_deref(), Some("beta"));

        first.clear().await.unwrap();
        assert_eq!(first.token().await.unwrap(), None);
        assert_eq!(second.token().await.unwrap().as_deref(), Some("beta"));
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("streamchat.db");

        {
            let db = Arc::new(Database::new(&path).await.unwrap());
            SqliteCredentialStore::new(db).set("tab_x", "secret").await.unwrap();
        }

        let db = Arc::new(Database::new(&path).await.unwrap());
        let store = SqliteCredentialStore::new(db);
        assert_eq!(store.get("tab_x").await.unwrap().as_deref(), Some("secret"));
    }
}
