//! Database layer for local persistence
//!
//! Backs the offline session store and the credential store. Both live in
//! one SQLite file under the data directory.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::{
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::debug;

use crate::session::{
    session::{timestamp, NewSession, Session, SessionId, SessionUpdate},
    store::{SessionStore, StoreError, StoreResult},
};

/// Database manager for local persistence
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file
    pub async fn new<P: AsRef<Path>>(db_path: P) -> rusqlite::Result<Self> {
        debug!("Opening database at {}", db_path.as_ref().display());
        let conn = Connection::open(db_path)?;

        let db = Self { conn: Mutex::new(conn) };
        db.create_tables()?;

        Ok(db)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create the necessary database tables
    fn create_tables(&self) -> rusqlite::Result<()> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                messages TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_updated_at ON sessions (updated_at);
            CREATE TABLE IF NOT EXISTS credentials (
                key TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS agreement_acceptances (
                key TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                accepted_at TEXT NOT NULL
            );",
        )
    }

    /// Insert a new session and return its id
    pub async fn insert_session(&self, title: &str, messages_json: &str) -> rusqlite::Result<SessionId> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sessions (title, messages, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![title, messages_json, now, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Update a session; returns false when no such row exists
    pub async fn update_session(
        &self,
        id: SessionId,
        title: Option<&str>,
        messages_json: Option<&str>,
    ) -> rusqlite::Result<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn().execute(
            "UPDATE sessions
             SET title = COALESCE(?1, title),
                 messages = COALESCE(?2, messages),
                 updated_at = ?3
             WHERE id = ?4",
            params![title, messages_json, now, id],
        )?;
        Ok(changed > 0)
    }

    /// Get a session by ID
    pub async fn get_session(&self, id: SessionId) -> rusqlite::Result<Option<SessionRow>> {
        self.conn()
            .query_row(
                "SELECT id, title, messages, created_at, updated_at FROM sessions WHERE id = ?1",
                [id],
                SessionRow::from_row,
            )
            .optional()
    }

    /// List all sessions, most recently updated first
    pub async fn list_sessions(&self) -> rusqlite::Result<Vec<SessionRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, messages, created_at, updated_at
             FROM sessions ORDER BY updated_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], SessionRow::from_row)?;
        let sessions = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Delete a session; returns false when no such row exists
    pub async fn delete_session(&self, id: SessionId) -> rusqlite::Result<bool> {
        let changed = self.conn().execute("DELETE FROM sessions WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    pub async fn get_credential(&self, key: &str) -> rusqlite::Result<Option<String>> {
        self.conn()
            .query_row("SELECT token FROM credentials WHERE key = ?1", [key], |row| row.get(0))
            .optional()
    }

    pub async fn set_credential(&self, key: &str, token: &str) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO credentials (key, token, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET token = excluded.token, updated_at = excluded.updated_at",
            params![key, token, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn clear_credential(&self, key: &str) -> rusqlite::Result<()> {
        self.conn().execute("DELETE FROM credentials WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Agreement text last accepted under `key`
    pub async fn accepted_agreement(&self, key: &str) -> rusqlite::Result<Option<String>> {
        self.conn()
            .query_row(
                "SELECT content FROM agreement_acceptances WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
    }

    pub async fn accept_agreement(&self, key: &str, content: &str) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO agreement_acceptances (key, content, accepted_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET content = excluded.content, accepted_at = excluded.accepted_at",
            params![key, content, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Database row representation of a session
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: SessionId,
    pub title: String,
    pub messages: String,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SessionRow {
            id: row.get(0)?,
            title: row.get(1)?,
            messages: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn into_session(self) -> StoreResult<Session> {
        Ok(Session {
            id: self.id,
            title: self.title,
            messages: serde_json::from_str(&self.messages)?,
            created_at: timestamp::parse(&self.created_at),
            updated_at: timestamp::parse(&self.updated_at),
        })
    }
}

/// Session store kept in the local database, for use without a backend
pub struct SqliteSessionStore {
    db: Arc<Database>,
}

impl SqliteSessionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn fetch(&self, id: SessionId) -> StoreResult<Session> {
        self.db
            .get_session(id)
            .await?
            .ok_or(StoreError::NotFound(id))?
            .into_session()
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, session: &NewSession) -> StoreResult<Session> {
        let messages = serde_json::to_string(&session.messages)?;
        let id = self.db.insert_session(&session.title, &messages).await?;
        self.fetch(id).await
    }

    async fn update(&self, id: SessionId, update: &SessionUpdate) -> StoreResult<Session> {
        let messages = update.messages.as_ref().map(serde_json::to_string).transpose()?;
        if !self
            .db
            .update_session(id, update.title.as_deref(), messages.as_deref())
            .await?
        {
            return Err(StoreError::NotFound(id));
        }
        self.fetch(id).await
    }

    async fn delete(&self, id: SessionId) -> StoreResult<()> {
        if self.db.delete_session(id).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(id))
        }
    }

    async fn list(&self) -> StoreResult<Vec<Session>> {
        self.db
            .list_sessions()
            .await?
            .into_iter()
            .map(SessionRow::into_session)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteSessionStore) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("streamchat.db")).await.unwrap();
        (dir, SqliteSessionStore::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn test_create_update_list_delete() {
        let (_dir, store) = store().await;

        let created = store.create(&NewSession::default()).await.unwrap();
        assert_eq!(created.title, "New chat");
        assert!(created.messages.is_empty());
        assert!(created.created_at.is_some());

        let messages = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let updated = store
            .update(created.id, &SessionUpdate::messages(messages.clone()))
            .await
            .unwrap();
        assert_eq!(updated.messages, messages);
        assert_eq!(updated.title, "New chat");

        let renamed = store.update(created.id, &SessionUpdate::title("Greetings")).await.unwrap();
        assert_eq!(renamed.title, "Greetings");
        assert_eq!(renamed.messages, messages);

        let second = store.create(&NewSession::titled("Second")).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|s| s.id == second.id));

        store.delete(created.id).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, second.id);
    }

    #[tokio::test]
    async fn test_missing_session_is_not_found() {
        let (_dir, store) = store().await;
        assert!(matches!(
            store.update(99, &SessionUpdate::title("x")).await,
            Err(StoreError::NotFound(99))
        ));
        assert!(matches!(store.delete(99).await, Err(StoreError::NotFound(99))));
    }

    #[tokio::test]
    async fn test_credentials_round_trip() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("streamchat.db")).await.unwrap();

        assert_eq!(db.get_credential("tab_a").await.unwrap(), None);
        db.set_credential("tab_a", "token-1").await.unwrap();
        db.set_credential("tab_a", "token-2").await.unwrap();
        assert_eq!(db.get_credential("tab_a").await.unwrap().as_deref(), Some("token-2"));

        db.clear_credential("tab_a").await.unwrap();
        assert_eq!(db.get_credential("tab_a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_agreement_acceptance_is_kept_per_key() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("streamchat.db")).await.unwrap();

        db.accept_agreement("tab_a", "v1 terms").await.unwrap();
        assert_eq!(db.accepted_agreement("tab_a").await.unwrap().as_deref(), Some("v1 terms"));
        assert_eq!(db.accepted_agreement("tab_b").await.unwrap(), None);

        db.accept_agreement("tab_a", "v2 terms").await.unwrap();
        assert_eq!(db.accepted_agreement("tab_a").await.unwrap().as_deref(), Some("v2 terms"));
    }
}
