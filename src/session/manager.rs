//! Session list cache and selection

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::{
    app::AppEvent,
    session::{
        session::{NewSession, Session, SessionId, SessionUpdate, DEFAULT_TITLE},
        store::{SessionStore, StoreError, StoreResult},
    },
};

#[derive(Default)]
struct SessionCache {
    sessions: Vec<Session>,
    current: Option<SessionId>,
}

impl SessionCache {
    fn upsert_front(&mut self, session: Session) {
        self.sessions.retain(|s| s.id != session.id);
        self.sessions.insert(0, session);
    }

    fn find(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }
}

/// Client-side mirror of the sessions held by a store.
///
/// The store is authoritative: `refresh` replaces the whole cache.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cache: RwLock<SessionCache>,
    events: Option<mpsc::UnboundedSender<AppEvent>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, events: Option<mpsc::UnboundedSender<AppEvent>>) -> Self {
        Self {
            store,
            cache: RwLock::new(SessionCache::default()),
            events,
        }
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        self.store.clone()
    }

    /// Reload the list from the store, newest first
    pub async fn refresh(&self) -> StoreResult<Vec<Session>> {
        let mut sessions = self.store.list().await?;
        sessions.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
        debug!("Loaded {} sessions", sessions.len());

        let mut cache = self.cache.write().await;
        let keep_current = cache
            .current
            .is_some_and(|id| sessions.iter().any(|s| s.id == id));
        if !keep_current {
            cache.current = sessions.first().map(|s| s.id);
        }
        cache.sessions = sessions.clone();

        Ok(sessions)
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.cache.read().await.sessions.clone()
    }

    pub async fn current(&self) -> Option<Session> {
        let cache = self.cache.read().await;
        cache.current.and_then(|id| cache.find(id)).cloned()
    }

    pub async fn select(&self, id: SessionId) -> StoreResult<Session> {
        let mut cache = self.cache.write().await;
        let session = cache.find(id).cloned().ok_or(StoreError::NotFound(id))?;
        cache.current = Some(id);
        Ok(session)
    }

    /// Create a session and make it current
    pub async fn create(&self, title: &str) -> StoreResult<Session> {
        let session = self.store.create(&NewSession::titled(title)).await?;
        info!("Created session {} ({})", session.id, session.title);

        {
            let mut cache = self.cache.write().await;
            cache.upsert_front(session.clone());
            cache.current = Some(session.id);
        }
        self.emit(AppEvent::SessionCreated { session_id: session.id });

        Ok(session)
    }

    /// The current session, creating a fresh one when none is selected
    pub async fn ensure_current(&self) -> StoreResult<Session> {
        match self.current().await {
            Some(session) => Ok(session),
            None => self.create(DEFAULT_TITLE).await,
        }
    }

    pub async fn rename(&self, id: SessionId, title: &str) -> StoreResult<Session> {
        let saved = self.store.update(id, &SessionUpdate::title(title.trim())).await?;
        self.apply_saved(saved.clone()).await;
        Ok(saved)
    }

    /// Delete a session; the first remaining one becomes current if the
    /// deleted one was
    pub async fn delete(&self, id: SessionId) -> StoreResult<()> {
        self.store.delete(id).await?;
        info!("Deleted session {}", id);

        {
            let mut cache = self.cache.write().await;
            cache.sessions.retain(|s| s.id != id);
            if cache.current == Some(id) {
                cache.current = cache.sessions.first().map(|s| s.id);
            }
        }
        self.emit(AppEvent::SessionDeleted { session_id: id });

        Ok(())
    }

    /// Mirror a session the store just returned from a write
    pub async fn apply_saved(&self, session: Session) {
        let session_id = session.id;
        self.cache.write().await.upsert_front(session);
        self.emit(AppEvent::SessionSaved { session_id });
    }

    /// Channel that feeds stored sessions back into this cache
    pub fn track_saves(self: &Arc<Self>) -> mpsc::UnboundedSender<Session> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Session>();
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(session) = rx.recv().await {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.apply_saved(session).await;
            }
        });
        tx
    }

    fn emit(&self, event: AppEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
