//! Coalescing persistence of transcripts
//!
//! Callers hand over snapshots as often as they like; a background task
//! writes the newest one once the transcript has been quiet for the debounce
//! window, or once `max_wait` has passed since the first pending change,
//! whichever comes first. Writes from the task and from `flush` share one
//! lock and carry a revision, so a slow write of an older snapshot can never
//! land after a newer one.

use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time::{sleep, sleep_until, Instant},
};
use tracing::{debug, warn};

use crate::{
    llm::ChatMessage,
    session::{
        session::{Session, SessionId, SessionUpdate},
        store::{SessionStore, StoreResult},
    },
};

/// A transcript as of one revision
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistSnapshot {
    pub revision: u64,
    pub messages: Vec<ChatMessage>,
}

/// Timing of coalesced writes
#[derive(Debug, Clone)]
pub struct PersistPolicy {
    pub debounce: Duration,
    pub max_wait: Duration,
    /// Consecutive failed attempts before waiting for the next change
    pub max_retries: u32,
}

impl Default for PersistPolicy {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            max_wait: Duration::from_secs(2),
            max_retries: 3,
        }
    }
}

struct Writer {
    store: Arc<dyn SessionStore>,
    session_id: SessionId,
    last_written: Mutex<u64>,
    saved_tx: Option<mpsc::UnboundedSender<Session>>,
}

impl Writer {
    /// Returns false when a newer revision was already written
    async fn write(&self, snapshot: &PersistSnapshot) -> StoreResult<bool> {
        let mut last_written = self.last_written.lock().await;
        if snapshot.revision <= *last_written {
            debug!(
                "Skipping stale snapshot r{} for session {} (stored r{})",
                snapshot.revision, self.session_id, *last_written
            );
            return Ok(false);
        }

        let saved = self
            .store
            .update(self.session_id, &SessionUpdate::messages(snapshot.messages.clone()))
            .await?;
        *last_written = snapshot.revision;
        debug!("Persisted session {} at r{}", self.session_id, snapshot.revision);

        if let Some(tx) = &self.saved_tx {
            let _ = tx.send(saved);
        }
        Ok(true)
    }
}

/// Debounced writer of one session's transcript
pub struct PersistScheduler {
    tx: watch::Sender<PersistSnapshot>,
    writer: Arc<Writer>,
    task: JoinHandle<()>,
}

impl PersistScheduler {
    /// Start the background writer for `session_id`.
    ///
    /// Every stored session is also sent to `saved_tx` when given, so a
    /// session list can mirror what the store holds.
    pub fn spawn(
        store: Arc<dyn SessionStore>,
        session_id: SessionId,
        policy: PersistPolicy,
        saved_tx: Option<mpsc::UnboundedSender<Session>>,
    ) -> Self {
        let (tx, rx) = watch::channel(PersistSnapshot::default());
        let writer = Arc::new(Writer {
            store,
            session_id,
            last_written: Mutex::new(0),
            saved_tx,
        });

        let task = tokio::spawn(run(rx, writer.clone(), policy));

        Self { tx, writer, task }
    }

    /// Queue a snapshot; only the newest pending snapshot is written
    pub fn schedule_persist(&self, snapshot: PersistSnapshot) {
        self.tx.send_replace(snapshot);
    }

    /// Write a snapshot now, bypassing the debounce window
    pub async fn flush(&self, snapshot: PersistSnapshot) -> StoreResult<bool> {
        self.writer.write(&snapshot).await
    }

    /// Stop accepting snapshots and wait for the pending write to finish
    pub async fn shutdown(self) {
        let Self { tx, task, .. } = self;
        drop(tx);
        if let Err(e) = task.await {
            warn!("Persistence task ended abnormally: {}", e);
        }
    }
}

async fn run(mut rx: watch::Receiver<PersistSnapshot>, writer: Arc<Writer>, policy: PersistPolicy) {
    let mut failures = 0u32;
    let mut closed = false;

    loop {
        if failures == 0 {
            if closed || rx.changed().await.is_err() {
                break;
            }
            closed = coalesce(&mut rx, &policy).await;
        } else if closed {
            sleep(policy.debounce).await;
        } else {
            closed = coalesce(&mut rx, &policy).await;
        }

        let snapshot = rx.borrow_and_update().clone();
        match writer.write(&snapshot).await {
            Ok(_) => failures = 0,
            Err(e) => {
                failures += 1;
                warn!(
                    "Failed to persist session {} (attempt {}): {}",
                    writer.session_id, failures, e
                );
                if failures > policy.max_retries {
                    warn!(
                        "Giving up on session {} until the transcript changes again",
                        writer.session_id
                    );
                    failures = 0;
                }
            }
        }
    }
}

/// Wait until the transcript has been quiet for the debounce window or the
/// max wait has elapsed. Returns true if the sender went away meanwhile.
async fn coalesce(rx: &mut watch::Receiver<PersistSnapshot>, policy: &PersistPolicy) -> bool {
    let start = Instant::now();
    let hard_deadline = start + policy.max_wait;
    let mut quiet_deadline = start + policy.debounce;

    loop {
        tokio::select! {
            _ = sleep_until(quiet_deadline.min(hard_deadline)) => return false,
            changed = rx.changed() => {
                if changed.is_err() {
                    return true;
                }
                quiet_deadline = Instant::now() + policy.debounce;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::testing::RecordingStore;

    fn snapshot(revision: u64, text: &str) -> PersistSnapshot {
        PersistSnapshot {
            revision,
            messages: vec![ChatMessage::user(text)],
        }
    }

    fn policy(debounce_ms: u64, max_wait_ms: u64) -> PersistPolicy {
        PersistPolicy {
            debounce: Duration::from_millis(debounce_ms),
            max_wait: Duration::from_millis(max_wait_ms),
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn test_burst_is_coalesced_into_one_write() {
        let store = Arc::new(RecordingStore::with_session(1));
        let scheduler = PersistScheduler::spawn(store.clone(), 1, policy(40, 1_000), None);

        for revision in 1..=5 {
            scheduler.schedule_persist(snapshot(revision, &format!("v{}", revision)));
        }
        sleep(Duration::from_millis(250)).await;

        assert_eq!(store.update_count(), 1);
        assert_eq!(store.stored_messages(1), vec![ChatMessage::user("v5")]);
    }

    #[tokio::test]
    async fn test_max_wait_forces_writes_during_steady_changes() {
        let store = Arc::new(RecordingStore::with_session(1));
        let scheduler = PersistScheduler::spawn(store.clone(), 1, policy(100, 120), None);

        for revision in 1..=20 {
            scheduler.schedule_persist(snapshot(revision, "x"));
            sleep(Duration::from_millis(20)).await;
        }

        assert!(store.update_count() >= 2, "only {} writes", store.update_count());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_revision_is_not_written() {
        let store = Arc::new(RecordingStore::with_session(1));
        let scheduler = PersistScheduler::spawn(store.clone(), 1, policy(1_000, 2_000), None);

        assert!(scheduler.flush(snapshot(3, "newer")).await.unwrap());
        assert!(!scheduler.flush(snapshot(2, "older")).await.unwrap());

        assert_eq!(store.update_count(), 1);
        assert_eq!(store.stored_messages(1), vec![ChatMessage::user("newer")]);
    }

    #[tokio::test]
    async fn test_failed_write_is_retried() {
        let store = Arc::new(RecordingStore::with_session(1));
        store.fail_updates(2);
        let scheduler = PersistScheduler::spawn(store.clone(), 1, policy(20, 50), None);

        scheduler.schedule_persist(snapshot(1, "keep me"));
        sleep(Duration::from_millis(300)).await;

        assert_eq!(store.update_count(), 3);
        assert_eq!(store.stored_messages(1), vec![ChatMessage::user("keep me")]);
    }

    #[tokio::test]
    async fn test_shutdown_writes_pending_snapshot() {
        let store = Arc::new(RecordingStore::with_session(1));
        let (saved_tx, mut saved_rx) = mpsc::unbounded_channel();
        let scheduler = PersistScheduler::spawn(store.clone(), 1, policy(10_000, 10_000), Some(saved_tx));

        scheduler.schedule_persist(snapshot(1, "last words"));
        scheduler.shutdown().await;

        assert_eq!(store.stored_messages(1), vec![ChatMessage::user("last words")]);
        let saved = saved_rx.recv().await.unwrap();
        assert_eq!(saved.messages, vec![ChatMessage::user("last words")]);
    }
}
