//! Streaming chat session
//!
//! `StreamingChat` owns the transcript of one session while replies stream
//! in. Each `send` appends the user message and an empty assistant
//! placeholder, opens a streaming completion and appends every decoded delta
//! to the placeholder. The transcript is observable through a watch channel
//! and is handed to a [`PersistScheduler`] on every change, with a flush when
//! the exchange ends.
//!
//! Phases move `Idle -> Sending -> Streaming -> Idle`. A second `send` while
//! a reply is in flight fails with [`ChatError::Busy`]. `cancel` returns the
//! session to `Idle` immediately and keeps whatever content arrived; a failed
//! open or a transport error removes the assistant message instead.

use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    app::AppEvent,
    llm::{
        sse::{decode_delta, Frame, FrameDecoder},
        ChatError, ChatMessage, ChatResult, CompletionClient, CompletionRequest, MessageRole, Transcript,
    },
    session::{
        persist::{PersistPolicy, PersistScheduler, PersistSnapshot},
        session::{Session, SessionId},
        store::SessionStore,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    /// Request sent, response headers not yet received
    Sending,
    /// Body is being consumed
    Streaming,
}

/// Observable state of a chat
#[derive(Debug, Clone, Default)]
pub struct ChatSnapshot {
    pub messages: Transcript,
    pub phase: StreamPhase,
    /// Incremented by every accepted `send`
    pub epoch: u64,
    /// Incremented by every transcript change
    pub revision: u64,
}

impl ChatSnapshot {
    pub fn is_responding(&self) -> bool {
        self.phase != StreamPhase::Idle
    }

    pub fn stream_state(&self) -> StreamState {
        let partial_content = if self.is_responding() {
            self.messages
                .last()
                .filter(|m| m.role == MessageRole::Assistant)
                .map(|m| m.content.clone())
                .unwrap_or_default()
        } else {
            String::new()
        };

        StreamState {
            is_responding: self.is_responding(),
            partial_content,
        }
    }

    /// The transcript as it may be stored: never with the empty placeholder
    /// of a reply still in flight
    fn persistable(&self) -> PersistSnapshot {
        let mut messages = self.messages.clone();
        if self.is_responding() && messages.last().is_some_and(ChatMessage::is_pending_assistant) {
            messages.pop();
        }
        PersistSnapshot {
            revision: self.revision,
            messages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    pub is_responding: bool,
    pub partial_content: String,
}

/// Which model to ask and where it is served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTarget {
    pub model: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Completed { content: String },
    Cancelled { partial: String },
}

impl SendOutcome {
    pub fn content(&self) -> &str {
        match self {
            SendOutcome::Completed { content } => content,
            SendOutcome::Cancelled { partial } => partial,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: f32,
    pub persist: PersistPolicy,
    pub events: Option<mpsc::UnboundedSender<AppEvent>>,
    /// Receives every session the store returns after a write
    pub saved: Option<mpsc::UnboundedSender<Session>>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            persist: PersistPolicy::default(),
            events: None,
            saved: None,
        }
    }
}

#[derive(Clone)]
struct InFlight {
    epoch: u64,
    assistant_index: usize,
    message_id: String,
    token: CancellationToken,
}

enum ReplyEnd {
    Done,
    Cancelled,
}

pub struct StreamingChat {
    session_id: SessionId,
    client: Arc<dyn CompletionClient>,
    persist: PersistScheduler,
    state: watch::Sender<ChatSnapshot>,
    inflight: Mutex<Option<InFlight>>,
    temperature: f32,
    events: Option<mpsc::UnboundedSender<AppEvent>>,
}

impl StreamingChat {
    pub fn new(
        session: &Session,
        client: Arc<dyn CompletionClient>,
        store: Arc<dyn SessionStore>,
        options: ChatOptions,
    ) -> Self {
        let persist = PersistScheduler::spawn(store, session.id, options.persist, options.saved);
        let (state, _) = watch::channel(ChatSnapshot {
            messages: session.messages.clone(),
            ..ChatSnapshot::default()
        });

        Self {
            session_id: session.id,
            client,
            persist,
            state,
            inflight: Mutex::new(None),
            temperature: options.temperature,
            events: options.events,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.state.borrow().clone()
    }

    pub fn messages(&self) -> Transcript {
        self.state.borrow().messages.clone()
    }

    pub fn stream_state(&self) -> StreamState {
        self.state.borrow().stream_state()
    }

    pub fn is_responding(&self) -> bool {
        self.state.borrow().is_responding()
    }

    /// Send a user message and stream the reply into the transcript.
    ///
    /// Resolves when the reply is complete or cancelled. Transport failures
    /// are returned after the assistant message has been removed; the user
    /// message stays.
    pub async fn send(&self, target: &ModelTarget, content: impl Into<String>) -> ChatResult<SendOutcome> {
        let (inflight, history) = self.begin(content.into())?;
        let _guard = InFlightGuard {
            chat: self,
            epoch: inflight.epoch,
        };
        self.schedule_persist();

        info!(
            "Sending message in session {} to {} via {} ({} messages of context)",
            self.session_id,
            target.model,
            self.client.name(),
            history.len()
        );
        self.emit(AppEvent::StreamStarted {
            session_id: self.session_id,
            message_id: inflight.message_id.clone(),
        });

        let request = CompletionRequest::streaming(&target.model, &history, self.temperature);
        let mut received = String::new();
        let end = self.stream_reply(&inflight, &target.endpoint, &request, &mut received).await;

        let outcome = match end {
            Ok(ReplyEnd::Done) if self.finish(&inflight) => {
                debug!("Reply in session {} complete ({} bytes)", self.session_id, received.len());
                self.emit(AppEvent::StreamEnded {
                    session_id: self.session_id,
                    message_id: inflight.message_id.clone(),
                });
                Ok(SendOutcome::Completed { content: received })
            }
            Ok(_) => Ok(self.cancelled(&inflight, received)),
            Err(err) if self.fail(&inflight) => {
                warn!("Reply in session {} failed: {}", self.session_id, err);
                self.emit(AppEvent::Error {
                    session_id: Some(self.session_id),
                    error: err.to_string(),
                });
                Err(err)
            }
            Err(err) => {
                debug!("Ignoring error after cancellation in session {}: {}", self.session_id, err);
                Ok(self.cancelled(&inflight, received))
            }
        };

        self.flush_persist().await;
        outcome
    }

    /// Stop the reply in flight, keeping the content received so far.
    ///
    /// Returns false when nothing was streaming.
    pub fn cancel(&self) -> bool {
        self.stop(None)
    }

    /// Stop persisting and write any pending snapshot
    pub async fn shutdown(self) {
        self.cancel();
        let snapshot = self.state.borrow().persistable();
        if let Err(e) = self.persist.flush(snapshot).await {
            warn!("Final save of session {} failed: {}", self.session_id, e);
        }
        self.persist.shutdown().await;
    }

    fn begin(&self, content: String) -> ChatResult<(InFlight, Transcript)> {
        let mut started = None;
        self.state.send_if_modified(|s| {
            if s.is_responding() {
                return false;
            }

            s.epoch += 1;
            s.revision += 1;
            s.phase = StreamPhase::Sending;
            s.messages.push(ChatMessage::user(content));
            let history = s.messages.clone();
            s.messages.push(ChatMessage::assistant(""));

            let inflight = InFlight {
                epoch: s.epoch,
                assistant_index: s.messages.len() - 1,
                message_id: Uuid::new_v4().to_string(),
                token: CancellationToken::new(),
            };
            *self.lock_inflight() = Some(inflight.clone());
            started = Some((inflight, history));
            true
        });

        started.ok_or(ChatError::Busy)
    }

    async fn stream_reply(
        &self,
        inflight: &InFlight,
        endpoint: &str,
        request: &CompletionRequest,
        received: &mut String,
    ) -> ChatResult<ReplyEnd> {
        let token = &inflight.token;
        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(ReplyEnd::Cancelled),
            opened = self.client.open_stream(endpoint, request) => opened?,
        };

        if !self.mark_streaming(inflight) {
            return Ok(ReplyEnd::Cancelled);
        }

        let mut decoder = FrameDecoder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(ReplyEnd::Cancelled),
                next = stream.next() => next,
            };

            let (frames, ended) = match next {
                Some(chunk) => (decoder.push(&chunk?), false),
                None => (decoder.finish(), true),
            };

            for frame in frames {
                let payload = match frame {
                    Frame::Done => return Ok(ReplyEnd::Done),
                    Frame::Data(payload) => payload,
                };

                match decode_delta(&payload) {
                    Ok(Some(delta)) if !delta.is_empty() => {
                        if !self.apply_delta(inflight, &delta) {
                            return Ok(ReplyEnd::Cancelled);
                        }
                        received.push_str(&delta);
                        self.emit(AppEvent::StreamChunk {
                            session_id: self.session_id,
                            message_id: inflight.message_id.clone(),
                            chunk: delta,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Skipping malformed frame in session {}: {}", self.session_id, e),
                }
            }

            if ended {
                debug!("Stream for session {} ended without a done marker", self.session_id);
                return Ok(ReplyEnd::Done);
            }
        }
    }

    fn mark_streaming(&self, inflight: &InFlight) -> bool {
        self.state.send_if_modified(|s| {
            if !owns(s, inflight) {
                return false;
            }
            s.phase = StreamPhase::Streaming;
            true
        })
    }

    fn apply_delta(&self, inflight: &InFlight, delta: &str) -> bool {
        let applied = self.state.send_if_modified(|s| {
            if !owns(s, inflight) || s.phase != StreamPhase::Streaming {
                return false;
            }
            match s.messages.get_mut(inflight.assistant_index) {
                Some(message) => message.content.push_str(delta),
                None => return false,
            }
            s.revision += 1;
            true
        });

        if applied {
            self.schedule_persist();
        }
        applied
    }

    fn finish(&self, inflight: &InFlight) -> bool {
        self.state.send_if_modified(|s| {
            if !owns(s, inflight) {
                return false;
            }
            s.phase = StreamPhase::Idle;
            // An empty reply becomes storable once it is complete
            s.revision += 1;
            true
        })
    }

    fn fail(&self, inflight: &InFlight) -> bool {
        self.state.send_if_modified(|s| {
            if !owns(s, inflight) {
                return false;
            }
            s.phase = StreamPhase::Idle;
            if s
                .messages
                .get(inflight.assistant_index)
                .is_some_and(|m| m.role == MessageRole::Assistant)
            {
                s.messages.remove(inflight.assistant_index);
            }
            s.revision += 1;
            true
        })
    }

    fn cancelled(&self, inflight: &InFlight, partial: String) -> SendOutcome {
        info!(
            "Reply in session {} cancelled after {} bytes",
            self.session_id,
            partial.len()
        );
        self.emit(AppEvent::StreamCancelled {
            session_id: self.session_id,
            message_id: inflight.message_id.clone(),
        });
        SendOutcome::Cancelled { partial }
    }

    /// Cancel the in-flight reply, or only the one from `epoch` when given
    fn stop(&self, epoch: Option<u64>) -> bool {
        let inflight = {
            let mut slot = self.lock_inflight();
            match slot.as_ref() {
                Some(current) if epoch.map_or(true, |e| e == current.epoch) => slot.take(),
                _ => None,
            }
        };
        let Some(inflight) = inflight else {
            return false;
        };
        inflight.token.cancel();

        let stopped = self.state.send_if_modified(|s| {
            if !owns(s, &inflight) {
                return false;
            }
            s.phase = StreamPhase::Idle;
            drop_pending_assistant(&mut s.messages, inflight.assistant_index);
            s.revision += 1;
            true
        });

        if stopped {
            self.schedule_persist();
        }
        stopped
    }

    fn schedule_persist(&self) {
        let snapshot = self.state.borrow().persistable();
        self.persist.schedule_persist(snapshot);
    }

    async fn flush_persist(&self) {
        let snapshot = self.state.borrow().persistable();
        if let Err(e) = self.persist.flush(snapshot).await {
            warn!("Failed to save session {}: {}", self.session_id, e);
        }
    }

    fn emit(&self, event: AppEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn lock_inflight(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn owns(state: &ChatSnapshot, inflight: &InFlight) -> bool {
    state.epoch == inflight.epoch && state.is_responding()
}

fn drop_pending_assistant(messages: &mut Transcript, index: usize) {
    if messages.get(index).is_some_and(ChatMessage::is_pending_assistant) {
        messages.remove(index);
    }
}

/// Returns the chat to idle if a `send` future is dropped mid-flight
struct InFlightGuard<'a> {
    chat: &'a StreamingChat,
    epoch: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.chat.stop(Some(self.epoch));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        llm::{ByteStream, ChatError},
        session::store::testing::RecordingStore,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::{collections::VecDeque, time::Duration};

    enum Scripted {
        Status(u16),
        Chunks(Vec<ChatResult<Bytes>>),
        Channel(mpsc::UnboundedReceiver<ChatResult<Bytes>>),
        NeverOpens,
    }

    #[derive(Default)]
    struct ScriptedClient {
        responses: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<(String, CompletionRequest)>>,
    }

    impl ScriptedClient {
        fn with(responses: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            })
        }

        fn requests(&self) -> Vec<(String, CompletionRequest)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn open_stream(&self, endpoint: &str, request: &CompletionRequest) -> ChatResult<ByteStream> {
            self.requests
                .lock()
                .unwrap()
                .push((endpoint.to_string(), request.clone()));
            let next = self.responses.lock().unwrap().pop_front();
            match next.expect("unexpected request") {
                Scripted::Status(code) => Err(ChatError::status(code, "upstream failure")),
                Scripted::Chunks(chunks) => Ok(Box::pin(futures::stream::iter(chunks))),
                Scripted::Channel(rx) => Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                }))),
                Scripted::NeverOpens => futures::future::pending().await,
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    fn ok(raw: impl Into<String>) -> ChatResult<Bytes> {
        Ok(Bytes::from(raw.into()))
    }

    fn target() -> ModelTarget {
        ModelTarget {
            model: "QwQ".to_string(),
            endpoint: "http://node-1:8000".to_string(),
        }
    }

    fn chat_with(client: Arc<ScriptedClient>, store: Arc<RecordingStore>) -> StreamingChat {
        chat_with_options(client, store, ChatOptions::default())
    }

    fn chat_with_options(
        client: Arc<ScriptedClient>,
        store: Arc<RecordingStore>,
        options: ChatOptions,
    ) -> StreamingChat {
        let session = Session {
            id: 1,
            title: "New chat".to_string(),
            messages: Vec::new(),
            created_at: None,
            updated_at: None,
        };
        StreamingChat::new(&session, client, store, options)
    }

    async fn wait_until(rx: &mut watch::Receiver<ChatSnapshot>, check: impl Fn(&ChatSnapshot) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if check(&rx.borrow_and_update()) {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_hello_reply_is_streamed_and_saved() {
        let client = ScriptedClient::with(vec![Scripted::Chunks(vec![
            ok(delta("He")),
            ok(delta("llo")),
            ok("data: [DONE]\n\n"),
        ])]);
        let store = Arc::new(RecordingStore::with_session(1));
        let chat = chat_with(client.clone(), store.clone());

        let outcome = chat.send(&target(), "hi").await.unwrap();

        assert_eq!(outcome, SendOutcome::Completed { content: "Hello".to_string() });
        let expected = vec![ChatMessage::user("hi"), ChatMessage::assistant("Hello")];
        assert_eq!(chat.messages(), expected);
        assert!(!chat.is_responding());
        assert_eq!(store.stored_messages(1), expected);

        let requests = client.requests();
        assert_eq!(requests[0].0, "http://node-1:8000");
        assert_eq!(requests[0].1.messages, vec![ChatMessage::user("hi")]);
        assert!(requests[0].1.stream);
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let body = format!("{}{}data: [DONE]\n\n", delta("Hel"), delta("lo, world"));
        let (head, tail) = body.split_at(9);
        let (middle, tail) = tail.split_at(30);
        let client = ScriptedClient::with(vec![Scripted::Chunks(vec![ok(head), ok(middle), ok(tail)])]);
        let chat = chat_with(client, Arc::new(RecordingStore::with_session(1)));

        let outcome = chat.send(&target(), "hi").await.unwrap();
        assert_eq!(outcome.content(), "Hello, world");
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let client = ScriptedClient::with(vec![Scripted::Chunks(vec![
            ok(delta("a")),
            ok("data: {not json\n\n"),
            ok(delta("b")),
            ok("data: [DONE]\n\n"),
        ])]);
        let chat = chat_with(client, Arc::new(RecordingStore::with_session(1)));

        let outcome = chat.send(&target(), "hi").await.unwrap();
        assert_eq!(outcome.content(), "ab");
    }

    #[tokio::test]
    async fn test_open_failure_removes_placeholder() {
        let client = ScriptedClient::with(vec![Scripted::Status(500)]);
        let store = Arc::new(RecordingStore::with_session(1));
        let chat = chat_with(client, store.clone());

        let err = chat.send(&target(), "hi").await.unwrap_err();

        assert!(matches!(err, ChatError::Transport { status: Some(500), .. }));
        assert_eq!(chat.messages(), vec![ChatMessage::user("hi")]);
        assert!(!chat.is_responding());
        assert_eq!(store.stored_messages(1), vec![ChatMessage::user("hi")]);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_removes_partial_reply() {
        let client = ScriptedClient::with(vec![Scripted::Chunks(vec![
            ok(delta("half an ans")),
            Err(ChatError::transport("connection reset")),
        ])]);
        let chat = chat_with(client, Arc::new(RecordingStore::with_session(1)));

        let err = chat.send(&target(), "hi").await.unwrap_err();

        assert!(matches!(err, ChatError::Transport { status: None, .. }));
        assert_eq!(chat.messages(), vec![ChatMessage::user("hi")]);
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_content() {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = ScriptedClient::with(vec![Scripted::Channel(rx)]);
        let store = Arc::new(RecordingStore::with_session(1));
        let chat = Arc::new(chat_with(client, store.clone()));
        let mut updates = chat.subscribe();

        let sending = tokio::spawn({
            let chat = chat.clone();
            async move { chat.send(&target(), "tell me").await }
        });

        tx.send(ok(delta("par"))).unwrap();
        wait_until(&mut updates, |s| s.stream_state().partial_content == "par").await;

        assert!(chat.cancel());
        assert!(!chat.is_responding());

        tx.send(ok(delta("tial"))).unwrap();
        let outcome = sending.await.unwrap().unwrap();

        assert_eq!(outcome, SendOutcome::Cancelled { partial: "par".to_string() });
        let expected = vec![ChatMessage::user("tell me"), ChatMessage::assistant("par")];
        assert_eq!(chat.messages(), expected);
        assert_eq!(store.stored_messages(1), expected);
        assert!(!chat.cancel());
    }

    #[tokio::test]
    async fn test_send_while_responding_is_busy() {
        let client = ScriptedClient::with(vec![Scripted::NeverOpens]);
        let store = Arc::new(RecordingStore::with_session(1));
        let chat = Arc::new(chat_with(client, store.clone()));
        let mut updates = chat.subscribe();

        let sending = tokio::spawn({
            let chat = chat.clone();
            async move { chat.send(&target(), "first").await }
        });
        wait_until(&mut updates, ChatSnapshot::is_responding).await;

        let before = chat.messages();
        let err = chat.send(&target(), "second").await.unwrap_err();
        assert!(matches!(err, ChatError::Busy));
        assert_eq!(chat.messages(), before);

        assert!(chat.cancel());
        let outcome = sending.await.unwrap().unwrap();
        assert_eq!(outcome, SendOutcome::Cancelled { partial: String::new() });
        assert_eq!(chat.messages(), vec![ChatMessage::user("first")]);

        let updates = store.updates.lock().unwrap();
        assert!(updates.iter().all(|(_, update)| update
            .messages
            .as_ref()
            .map_or(true, |m| !m.iter().any(ChatMessage::is_pending_assistant))));
    }

    #[tokio::test]
    async fn test_next_send_carries_full_history() {
        let client = ScriptedClient::with(vec![
            Scripted::Chunks(vec![ok(delta("one")), ok("data: [DONE]\n\n")]),
            Scripted::Chunks(vec![ok(delta("two")), ok("data: [DONE]\n\n")]),
        ]);
        let chat = chat_with(client.clone(), Arc::new(RecordingStore::with_session(1)));

        chat.send(&target(), "first").await.unwrap();
        chat.send(&target(), "second").await.unwrap();

        let requests = client.requests();
        assert_eq!(
            requests[1].1.messages,
            vec![
                ChatMessage::user("first"),
                ChatMessage::assistant("one"),
                ChatMessage::user("second"),
            ]
        );
        assert_eq!(chat.snapshot().epoch, 2);
    }

    #[tokio::test]
    async fn test_stream_events_are_emitted() {
        let client = ScriptedClient::with(vec![Scripted::Chunks(vec![
            ok(delta("x")),
            ok("data: [DONE]\n\n"),
        ])]);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let options = ChatOptions {
            events: Some(events_tx),
            ..ChatOptions::default()
        };
        let chat = chat_with_options(client, Arc::new(RecordingStore::with_session(1)), options);

        chat.send(&target(), "hi").await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            kinds.push(event);
        }
        assert!(matches!(kinds[0], AppEvent::StreamStarted { session_id: 1, .. }));
        assert!(matches!(&kinds[1], AppEvent::StreamChunk { chunk, .. } if chunk == "x"));
        assert!(matches!(kinds[2], AppEvent::StreamEnded { .. }));
    }

    #[tokio::test]
    async fn test_empty_reply_is_saved_as_is() {
        let client = ScriptedClient::with(vec![Scripted::Chunks(vec![ok("data: [DONE]\n\n")])]);
        let store = Arc::new(RecordingStore::with_session(1));
        let chat = chat_with(client, store.clone());

        let outcome = chat.send(&target(), "hi").await.unwrap();

        assert_eq!(outcome, SendOutcome::Completed { content: String::new() });
        let expected = vec![ChatMessage::user("hi"), ChatMessage::assistant("")];
        assert_eq!(chat.messages(), expected);
        assert_eq!(store.stored_messages(1), chat.messages());
    }

    #[tokio::test]
    async fn test_transcript_is_saved_while_streaming() {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = ScriptedClient::with(vec![Scripted::Channel(rx)]);
        let store = Arc::new(RecordingStore::with_session(1));
        let options = ChatOptions {
            persist: PersistPolicy {
                debounce: Duration::from_millis(200),
                max_wait: Duration::from_millis(300),
                max_retries: 3,
            },
            ..ChatOptions::default()
        };
        let chat = Arc::new(chat_with_options(client, store.clone(), options));

        let sending = tokio::spawn({
            let chat = chat.clone();
            async move { chat.send(&target(), "count").await }
        });

        // Deltas arrive faster than the debounce window, so only max_wait forces a write
        for _ in 0..30 {
            tx.send(ok(delta("1"))).unwrap();
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        assert!(chat.is_responding());
        assert!(store.update_count() >= 1);
        let stored = store.stored_messages(1);
        assert_eq!(stored[0], ChatMessage::user("count"));
        assert!(stored
            .last()
            .is_some_and(|m| m.role == MessageRole::Assistant && !m.content.is_empty()));

        tx.send(ok("data: [DONE]\n\n")).unwrap();
        let outcome = sending.await.unwrap().unwrap();
        assert_eq!(outcome.content().len(), 30);
        assert_eq!(store.stored_messages(1), chat.messages());
    }

    #[tokio::test]
    async fn test_stream_without_done_marker_completes() {
        let client = ScriptedClient::with(vec![Scripted::Chunks(vec![ok(delta("tail"))])]);
        let chat = chat_with(client, Arc::new(RecordingStore::with_session(1)));

        let outcome = chat.send(&target(), "hi").await.unwrap();
        assert_eq!(outcome, SendOutcome::Completed { content: "tail".to_string() });
    }
}
