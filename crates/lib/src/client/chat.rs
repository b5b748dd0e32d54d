//! Chat orchestration: persist the user's message, keep the session up to date, send a
//! bounded context window to the backend and persist whatever comes back.

use super::gateway::{ChatBackend, ChatError};
use crate::gateway::ChatTurn;
use crate::session::{self, Message, Session, SessionId};
use crate::store::StorageService;
use std::collections::HashSet;
use std::sync::Mutex;

pub const DEFAULT_CONTEXT_WINDOW: usize = 10;

/// Result of one send. `error` is set when `reply` is a synthetic error message.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub session_id: SessionId,
    pub user_message: Message,
    pub reply: Message,
    pub error: Option<ChatError>,
}

/// Marks a session busy until dropped.
struct InFlight<'a> {
    sessions: &'a Mutex<HashSet<SessionId>>,
    id: SessionId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut g = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        g.remove(&self.id);
    }
}

pub struct ChatClient<B> {
    store: StorageService,
    backend: B,
    context_window: usize,
    in_flight: Mutex<HashSet<SessionId>>,
}

impl<B: ChatBackend> ChatClient<B> {
    pub fn new(store: StorageService, backend: B) -> Self {
        Self {
            store,
            backend,
            context_window: DEFAULT_CONTEXT_WINDOW,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Maximum number of recent messages sent with each request (at least 1).
    pub fn with_context_window(mut self, size: usize) -> Self {
        self.context_window = size.max(1);
        self
    }

    pub fn store(&self) -> &StorageService {
        &self.store
    }

    pub fn new_session_id(&self) -> SessionId {
        session::new_session_id()
    }

    /// Sessions, most recently updated first.
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions = self.store.all_sessions();
        sessions.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        sessions
    }

    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        self.store.messages_by_session(session_id)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<(), crate::store::PersistenceError> {
        self.store.delete_session(session_id)
    }

    pub fn rename_session(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<bool, crate::store::PersistenceError> {
        self.store.update_session_title(session_id, title)
    }

    fn begin(&self, id: &str) -> Result<InFlight<'_>, ChatError> {
        let mut g = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !g.insert(id.to_string()) {
            return Err(ChatError::Busy(id.to_string()));
        }
        Ok(InFlight {
            sessions: &self.in_flight,
            id: id.to_string(),
        })
    }

    /// The last `context_window` messages of the session, oldest first, as role-tagged turns.
    pub fn context_window(&self, session_id: &str) -> Vec<ChatTurn> {
        window_turns(&self.store, session_id, self.context_window)
    }

    /// Run a store call on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T, tokio::task::JoinError>
    where
        T: Send + 'static,
        F: FnOnce(&StorageService) -> T + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store)).await
    }

    /// Store `message` and count it on its session. With `new_title_from` a missing session is
    /// created; without it a message for a session deleted meanwhile is dropped.
    async fn persist(&self, message: &Message, new_title_from: Option<&str>) {
        let msg = message.clone();
        let title = new_title_from.map(str::to_string);
        let stored = self
            .with_store(move |store| store.record_message(&msg, title.as_deref()))
            .await;
        match stored {
            Ok(Ok(Some(_))) => {}
            Ok(Ok(None)) => log::warn!(
                "session {} was deleted, dropping message {}",
                message.session_id,
                message.id
            ),
            Ok(Err(e)) => log::warn!("failed to persist message {}: {}", message.id, e),
            Err(e) => log::warn!("persist task for message {} failed: {}", message.id, e),
        }
    }

    /// Send `text` in `session_id` (a new session when `None`).
    ///
    /// Backend failures are not returned as errors: they become an assistant message with a
    /// human-readable description, reported in [`SendOutcome::error`]. Only blank input and a
    /// send already pending for the same session are rejected.
    pub async fn send(
        &self,
        session_id: Option<&str>,
        text: &str,
    ) -> Result<SendOutcome, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(session::new_session_id);
        let _busy = self.begin(&session_id)?;

        let user_message = Message::user(session_id.clone(), text);
        self.persist(&user_message, Some(text)).await;

        let window = self.context_window;
        let id = session_id.clone();
        let turns = self
            .with_store(move |store| window_turns(store, &id, window))
            .await
            .unwrap_or_else(|e| {
                log::warn!("loading context for session {} failed: {}", session_id, e);
                Vec::new()
            });
        log::debug!(
            "sending {} turn(s) for session {}",
            turns.len(),
            session_id
        );
        let (reply, error) = match self.backend.complete(&turns).await {
            Ok(content) => (Message::assistant(session_id.clone(), content), None),
            Err(e) => {
                log::warn!("chat request failed for session {}: {}", session_id, e);
                (Message::assistant(session_id.clone(), e.user_message()), Some(e))
            }
        };
        self.persist(&reply, None).await;

        Ok(SendOutcome {
            session_id,
            user_message,
            reply,
            error,
        })
    }
}

fn window_turns(store: &StorageService, session_id: &str, size: usize) -> Vec<ChatTurn> {
    let messages = store.messages_by_session(session_id);
    let start = messages.len().saturating_sub(size);
    messages[start..]
        .iter()
        .map(|m| {
            if m.is_user {
                ChatTurn::user(m.content.clone())
            } else {
                ChatTurn::assistant(m.content.clone())
            }
        })
        .collect()
}
