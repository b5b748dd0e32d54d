//! Conversation sessions and their messages.
//!
//! A session groups an ordered set of messages. Messages are immutable once created and are
//! removed together with their session. Both types are persisted as JSON collections by
//! [`crate::store::StorageService`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// Sessions are titled from the first user message, cut to this many characters.
pub const TITLE_MAX_CHARS: usize = 30;

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
}

impl Message {
    pub fn user(session_id: impl Into<SessionId>, content: impl Into<String>) -> Self {
        Self::new(session_id, content, true)
    }

    pub fn assistant(session_id: impl Into<SessionId>, content: impl Into<String>) -> Self {
        Self::new(session_id, content, false)
    }

    fn new(session_id: impl Into<SessionId>, content: impl Into<String>, is_user: bool) -> Self {
        Self {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            content: content.into(),
            is_user,
            timestamp: Utc::now(),
            session_id: session_id.into(),
        }
    }

    /// Role tag used on the wire to the gateway.
    pub fn role(&self) -> &'static str {
        if self.is_user {
            "user"
        } else {
            "assistant"
        }
    }
}

/// Session metadata. `message_count` is a running counter maintained on every persisted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub message_count: u64,
}

impl Session {
    /// Start a session whose title is derived from its first user message.
    pub fn from_first_message(id: impl Into<SessionId>, first_message: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: derive_title(first_message),
            created_at: now,
            last_updated: now,
            message_count: 0,
        }
    }

    /// Record one more persisted message.
    pub fn touch(&mut self) {
        self.message_count += 1;
        self.last_updated = Utc::now();
    }
}

/// Generate a fresh session id.
pub fn new_session_id() -> SessionId {
    format!("sess-{}", uuid::Uuid::new_v4())
}

/// Title from the first user message: trimmed, cut to [`TITLE_MAX_CHARS`] characters with `...` appended when longer.
pub fn derive_title(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= TITLE_MAX_CHARS {
        text.to_string()
    } else {
        let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
        title.push_str("...");
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_title_kept() {
        assert_eq!(derive_title("hello"), "hello");
        assert_eq!(derive_title("  hello \n"), "hello");
    }

    #[test]
    fn long_title_truncated_on_chars() {
        let text = "a".repeat(31);
        assert_eq!(derive_title(&text), format!("{}...", "a".repeat(30)));
        let exact = "b".repeat(30);
        assert_eq!(derive_title(&exact), exact);
        let wide = "天".repeat(40);
        assert_eq!(derive_title(&wide), format!("{}...", "天".repeat(30)));
    }

    #[test]
    fn message_roles_and_ids() {
        let u = Message::user("s1", "hi");
        let a = Message::assistant("s1", "hello");
        assert_eq!(u.role(), "user");
        assert_eq!(a.role(), "assistant");
        assert_ne!(u.id, a.id);
        assert_eq!(u.session_id, "s1");
    }

    #[test]
    fn wire_format_is_camel_case() {
        let m = Message::user("s1", "hi");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["isUser"], serde_json::json!(true));
        assert_eq!(v["sessionId"], serde_json::json!("s1"));
        let mut s = Session::from_first_message("s1", "hi");
        s.touch();
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["messageCount"], serde_json::json!(1));
        assert!(v.get("lastUpdated").is_some());
        assert!(v.get("createdAt").is_some());
    }
}
