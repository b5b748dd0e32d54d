//! Typed access to the four collections.

use super::{FileBackend, KvBackend, MemoryBackend, PersistenceError};
use crate::knowledge::KnowledgeLibrary;
use crate::session::{Message, Session};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Open string-keyed settings map.
pub type Settings = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Messages,
    Sessions,
    KnowledgeLibraries,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Messages,
        Collection::Sessions,
        Collection::KnowledgeLibraries,
        Collection::Settings,
    ];
}

/// Key names per collection, and whether values are pretty-printed.
#[derive(Debug, Clone, Copy)]
pub struct KeyLayout {
    pub messages: &'static str,
    pub sessions: &'static str,
    pub knowledge_libraries: &'static str,
    pub settings: &'static str,
    pub pretty: bool,
}

impl KeyLayout {
    /// Keys used by the per-client store.
    pub const CLIENT: KeyLayout = KeyLayout {
        messages: "chat_messages",
        sessions: "chat_sessions",
        knowledge_libraries: "knowledge_libraries",
        settings: "app_settings",
        pretty: false,
    };

    /// File names (without `.json`) used by the disk store.
    pub const DISK: KeyLayout = KeyLayout {
        messages: "messages",
        sessions: "sessions",
        knowledge_libraries: "knowledge_libraries",
        settings: "settings",
        pretty: true,
    };

    pub fn key(&self, collection: Collection) -> &'static str {
        match collection {
            Collection::Messages => self.messages,
            Collection::Sessions => self.sessions,
            Collection::KnowledgeLibraries => self.knowledge_libraries,
            Collection::Settings => self.settings,
        }
    }
}

/// Full data set as written by [`StorageService::export_data`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub messages: Vec<Message>,
    pub sessions: Vec<Session>,
    pub knowledge_libraries: Vec<KnowledgeLibrary>,
    pub settings: Settings,
    pub exported_at: DateTime<Utc>,
}

/// Import payload: every collection is optional; absent ones are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportData {
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
    #[serde(default)]
    pub sessions: Option<Vec<Session>>,
    #[serde(default)]
    pub knowledge_libraries: Option<Vec<KnowledgeLibrary>>,
    #[serde(default)]
    pub settings: Option<Settings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStats {
    pub total_messages: usize,
    pub total_sessions: usize,
    pub total_libraries: usize,
    /// Size of all stored values, e.g. "1.25 KB".
    pub storage_size: String,
}

/// Storage service over a [`KvBackend`]. Cheap to clone; clones share the backend and the
/// write lock.
///
/// Every call is synchronous and may touch the filesystem. Async callers run it on the
/// blocking pool.
#[derive(Clone)]
pub struct StorageService {
    backend: Arc<dyn KvBackend>,
    layout: KeyLayout,
    /// Held across each load-modify-save of a collection.
    write_lock: Arc<Mutex<()>>,
}

impl StorageService {
    pub fn new(backend: Arc<dyn KvBackend>, layout: KeyLayout) -> Self {
        Self {
            backend,
            layout,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Client store held in memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), KeyLayout::CLIENT)
    }

    /// Disk store: one pretty-printed JSON file per collection under `dir`.
    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileBackend::new(dir)), KeyLayout::DISK)
    }

    pub fn layout(&self) -> KeyLayout {
        self.layout
    }

    /// Load a collection; missing or unreadable data yields the default (empty) value.
    pub fn load<T: DeserializeOwned + Default>(&self, collection: Collection) -> T {
        let key = self.layout.key(collection);
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return T::default(),
            Err(e) => {
                log::warn!("failed to read {}: {}", key, e);
                return T::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("failed to parse {}: {}", key, e);
                T::default()
            }
        }
    }

    /// Overwrite a whole collection.
    pub fn save<T: Serialize + ?Sized>(
        &self,
        collection: Collection,
        value: &T,
    ) -> Result<(), PersistenceError> {
        let _guard = self.lock();
        self.write(collection, value)
    }

    fn write<T: Serialize + ?Sized>(
        &self,
        collection: Collection,
        value: &T,
    ) -> Result<(), PersistenceError> {
        let key = self.layout.key(collection);
        let json = if self.layout.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|source| PersistenceError::Json {
            key: key.to_string(),
            source,
        })?;
        self.backend.set(key, &json)
    }

    // ---- messages ----

    /// Append a message (no dedup).
    pub fn save_message(&self, message: &Message) -> Result<(), PersistenceError> {
        let _guard = self.lock();
        let mut messages = self.all_messages();
        messages.push(message.clone());
        self.write(Collection::Messages, &messages)
    }

    pub fn all_messages(&self) -> Vec<Message> {
        self.load(Collection::Messages)
    }

    /// Messages of one session, oldest first.
    pub fn messages_by_session(&self, session_id: &str) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .all_messages()
            .into_iter()
            .filter(|m| m.session_id == session_id)
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        messages
    }

    pub fn delete_message(&self, message_id: &str) -> Result<(), PersistenceError> {
        let _guard = self.lock();
        let mut messages = self.all_messages();
        messages.retain(|m| m.id != message_id);
        self.write(Collection::Messages, &messages)
    }

    /// Append `message` and count it on its session in one locked step.
    ///
    /// A missing session is created titled from `new_title_from` when given. Without it the
    /// message is not stored and `None` is returned.
    pub fn record_message(
        &self,
        message: &Message,
        new_title_from: Option<&str>,
    ) -> Result<Option<Session>, PersistenceError> {
        let _guard = self.lock();
        let mut sessions = self.all_sessions();
        let index = match sessions.iter().position(|s| s.id == message.session_id) {
            Some(i) => i,
            None => match new_title_from {
                Some(text) => {
                    sessions.push(Session::from_first_message(
                        message.session_id.clone(),
                        text,
                    ));
                    sessions.len() - 1
                }
                None => return Ok(None),
            },
        };

        let mut messages = self.all_messages();
        messages.push(message.clone());
        self.write(Collection::Messages, &messages)?;

        sessions[index].touch();
        let session = sessions[index].clone();
        self.write(Collection::Sessions, &sessions)?;
        Ok(Some(session))
    }

    // ---- sessions ----

    /// Upsert: replace by id if present, else append.
    pub fn save_session(&self, session: &Session) -> Result<(), PersistenceError> {
        let _guard = self.lock();
        self.upsert_session(session)
    }

    fn upsert_session(&self, session: &Session) -> Result<(), PersistenceError> {
        let mut sessions = self.all_sessions();
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => sessions.push(session.clone()),
        }
        self.write(Collection::Sessions, &sessions)
    }

    pub fn all_sessions(&self) -> Vec<Session> {
        self.load(Collection::Sessions)
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.all_sessions().into_iter().find(|s| s.id == session_id)
    }

    /// Remove the session and every message that belongs to it.
    pub fn delete_session(&self, session_id: &str) -> Result<(), PersistenceError> {
        let _guard = self.lock();
        let mut sessions = self.all_sessions();
        sessions.retain(|s| s.id != session_id);
        self.write(Collection::Sessions, &sessions)?;

        let mut messages = self.all_messages();
        messages.retain(|m| m.session_id != session_id);
        self.write(Collection::Messages, &messages)
    }

    /// Rename a session and bump its `last_updated`. Returns false when the session does not exist.
    pub fn update_session_title(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<bool, PersistenceError> {
        let _guard = self.lock();
        let Some(mut session) = self.session(session_id) else {
            return Ok(false);
        };
        session.title = title.to_string();
        session.last_updated = Utc::now();
        self.upsert_session(&session)?;
        Ok(true)
    }

    // ---- knowledge libraries ----

    pub fn save_knowledge_libraries(
        &self,
        libraries: &[KnowledgeLibrary],
    ) -> Result<(), PersistenceError> {
        self.save(Collection::KnowledgeLibraries, libraries)
    }

    pub fn knowledge_libraries(&self) -> Vec<KnowledgeLibrary> {
        self.load(Collection::KnowledgeLibraries)
    }

    // ---- settings ----

    pub fn save_setting(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), PersistenceError> {
        let _guard = self.lock();
        let mut settings = self.settings();
        settings.insert(key.to_string(), value);
        self.write(Collection::Settings, &settings)
    }

    pub fn setting(&self, key: &str) -> Option<serde_json::Value> {
        self.settings().get(key).cloned()
    }

    pub fn setting_or(&self, key: &str, default: serde_json::Value) -> serde_json::Value {
        self.setting(key).unwrap_or(default)
    }

    pub fn settings(&self) -> Settings {
        self.load(Collection::Settings)
    }

    // ---- whole data set ----

    pub fn clear_all(&self) -> Result<(), PersistenceError> {
        let _guard = self.lock();
        for c in Collection::ALL {
            self.backend.remove(self.layout.key(c))?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> ExportData {
        ExportData {
            messages: self.all_messages(),
            sessions: self.all_sessions(),
            knowledge_libraries: self.knowledge_libraries(),
            settings: self.settings(),
            exported_at: Utc::now(),
        }
    }

    /// Pretty JSON of every collection plus `exportedAt`.
    pub fn export_data(&self) -> Result<String, PersistenceError> {
        serde_json::to_string_pretty(&self.snapshot()).map_err(|source| PersistenceError::Json {
            key: "export".to_string(),
            source,
        })
    }

    /// Replace every collection present in `json`. Nothing is written unless the whole payload parses.
    pub fn import_data(&self, json: &str) -> Result<(), PersistenceError> {
        let data: ImportData =
            serde_json::from_str(json).map_err(|source| PersistenceError::Json {
                key: "import".to_string(),
                source,
            })?;
        let _guard = self.lock();
        if let Some(messages) = &data.messages {
            self.write(Collection::Messages, messages)?;
        }
        if let Some(sessions) = &data.sessions {
            self.write(Collection::Sessions, sessions)?;
        }
        if let Some(libraries) = &data.knowledge_libraries {
            self.write(Collection::KnowledgeLibraries, libraries)?;
        }
        if let Some(settings) = &data.settings {
            self.write(Collection::Settings, settings)?;
        }
        Ok(())
    }

    pub fn data_stats(&self) -> DataStats {
        let bytes: usize = match self.backend.entries() {
            Ok(entries) => entries.iter().map(|(_, v)| v.len()).sum(),
            Err(e) => {
                log::warn!("failed to measure storage size: {}", e);
                0
            }
        };
        DataStats {
            total_messages: self.all_messages().len(),
            total_sessions: self.all_sessions().len(),
            total_libraries: self.knowledge_libraries().len(),
            storage_size: format!("{:.2} KB", bytes as f64 / 1024.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{DocumentStatus, DocumentType, KnowledgeDocument};
    use chrono::Duration;
    use serde_json::json;

    fn message_at(session_id: &str, content: &str, offset_secs: i64) -> Message {
        let mut m = Message::user(session_id, content);
        m.timestamp = DateTime::parse_from_rfc3339("2025-08-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::seconds(offset_secs);
        m
    }

    #[test]
    fn empty_store_loads_defaults() {
        let store = StorageService::in_memory();
        assert!(store.all_messages().is_empty());
        assert!(store.all_sessions().is_empty());
        assert!(store.knowledge_libraries().is_empty());
        assert!(store.settings().is_empty());
    }

    #[test]
    fn corrupt_collection_reads_as_empty() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("chat_messages", "{not json").unwrap();
        backend.set("app_settings", "[1,2]").unwrap();
        let store = StorageService::new(backend, KeyLayout::CLIENT);
        assert!(store.all_messages().is_empty());
        assert!(store.settings().is_empty());
        store.save_message(&Message::user("s", "x")).unwrap();
        assert_eq!(store.all_messages().len(), 1);
    }

    #[test]
    fn messages_append_without_dedup_and_sort_by_time() {
        let store = StorageService::in_memory();
        let late = message_at("s1", "late", 10);
        let early = message_at("s1", "early", 0);
        let other = message_at("s2", "other", 5);
        store.save_message(&late).unwrap();
        store.save_message(&early).unwrap();
        store.save_message(&other).unwrap();
        store.save_message(&other).unwrap();
        assert_eq!(store.all_messages().len(), 4);
        let s1: Vec<_> = store
            .messages_by_session("s1")
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(s1, vec!["early", "late"]);
    }

    #[test]
    fn delete_single_message() {
        let store = StorageService::in_memory();
        let a = Message::user("s1", "a");
        let b = Message::user("s1", "b");
        store.save_message(&a).unwrap();
        store.save_message(&b).unwrap();
        store.delete_message(&a.id).unwrap();
        let left = store.all_messages();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, b.id);
    }

    #[test]
    fn session_upsert_replaces_by_id() {
        let store = StorageService::in_memory();
        let mut s = Session::from_first_message("s1", "hello");
        store.save_session(&s).unwrap();
        s.touch();
        store.save_session(&s).unwrap();
        store
            .save_session(&Session::from_first_message("s2", "other"))
            .unwrap();
        let sessions = store.all_sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "s1");
        assert_eq!(sessions[0].message_count, 1);
    }

    #[test]
    fn delete_session_cascades_to_messages() {
        let store = StorageService::in_memory();
        store
            .save_session(&Session::from_first_message("s1", "a"))
            .unwrap();
        store
            .save_session(&Session::from_first_message("s2", "b"))
            .unwrap();
        store.save_message(&Message::user("s1", "a")).unwrap();
        store.save_message(&Message::assistant("s1", "re a")).unwrap();
        store.save_message(&Message::user("s2", "b")).unwrap();

        store.delete_session("s1").unwrap();

        assert!(store.session("s1").is_none());
        assert!(store.session("s2").is_some());
        assert!(store.messages_by_session("s1").is_empty());
        assert!(store.all_messages().iter().all(|m| m.session_id != "s1"));
        assert_eq!(store.all_messages().len(), 1);
    }

    #[test]
    fn record_message_creates_and_counts() {
        let store = StorageService::in_memory();
        let session = store
            .record_message(&Message::user("s1", "hello there"), Some("hello there"))
            .unwrap()
            .unwrap();
        assert_eq!(session.title, "hello there");
        assert_eq!(session.message_count, 1);

        let session = store
            .record_message(&Message::assistant("s1", "hi"), None)
            .unwrap()
            .unwrap();
        assert_eq!(session.title, "hello there");
        assert_eq!(session.message_count, 2);
        assert_eq!(store.messages_by_session("s1").len(), 2);
    }

    #[test]
    fn record_message_without_session_is_dropped() {
        let store = StorageService::in_memory();
        let stored = store
            .record_message(&Message::assistant("gone", "late"), None)
            .unwrap();
        assert!(stored.is_none());
        assert!(store.all_messages().is_empty());
        assert!(store.all_sessions().is_empty());
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let store = StorageService::in_memory();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let id = format!("s{}", t);
                    for i in 0..25 {
                        let text = format!("m{}", i);
                        store
                            .record_message(&Message::user(id.clone(), &text), Some(&text))
                            .unwrap();
                        store.save_setting(&format!("{}-{}", id, i), json!(i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.all_messages().len(), 200);
        assert_eq!(store.settings().len(), 200);
        let sessions = store.all_sessions();
        assert_eq!(sessions.len(), 8);
        for s in sessions {
            assert_eq!(s.message_count, 25, "session {}", s.id);
            assert_eq!(s.title, "m0");
        }
    }

    #[test]
    fn update_title_of_missing_session_is_noop() {
        let store = StorageService::in_memory();
        assert!(!store.update_session_title("nope", "x").unwrap());
        assert!(store.all_sessions().is_empty());

        store
            .save_session(&Session::from_first_message("s1", "first"))
            .unwrap();
        assert!(store.update_session_title("s1", "Renamed").unwrap());
        assert_eq!(store.session("s1").unwrap().title, "Renamed");
    }

    #[test]
    fn settings_by_key() {
        let store = StorageService::in_memory();
        assert_eq!(store.setting("theme"), None);
        assert_eq!(store.setting_or("theme", json!("light")), json!("light"));
        store.save_setting("theme", json!("dark")).unwrap();
        store.save_setting("fontSize", json!(14)).unwrap();
        assert_eq!(store.setting_or("theme", json!("light")), json!("dark"));
        assert_eq!(store.settings().len(), 2);
    }

    #[test]
    fn export_import_round_trip() {
        let source = StorageService::in_memory();
        let mut session = Session::from_first_message("s1", "hello");
        session.touch();
        source.save_session(&session).unwrap();
        source.save_message(&Message::user("s1", "hello")).unwrap();
        source.save_setting("theme", json!({"mode": "dark"})).unwrap();
        source
            .save_knowledge_libraries(&[KnowledgeLibrary {
                id: "default".to_string(),
                name: "Default".to_string(),
                documents: vec![KnowledgeDocument {
                    id: "1".to_string(),
                    name: "api.md".to_string(),
                    typ: DocumentType::Md,
                    status: DocumentStatus::Success,
                    size: Some("5.7KB".to_string()),
                    last_modified: Some(Utc::now()),
                    is_selected: true,
                }],
            }])
            .unwrap();

        let exported = source.export_data().unwrap();
        let dir = std::env::temp_dir().join(format!(
            "chatrelay-import-test-{}",
            uuid::Uuid::new_v4()
        ));
        let target = StorageService::on_disk(&dir);
        target.import_data(&exported).unwrap();

        assert_eq!(target.all_messages(), source.all_messages());
        assert_eq!(target.all_sessions(), source.all_sessions());
        assert_eq!(target.settings(), source.settings());
        assert_eq!(target.knowledge_libraries(), source.knowledge_libraries());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn import_rejects_bad_payload_and_keeps_data() {
        let store = StorageService::in_memory();
        store.save_setting("keep", json!(true)).unwrap();
        assert!(store.import_data("not json").is_err());
        assert!(store
            .import_data(r#"{"settings":{"x":1},"messages":[{"id":1}]}"#)
            .is_err());
        assert_eq!(store.setting("keep"), Some(json!(true)));
        assert_eq!(store.setting("x"), None);
    }

    #[test]
    fn import_leaves_absent_collections() {
        let store = StorageService::in_memory();
        store.save_message(&Message::user("s1", "kept")).unwrap();
        store.import_data(r#"{"settings":{"lang":"zh"}}"#).unwrap();
        assert_eq!(store.all_messages().len(), 1);
        assert_eq!(store.setting("lang"), Some(json!("zh")));
    }

    #[test]
    fn clear_all_and_stats() {
        let store = StorageService::in_memory();
        store.save_message(&Message::user("s1", "a")).unwrap();
        store
            .save_session(&Session::from_first_message("s1", "a"))
            .unwrap();
        let stats = store.data_stats();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_libraries, 0);
        assert!(stats.storage_size.ends_with(" KB"));
        assert_ne!(stats.storage_size, "0.00 KB");

        store.clear_all().unwrap();
        let stats = store.data_stats();
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.storage_size, "0.00 KB");
    }
}
