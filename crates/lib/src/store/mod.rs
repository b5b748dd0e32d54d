//! Persistence: four JSON collections (messages, sessions, knowledge libraries, settings)
//! kept under fixed keys of a key-value backend.
//!
//! Every save rewrites the whole collection. Reads that hit corrupt JSON are logged and
//! treated as the empty collection. The same service runs over an in-process map (client
//! store) or a directory of JSON files (disk store, with backups).

mod backend;
mod backup;
mod service;

use std::path::PathBuf;

pub use backend::{FileBackend, KvBackend, MemoryBackend};
pub use backup::{clean_backups_older_than, clean_old_backups, create_backup, BackupSnapshot};
pub use service::{
    Collection, DataStats, ExportData, ImportData, KeyLayout, Settings, StorageService,
};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("storage io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json for {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
