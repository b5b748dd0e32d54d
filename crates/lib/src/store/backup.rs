//! Timestamped snapshots of the disk store and age-based pruning.

use super::{PersistenceError, Settings, StorageService};
use crate::knowledge::KnowledgeLibrary;
use crate::session::{Message, Session};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const BACKUP_DIR: &str = "backups";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub messages: Vec<Message>,
    pub sessions: Vec<Session>,
    pub knowledge_libraries: Vec<KnowledgeLibrary>,
    pub settings: Settings,
    pub timestamp: String,
}

fn backup_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(BACKUP_DIR)
}

/// Write `<data_dir>/backups/backup-<timestamp>.json` with every collection and return its path.
pub fn create_backup(store: &StorageService, data_dir: &Path) -> Result<PathBuf, PersistenceError> {
    let dir = backup_dir(data_dir);
    std::fs::create_dir_all(&dir).map_err(|source| PersistenceError::Io {
        path: dir.clone(),
        source,
    })?;

    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let snapshot = BackupSnapshot {
        messages: store.all_messages(),
        sessions: store.all_sessions(),
        knowledge_libraries: store.knowledge_libraries(),
        settings: store.settings(),
        timestamp: timestamp.clone(),
    };
    let json = serde_json::to_string_pretty(&snapshot).map_err(|source| PersistenceError::Json {
        key: "backup".to_string(),
        source,
    })?;

    let file = dir.join(format!("backup-{}.json", timestamp.replace([':', '.'], "-")));
    std::fs::write(&file, json).map_err(|source| PersistenceError::Io {
        path: file.clone(),
        source,
    })?;
    log::info!("backup created: {}", file.display());
    Ok(file)
}

/// Delete backups last modified more than `days_to_keep` days ago. Returns how many were removed.
pub fn clean_old_backups(data_dir: &Path, days_to_keep: u32) -> Result<usize, PersistenceError> {
    let age = Duration::from_secs(u64::from(days_to_keep) * 24 * 60 * 60);
    let cutoff = SystemTime::now()
        .checked_sub(age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    clean_backups_older_than(data_dir, cutoff)
}

/// Delete backups whose modification time is before `cutoff`. A missing backup directory is a no-op.
pub fn clean_backups_older_than(
    data_dir: &Path,
    cutoff: SystemTime,
) -> Result<usize, PersistenceError> {
    let dir = backup_dir(data_dir);
    let rd = match std::fs::read_dir(&dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(source) => return Err(PersistenceError::Io { path: dir, source }),
    };

    let mut removed = 0;
    for entry in rd.flatten() {
        let path = entry.path();
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("skipping backup {}: {}", path.display(), e);
                continue;
            }
        };
        if modified < cutoff {
            std::fs::remove_file(&path).map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;
            log::info!("deleted old backup: {}", entry.file_name().to_string_lossy());
            removed += 1;
        }
    }
    Ok(removed)
}
