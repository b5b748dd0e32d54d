//! Key-value backends: string keys mapped to serialized JSON values.

use super::PersistenceError;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Whole-value get/set store. No transactions: the last `set` for a key wins.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
    /// All stored (key, value) pairs.
    fn entries(&self) -> Result<Vec<(String, String)>, PersistenceError>;
}

/// In-process store (one per client).
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let g = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(g.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut g = self.inner.write().unwrap_or_else(|e| e.into_inner());
        g.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let mut g = self.inner.write().unwrap_or_else(|e| e.into_inner());
        g.remove(key);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(String, String)>, PersistenceError> {
        let g = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(g.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

/// One `<key>.json` file per key under `dir`. The directory is created on first write.
/// Each read/write holds an advisory lock on the file so readers never see a half-written value.
/// All IO is blocking; call it from `spawn_blocking` inside async code.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn read_locked(path: &Path) -> Result<String, PersistenceError> {
        let io_err = |source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        file.lock_shared().map_err(io_err)?;
        let mut s = String::new();
        let read = file.read_to_string(&mut s);
        let _ = file.unlock();
        read.map_err(io_err)?;
        Ok(s)
    }
}

impl KvBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_locked(&path).map(Some)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        let io_err = |source| PersistenceError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;
        file.lock_exclusive().map_err(io_err)?;
        let written = file
            .set_len(0)
            .and_then(|_| file.write_all(value.as_bytes()))
            .and_then(|_| file.flush());
        let _ = file.unlock();
        written.map_err(io_err)
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistenceError::Io { path, source }),
        }
    }

    fn entries(&self) -> Result<Vec<(String, String)>, PersistenceError> {
        let rd = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };
        let mut out = Vec::new();
        for entry in rd.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            out.push((key.to_string(), Self::read_locked(&path)?));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}
