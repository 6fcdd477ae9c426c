//! Durable state storage for the control plane.
//!
//! Stores registry metadata, alert history, and health reports as structured
//! JSON values under string keys, with optional per-entry TTL. Keys use ":"
//! as a namespace separator (e.g. `registry:models:churn`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Error type for store operations
#[derive(Debug)]
pub enum StoreError {
    /// I/O or storage error
    IoError(String),
    /// Serialization error
    SerializationError(String),
    /// Key not found
    NotFound(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::IoError(s) => write!(f, "I/O error: {}", s),
            StoreError::SerializationError(s) => write!(f, "Serialization error: {}", s),
            StoreError::NotFound(s) => write!(f, "Key not found: {}", s),
        }
    }
}

impl std::error::Error for StoreError {}

/// On-store representation of an entry. Expiry is wall-clock so entries
/// survive process restarts with their TTL intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at_ms: Option<i64>,
    value: serde_json::Value,
}

impl StoredEntry {
    fn new(value: serde_json::Value, ttl: Option<Duration>) -> Self {
        let expires_at_ms =
            ttl.map(|t| chrono::Utc::now().timestamp_millis() + t.as_millis() as i64);
        Self {
            expires_at_ms,
            value,
        }
    }

    fn is_expired(&self) -> bool {
        match self.expires_at_ms {
            Some(at) => chrono::Utc::now().timestamp_millis() >= at,
            None => false,
        }
    }
}

/// Trait for durable key-value backends with TTL support.
///
/// Expired entries are treated as absent: `get` returns `None` and scans
/// skip them.
pub trait TtlStore: Send + Sync {
    /// Store a value, optionally expiring after `ttl`.
    fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Retrieve a live value.
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Delete a key. Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List live keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Flush all pending writes to disk.
    fn flush(&self) -> Result<(), StoreError>;
}

/// In-memory store, used as the default backend and in tests.
#[derive(Default)]
pub struct MemoryStore {
    data: std::sync::RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TtlStore for MemoryStore {
    fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::IoError(e.to_string()))?;
        data.insert(key.to_string(), StoredEntry::new(value, ttl));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        {
            let data = self
                .data
                .read()
                .map_err(|e| StoreError::IoError(e.to_string()))?;
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Entry existed but is past its TTL: drop it.
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::IoError(e.to_string()))?;
        data.remove(key);
        Ok(None)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::IoError(e.to_string()))?;
        data.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::IoError(e.to_string()))?;
        let mut keys: Vec<String> = data
            .iter()
            .filter(|(k, entry)| k.starts_with(prefix) && !entry.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(()) // No-op for memory store
    }
}

/// File-system based store.
///
/// Stores entries as JSON files in a directory. Keys containing ":" are
/// mapped to subdirectories (e.g., "registry:models:churn" →
/// "registry/models/churn"). Writes are atomic via temp file + rename.
pub struct FileStore {
    dir: std::path::PathBuf,
}

impl FileStore {
    /// Open or create a file-based store at the given directory
    pub fn open(dir: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::IoError(e.to_string()))?;
        info!("Opened file store at {}", dir.display());
        Ok(Self { dir })
    }

    fn key_to_path(&self, key: &str) -> std::path::PathBuf {
        // Map ":" separators to directory separators
        let path_str = key.replace(':', std::path::MAIN_SEPARATOR_STR);
        self.dir.join(path_str)
    }

    fn path_to_key(&self, path: &std::path::Path) -> Option<String> {
        let rel = path.strip_prefix(&self.dir).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();
        Some(parts.join(":"))
    }

    fn collect_files(
        dir: &std::path::Path,
        out: &mut Vec<std::path::PathBuf>,
    ) -> Result<(), StoreError> {
        let entries = std::fs::read_dir(dir).map_err(|e| StoreError::IoError(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::IoError(e.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                Self::collect_files(&path, out)?;
            } else if path.extension().map(|e| e == "tmp") != Some(true) {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl TtlStore for FileStore {
    fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let entry = StoredEntry::new(value, ttl);
        let data =
            serde_json::to_vec(&entry).map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let path = self.key_to_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }

        // Atomic write: write to temp file, then rename
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, &data).map_err(|e| StoreError::IoError(e.to_string()))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| StoreError::IoError(e.to_string()))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let path = self.key_to_path(key);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::IoError(e.to_string())),
        };
        let entry: StoredEntry = serde_json::from_slice(&data)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        if entry.is_expired() {
            let _ = std::fs::remove_file(&path);
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_to_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::IoError(e.to_string())),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        Self::collect_files(&self.dir, &mut files)?;

        let mut keys = Vec::new();
        for path in files {
            if let Some(key) = self.path_to_key(&path) {
                if key.starts_with(prefix) {
                    // Drop expired entries as they are discovered.
                    if self.get(&key)?.is_some() {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(()) // File writes are already flushed on close
    }
}

/// Typed snapshot access over a [`TtlStore`].
///
/// The registry, alert manager, and monitor persist their state through
/// this so the backend stays swappable.
pub struct SnapshotManager {
    store: Arc<dyn TtlStore>,
}

impl SnapshotManager {
    pub fn new(store: Arc<dyn TtlStore>) -> Self {
        Self { store }
    }

    pub fn save<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let value =
            serde_json::to_value(value).map_err(|e| StoreError::SerializationError(e.to_string()))?;
        self.store.put(key, value, ttl)
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key)? {
            Some(value) => {
                let parsed = serde_json::from_value(value)
                    .map_err(|e| StoreError::SerializationError(e.to_string()))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Load every entry under `prefix`. Entries that no longer parse are
    /// skipped with a warning so one bad record cannot block recovery.
    pub fn load_all<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>, StoreError> {
        let mut out = Vec::new();
        for key in self.store.keys_with_prefix(prefix)? {
            match self.load(&key) {
                Ok(Some(value)) => out.push((key, value)),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", key, e),
            }
        }
        Ok(out)
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(key)
    }

    /// Delete the oldest entries under `prefix`, keeping the most recent
    /// `keep`. Relies on keys sorting chronologically (timestamp suffixes).
    pub fn prune_prefix(&self, prefix: &str, keep: usize) -> Result<usize, StoreError> {
        let keys = self.store.keys_with_prefix(prefix)?;
        let to_delete = keys.len().saturating_sub(keep);
        for key in keys.iter().take(to_delete) {
            self.store.delete(key)?;
        }
        if to_delete > 0 {
            info!("Pruned {} snapshots under {}", to_delete, prefix);
        }
        Ok(to_delete)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.store.flush()
    }

    pub fn store(&self) -> &Arc<dyn TtlStore> {
        &self.store
    }
}
